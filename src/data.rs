use crate::config::{
    CACHE_MAX_AGE_SECS, CALENDAR_DAYS_PER_SESSION, FETCH_MAX_ATTEMPTS, ProviderSettings,
};
use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDate, TimeZone, Utc};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A single closing observation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClosePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Closing prices for one identifier, oldest first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceHistory {
    pub symbol: String,
    pub history: Vec<ClosePoint>,
}

impl PriceHistory {
    pub fn new(symbol: &str, history: Vec<ClosePoint>) -> Self {
        Self {
            symbol: symbol.to_string(),
            history,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Keeps the `lookback` most recent valid closes at or before `end`.
    ///
    /// Non-finite and non-positive closes are dropped, and a repeated date
    /// keeps its last observation.
    pub fn window(mut self, end: NaiveDate, lookback: usize) -> Self {
        self.history
            .retain(|p| p.date <= end && p.close.is_finite() && p.close > 0.0);
        self.history.sort_by_key(|p| p.date);
        self.history.reverse();
        self.history.dedup_by_key(|p| p.date);
        self.history.truncate(lookback);
        self.history.reverse();
        self
    }

    /// Synthetic random-walk history on consecutive weekdays ending at `end`.
    pub fn new_mock(symbol: &str, end: NaiveDate, days: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut dates = Vec::with_capacity(days);
        let mut date = end;
        while dates.len() < days {
            if date.weekday().number_from_monday() <= 5 {
                dates.push(date);
            }
            date -= Duration::days(1);
        }
        dates.reverse();

        let volatility = 0.02; // 2% daily volatility
        let drift: f64 = rng.gen_range(-0.001..0.002);
        let mut current_price: f64 = rng.gen_range(10.0..100.0);
        let history = dates
            .into_iter()
            .map(|date| {
                let change_pct: f64 = drift + rng.gen_range(-volatility..volatility);
                current_price *= 1.0 + change_pct;
                ClosePoint {
                    date,
                    close: current_price,
                }
            })
            .collect();

        Self {
            symbol: symbol.to_string(),
            history,
        }
    }
}

/// Source of historical closes.
///
/// `Ok(None)` means the source answered but holds no observations for the
/// identifier in the requested window; `Err` is reserved for transport or
/// parse failures.
pub trait PriceProvider: Send + Sync {
    fn fetch_closes(
        &self,
        symbol: &str,
        end: NaiveDate,
        lookback: usize,
    ) -> impl Future<Output = Result<Option<PriceHistory>>> + Send;
}

/// Upper-cases and trims an identifier, appending the market suffix unless
/// the identifier is an index (`^BVSP`) or already carries an exchange suffix.
pub fn normalize_symbol(raw: &str, market_suffix: &str) -> String {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() || symbol.starts_with('^') || symbol.contains('.') {
        return symbol;
    }
    format!("{}{}", symbol, market_suffix.trim().to_uppercase())
}

/// Name shown to users: the identifier without the market suffix.
pub fn display_symbol(symbol: &str, market_suffix: &str) -> String {
    let suffix = market_suffix.trim().to_uppercase();
    if suffix.is_empty() {
        return symbol.to_string();
    }
    symbol
        .strip_suffix(suffix.as_str())
        .unwrap_or(symbol)
        .to_string()
}

// ──────────────────────────────────────────────────────────────────────────────
// In-memory provider
// ──────────────────────────────────────────────────────────────────────────────

/// Serves fixed histories; used by tests and the `--mock` offline mode.
#[derive(Clone, Debug, Default)]
pub struct StaticProvider {
    histories: HashMap<String, PriceHistory>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(mut self, history: PriceHistory) -> Self {
        self.histories.insert(history.symbol.to_uppercase(), history);
        self
    }

    /// Random-walk histories for every symbol, all on the same calendar.
    pub fn with_mock(symbols: &[String], end: NaiveDate, days: usize) -> Self {
        symbols
            .iter()
            .enumerate()
            .fold(Self::new(), |provider, (i, symbol)| {
                provider.with_history(PriceHistory::new_mock(symbol, end, days, 42 + i as u64))
            })
    }
}

impl PriceProvider for StaticProvider {
    fn fetch_closes(
        &self,
        symbol: &str,
        end: NaiveDate,
        lookback: usize,
    ) -> impl Future<Output = Result<Option<PriceHistory>>> + Send {
        let found = self
            .histories
            .get(&symbol.to_uppercase())
            .cloned()
            .map(|h| h.window(end, lookback))
            .filter(|h| !h.is_empty());
        async move { Ok(found) }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Yahoo Finance provider
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize, Serialize, Debug)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooQuote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Daily closes from the Yahoo chart API, cached on disk for a day.
#[derive(Clone, Debug)]
pub struct YahooProvider {
    client: reqwest::Client,
    cache_dir: PathBuf,
}

impl YahooProvider {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            cache_dir: settings.cache_dir.clone(),
        }
    }

    async fn fetch_chart(&self, symbol: &str, end: NaiveDate, lookback: usize) -> Result<YahooChartResponse> {
        if !self.cache_dir.exists() {
            std::fs::create_dir_all(&self.cache_dir)?;
        }
        let cache_file = self
            .cache_dir
            .join(format!("{}_{}_{}.json", symbol.replace('^', "IDX_"), end, lookback));

        if cache_is_fresh(&cache_file)? {
            info!("Loading {} from cache...", symbol);
            let file = std::fs::File::open(&cache_file)?;
            let reader = std::io::BufReader::new(file);
            return Ok(serde_json::from_reader(reader)?);
        }

        info!("Cache miss for {}, fetching...", symbol);
        let response = self.fetch_from_api(symbol, end, lookback).await?;

        let file = std::fs::File::create(&cache_file)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer(writer, &response)?;
        Ok(response)
    }

    async fn fetch_from_api(&self, symbol: &str, end: NaiveDate, lookback: usize) -> Result<YahooChartResponse> {
        let start = end - Duration::days(lookback as i64 * CALENDAR_DAYS_PER_SESSION);
        let stop = end + Duration::days(1);
        let url = format!(
            "https://query1.finance.yahoo.com/v8/finance/chart/{}?period1={}&period2={}&interval=1d",
            symbol,
            unix_midnight(start),
            unix_midnight(stop)
        );

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self
                .client
                .get(&url)
                .header("User-Agent", "Mozilla/5.0")
                .send()
                .await
            {
                Ok(resp) => match resp.json::<YahooChartResponse>().await {
                    Ok(resp_json) => return Ok(resp_json),
                    Err(e) => {
                        if attempts >= FETCH_MAX_ATTEMPTS {
                            return Err(e.into());
                        }
                        warn!(
                            "Failed to parse JSON for {} (attempt {}/{}): {}",
                            symbol, attempts, FETCH_MAX_ATTEMPTS, e
                        );
                    }
                },
                Err(e) => {
                    if attempts >= FETCH_MAX_ATTEMPTS {
                        return Err(e.into());
                    }
                    warn!(
                        "Failed to fetch data for {} (attempt {}/{}): {}",
                        symbol, attempts, FETCH_MAX_ATTEMPTS, e
                    );
                }
            }

            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }
    }
}

impl PriceProvider for YahooProvider {
    fn fetch_closes(
        &self,
        symbol: &str,
        end: NaiveDate,
        lookback: usize,
    ) -> impl Future<Output = Result<Option<PriceHistory>>> + Send {
        async move {
            let response = self.fetch_chart(symbol, end, lookback).await?;
            let history = parse_chart(symbol, &response)?;
            Ok(history
                .map(|h| h.window(end, lookback))
                .filter(|h| !h.is_empty()))
        }
    }
}

fn cache_is_fresh(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let modified = std::fs::metadata(path)?.modified()?;
    let age = std::time::SystemTime::now().duration_since(modified)?;
    Ok(age.as_secs() < CACHE_MAX_AGE_SECS)
}

fn unix_midnight(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

fn parse_chart(symbol: &str, response: &YahooChartResponse) -> Result<Option<PriceHistory>> {
    if let Some(err) = &response.chart.error {
        if !err.is_null() {
            warn!("Yahoo returned an error for {}: {}", symbol, err);
            return Ok(None);
        }
    }
    let Some(result) = response.chart.result.as_ref().and_then(|r| r.first()) else {
        return Ok(None);
    };
    let Some(quotes) = result.indicators.quote.first() else {
        return Ok(None);
    };

    let mut history = Vec::with_capacity(result.timestamp.len());
    for (i, &timestamp) in result.timestamp.iter().enumerate() {
        let Some(Some(close)) = quotes.close.get(i) else {
            continue;
        };
        let date = Utc
            .timestamp_opt(timestamp, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("invalid timestamp {} for {}", timestamp, symbol))?
            .date_naive();
        history.push(ClosePoint {
            date,
            close: *close,
        });
    }

    if history.is_empty() {
        return Ok(None);
    }
    Ok(Some(PriceHistory::new(symbol, history)))
}
