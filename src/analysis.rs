use crate::config::{AnalysisConfig, DEFAULT_CONFIDENCE_MULTIPLIER, DEFAULT_WINDOW, ProviderSettings};
use crate::data::{PriceHistory, PriceProvider, display_symbol, normalize_symbol};
use crate::error::{AnalysisError, AnalysisResult};
use crate::ranker::{Candidate, NearestMatch, RankedTable, market_portfolio, nearest_match, rank_candidates};
use crate::returns::ReturnSeries;
use crate::risk::{self, Ratio, ReturnMoments, RiskParams};
use crate::wealth::{contribution_periods, project_portfolio_wealth};
use crate::weights::{combination_count, generate_weights};
use chrono::NaiveDate;
use futures_util::future::try_join_all;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

// ──────────────────────────────────────────────────────────────────────────────
// Request / response types
// ──────────────────────────────────────────────────────────────────────────────

/// Cooperative cancellation flag shared between a caller and a running evaluation.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

fn default_window() -> usize {
    DEFAULT_WINDOW
}

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE_MULTIPLIER
}

/// Allocation frontier request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    /// Asset identifiers in the order weights are reported.
    pub symbols: Vec<String>,
    /// Last session considered.
    pub reference_date: NaiveDate,
    #[serde(default = "default_window")]
    pub window: usize,
    /// Fractional weights of an existing portfolio to locate in the table.
    #[serde(default)]
    pub current_weights: Option<Vec<f64>>,
    #[serde(flatten)]
    pub config: AnalysisConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub periods: usize,
    pub table: RankedTable,
    pub nearest: Option<NearestMatch>,
    /// Index into `table.candidates` of the maximum-Sharpe allocation.
    pub market_portfolio: Option<usize>,
}

/// One holding of a single-asset risk report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub contribution: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskReportRequest {
    pub positions: Vec<Position>,
    pub reference_date: NaiveDate,
    #[serde(default = "default_window")]
    pub window: usize,
    /// Defaults to the provider's configured benchmark.
    #[serde(default)]
    pub benchmark: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence_multiplier: f64,
}

/// Risk of one asset held on its own, measured against the benchmark.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRiskProfile {
    pub symbol: String,
    pub contribution: f64,
    pub periods: usize,
    pub mean_return: f64,
    /// Mean period return of the benchmark over the same aligned sessions.
    pub benchmark_mean_return: f64,
    /// `mean_return - benchmark_mean_return`.
    pub excess_mean_return: f64,
    pub volatility: f64,
    pub value_at_risk: f64,
    pub value_at_risk_amount: f64,
    pub sharpe_ratio: Ratio,
    pub beta: Ratio,
    pub correlation: Ratio,
    pub dates: Vec<NaiveDate>,
    /// `p_t / p_0 - 1` over the aligned sessions.
    pub cumulative_variation: Vec<f64>,
    pub benchmark_cumulative_variation: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskReport {
    pub benchmark: String,
    pub assets: Vec<AssetRiskProfile>,
    /// Simple sum of the per-asset currency VaRs; ignores diversification.
    pub total_value_at_risk_amount: f64,
}

// ──────────────────────────────────────────────────────────────────────────────
// Evaluation
// ──────────────────────────────────────────────────────────────────────────────

/// Size of the grid for `assets`, rejected when it exceeds `config.max_candidates`.
pub fn candidate_budget(assets: usize, config: &AnalysisConfig) -> AnalysisResult<u128> {
    let count = combination_count(assets, config.step_size, config.min_weight)?;
    if count > config.max_candidates as u128 {
        return Err(AnalysisError::invalid(format!(
            "{} candidate allocations exceed the limit of {}; raise the step size or reduce the asset list",
            if count == u128::MAX {
                "too many".to_string()
            } else {
                count.to_string()
            },
            config.max_candidates
        )));
    }
    Ok(count)
}

/// Evaluates and ranks every grid allocation for an aligned series.
///
/// Fails before enumerating when the grid is infeasible or larger than
/// `config.max_candidates`. The token is checked before each candidate; a
/// cancelled run returns [`AnalysisError::Cancelled`] and no partial table.
pub fn evaluate_candidates(
    series: &ReturnSeries,
    config: &AnalysisConfig,
    cancel: &CancellationToken,
) -> AnalysisResult<RankedTable> {
    config.validate()?;
    let assets = series.asset_count();
    candidate_budget(assets, config)?;

    let moments = ReturnMoments::from_series(series)?;
    let space = generate_weights(assets, config.step_size, config.min_weight)?;
    let params = RiskParams {
        confidence_multiplier: config.confidence_multiplier,
        total_contribution: config.total_contribution,
        risk_free_rate: config.risk_free_rate,
    };
    let periods = contribution_periods(series.period_count());

    let started = Instant::now();
    let candidates = space
        .into_par_iter()
        .map(|weights| {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }
            let risk = moments.evaluate(&weights, &params)?;
            let terminal_wealth = config.include_wealth_projection.then(|| {
                project_portfolio_wealth(
                    weights.as_slice(),
                    &moments.means,
                    config.total_contribution,
                    config.monthly_contribution,
                    periods,
                )
            });
            Ok(Candidate {
                weights,
                risk,
                terminal_wealth,
            })
        })
        .collect::<AnalysisResult<Vec<_>>>()?;

    debug!(
        "Evaluated {} candidates in {:.1} ms",
        candidates.len(),
        started.elapsed().as_secs_f64() * 1000.0
    );

    Ok(rank_candidates(
        series.symbols().to_vec(),
        candidates,
        config.sort_key,
    ))
}

/// Risk profile of each asset against the benchmark.
///
/// Each asset is aligned with the benchmark on its own, so one short history
/// does not truncate the others.
pub fn build_risk_report(
    positions: &[(PriceHistory, f64)],
    benchmark: &PriceHistory,
    confidence_multiplier: f64,
) -> AnalysisResult<RiskReport> {
    if positions.is_empty() {
        return Err(AnalysisError::invalid("at least one position is required"));
    }
    if !confidence_multiplier.is_finite() || confidence_multiplier < 0.0 {
        return Err(AnalysisError::invalid(format!(
            "confidence multiplier must be a non-negative number, got {}",
            confidence_multiplier
        )));
    }

    let mut assets = Vec::with_capacity(positions.len());
    for (history, contribution) in positions {
        if !contribution.is_finite() || *contribution < 0.0 {
            return Err(AnalysisError::invalid(format!(
                "contribution for {} must be a non-negative amount",
                history.symbol
            )));
        }
        let series = ReturnSeries::from_prices(std::slice::from_ref(history), Some(benchmark))?;
        if series.period_count() < 2 {
            return Err(AnalysisError::insufficient(&history.symbol));
        }
        let returns = series.asset(0);
        let bench = series
            .benchmark()
            .map(|b| b.returns.as_slice())
            .unwrap_or_default();

        let value_at_risk = risk::asset_value_at_risk(returns, confidence_multiplier);
        let mean_return = risk::mean(returns);
        let benchmark_mean_return = risk::mean(bench);
        assets.push(AssetRiskProfile {
            symbol: history.symbol.clone(),
            contribution: *contribution,
            periods: series.period_count(),
            mean_return,
            benchmark_mean_return,
            excess_mean_return: mean_return - benchmark_mean_return,
            volatility: risk::std_dev(returns),
            value_at_risk,
            value_at_risk_amount: value_at_risk.abs() * contribution,
            sharpe_ratio: risk::sharpe_ratio(returns),
            beta: risk::beta(returns, bench),
            correlation: risk::correlation(returns, bench),
            dates: series.dates().to_vec(),
            cumulative_variation: series.cumulative_variation(0),
            benchmark_cumulative_variation: series
                .benchmark_cumulative_variation()
                .unwrap_or_default(),
        });
    }

    let total_value_at_risk_amount = assets.iter().map(|a| a.value_at_risk_amount).sum();
    Ok(RiskReport {
        benchmark: benchmark.symbol.clone(),
        assets,
        total_value_at_risk_amount,
    })
}

/// A blocking task only fails to join when its runtime is shutting down;
/// panics are propagated to the caller.
fn join_error(e: tokio::task::JoinError) -> AnalysisError {
    if e.is_panic() {
        std::panic::resume_unwind(e.into_panic());
    }
    AnalysisError::Cancelled
}

/// Binds a price provider to the analysis pipeline.
///
/// Holds no per-request state; concurrent requests are independent.
pub struct AnalysisEngine<P> {
    provider: P,
    settings: ProviderSettings,
}

impl<P: PriceProvider> AnalysisEngine<P> {
    pub fn new(provider: P, settings: ProviderSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Fetches, aligns, evaluates and ranks the allocation grid for `request`.
    pub async fn run_allocation(
        &self,
        request: AnalysisRequest,
        cancel: CancellationToken,
    ) -> AnalysisResult<AnalysisResponse> {
        request.config.validate()?;
        let symbols = self.normalize_all(&request.symbols)?;
        if let Some(current) = &request.current_weights {
            if current.len() != symbols.len() {
                return Err(AnalysisError::invalid(format!(
                    "current portfolio has {} weights for {} assets",
                    current.len(),
                    symbols.len()
                )));
            }
        }
        // Fail fast on the grid before any network traffic.
        candidate_budget(symbols.len(), &request.config)?;

        info!(
            "Allocation analysis for {:?} ending {} ({} sessions)",
            symbols, request.reference_date, request.window
        );
        let histories = self
            .fetch_all(&symbols, request.reference_date, request.window)
            .await?;
        let series = ReturnSeries::from_prices(&histories, None)?;

        let config = request.config.clone();
        let risk_free_rate = config.risk_free_rate;
        let (series, mut table) = tokio::task::spawn_blocking(move || {
            let table = evaluate_candidates(&series, &config, &cancel)?;
            Ok::<_, AnalysisError>((series, table))
        })
        .await
        .map_err(join_error)??;

        table.symbols = table
            .symbols
            .iter()
            .map(|s| display_symbol(s, &self.settings.market_suffix))
            .collect();

        let nearest = match &request.current_weights {
            Some(current) => nearest_match(&table, current)?,
            None => None,
        };
        let market = market_portfolio(&table, risk_free_rate);

        info!(
            "Ranked {} candidates over {} periods",
            table.len(),
            series.period_count()
        );
        Ok(AnalysisResponse {
            start_date: series.dates().first().copied(),
            end_date: series.dates().last().copied(),
            periods: series.period_count(),
            table,
            nearest,
            market_portfolio: market,
        })
    }

    /// Per-asset risk against the benchmark plus the simple-sum VaR.
    pub async fn run_risk_report(&self, request: RiskReportRequest) -> AnalysisResult<RiskReport> {
        let raw: Vec<String> = request.positions.iter().map(|p| p.symbol.clone()).collect();
        let symbols = self.normalize_all(&raw)?;
        let benchmark_symbol = request
            .benchmark
            .as_deref()
            .map(|b| normalize_symbol(b, &self.settings.market_suffix))
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| self.settings.benchmark_symbol.clone());

        info!(
            "Risk report for {:?} against {} ending {}",
            symbols, benchmark_symbol, request.reference_date
        );
        let mut wanted = symbols.clone();
        wanted.push(benchmark_symbol);
        let mut histories = self
            .fetch_all(&wanted, request.reference_date, request.window)
            .await?;
        let benchmark = histories.pop().ok_or_else(|| AnalysisError::invalid("no benchmark"))?;

        let positions: Vec<(PriceHistory, f64)> = histories
            .into_iter()
            .zip(request.positions.iter().map(|p| p.contribution))
            .collect();
        let confidence = request.confidence_multiplier;
        let mut report = tokio::task::spawn_blocking(move || {
            build_risk_report(&positions, &benchmark, confidence)
        })
        .await
        .map_err(join_error)??;

        let suffix = &self.settings.market_suffix;
        for asset in &mut report.assets {
            asset.symbol = display_symbol(&asset.symbol, suffix);
        }
        report.benchmark = display_symbol(&report.benchmark, suffix);
        Ok(report)
    }

    fn normalize_all(&self, raw: &[String]) -> AnalysisResult<Vec<String>> {
        if raw.is_empty() {
            return Err(AnalysisError::invalid("at least one asset is required"));
        }
        let symbols: Vec<String> = raw
            .iter()
            .map(|s| normalize_symbol(s, &self.settings.market_suffix))
            .collect();
        // Symbols stay positional: weights and contributions are matched by index.
        if let Some(i) = symbols.iter().position(|s| s.is_empty()) {
            return Err(AnalysisError::invalid(format!(
                "asset {} has a blank symbol",
                i + 1
            )));
        }
        for (i, symbol) in symbols.iter().enumerate() {
            if symbols[..i].contains(symbol) {
                return Err(AnalysisError::invalid(format!("duplicate asset {}", symbol)));
            }
        }
        Ok(symbols)
    }

    /// Fetches every symbol concurrently, in order.
    async fn fetch_all(
        &self,
        symbols: &[String],
        end: NaiveDate,
        window: usize,
    ) -> AnalysisResult<Vec<PriceHistory>> {
        if window < 2 {
            return Err(AnalysisError::invalid(format!(
                "window must cover at least 2 sessions, got {}",
                window
            )));
        }
        try_join_all(symbols.iter().map(|symbol| async move {
            match self.provider.fetch_closes(symbol, end, window).await {
                Ok(Some(history)) => {
                    debug!("{}: {} closes", symbol, history.len());
                    Ok(history)
                }
                Ok(None) => {
                    warn!("No price data for {} up to {}", symbol, end);
                    Err(AnalysisError::insufficient(symbol.as_str()))
                }
                Err(source) => Err(AnalysisError::Provider {
                    symbol: symbol.clone(),
                    source,
                }),
            }
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ClosePoint, StaticProvider};
    use crate::ranker::SortKey;
    use anyhow::anyhow;
    use std::future::Future;

    fn end_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 28).unwrap()
    }

    fn mock_engine(symbols: &[&str], days: usize) -> AnalysisEngine<StaticProvider> {
        let symbols: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
        AnalysisEngine::new(
            StaticProvider::with_mock(&symbols, end_date(), days),
            ProviderSettings::default(),
        )
    }

    fn request(symbols: &[&str]) -> AnalysisRequest {
        AnalysisRequest {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            reference_date: end_date(),
            window: 60,
            current_weights: None,
            config: AnalysisConfig::default(),
        }
    }

    struct FailingProvider;

    impl PriceProvider for FailingProvider {
        fn fetch_closes(
            &self,
            _symbol: &str,
            _end: NaiveDate,
            _lookback: usize,
        ) -> impl Future<Output = anyhow::Result<Option<PriceHistory>>> + Send {
            async { Err(anyhow!("connection refused")) }
        }
    }

    #[tokio::test]
    async fn test_two_asset_allocation() {
        let engine = mock_engine(&["PETR4.SA", "VALE3.SA"], 80);
        let mut req = request(&["petr4", " vale3 "]);
        req.current_weights = Some(vec![0.3, 0.7]);

        let response = engine.run_allocation(req, CancellationToken::new()).await.unwrap();
        assert_eq!(response.table.symbols, vec!["PETR4", "VALE3"]);
        assert_eq!(response.table.len(), 19);
        assert_eq!(response.periods, 59);
        assert_eq!(response.end_date, Some(end_date()));

        for pair in response.table.candidates.windows(2) {
            assert!(pair[0].risk.value_at_risk <= pair[1].risk.value_at_risk);
        }
        let nearest = response.nearest.unwrap();
        assert!(nearest.distance < 1e-9);
        let hit = &response.table.candidates[nearest.index];
        assert!((hit.weights.as_slice()[0] - 0.3).abs() < 1e-9);
        assert!(response.market_portfolio.is_some());
        assert!(response.table.candidates.iter().all(|c| c.terminal_wealth.is_none()));
    }

    #[tokio::test]
    async fn test_wealth_projection_and_amount_sort() {
        let engine = mock_engine(&["AAA.SA", "BBB.SA", "CCC.SA"], 60);
        let mut req = request(&["AAA", "BBB", "CCC"]);
        req.config.step_size = 0.1;
        req.config.include_wealth_projection = true;
        req.config.sort_key = SortKey::ValueAtRiskAmount;

        let response = engine.run_allocation(req, CancellationToken::new()).await.unwrap();
        assert_eq!(response.table.len(), 36);
        for pair in response.table.candidates.windows(2) {
            assert!(pair[0].risk.value_at_risk_amount <= pair[1].risk.value_at_risk_amount);
        }

        // Rebuild the same aligned series to get the per-asset means.
        let symbols: Vec<String> = ["AAA.SA", "BBB.SA", "CCC.SA"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let provider = StaticProvider::with_mock(&symbols, end_date(), 60);
        let mut histories = Vec::new();
        for symbol in &symbols {
            histories.push(provider.fetch_closes(symbol, end_date(), 60).await.unwrap().unwrap());
        }
        let series = ReturnSeries::from_prices(&histories, None).unwrap();
        let moments = ReturnMoments::from_series(&series).unwrap();

        // 59 periods -> 2 monthly contributions on top of the initial capital.
        let periods = contribution_periods(response.periods);
        assert_eq!(periods, 2);
        for c in &response.table.candidates {
            let expected = project_portfolio_wealth(
                c.weights.as_slice(),
                &moments.means,
                100_000.0,
                2_000.0,
                periods,
            );
            let swapped = project_portfolio_wealth(
                c.weights.as_slice(),
                &moments.means,
                2_000.0,
                100_000.0,
                periods,
            );
            let wealth = c.terminal_wealth.unwrap();
            assert!((wealth - expected).abs() < 1e-6, "{} vs {}", wealth, expected);
            assert!((wealth - swapped).abs() > 1.0);
        }
    }

    #[test]
    fn test_terminal_wealth_uses_weighted_contributions() {
        let up = vec![0.01; 42];
        let flat: Vec<f64> = (0..42).map(|i| if i % 2 == 0 { 0.02 } else { -0.02 }).collect();
        let series =
            ReturnSeries::from_returns(vec!["A".into(), "B".into()], vec![up, flat]).unwrap();
        let config = AnalysisConfig {
            step_size: 0.25,
            include_wealth_projection: true,
            ..AnalysisConfig::default()
        };
        let table = evaluate_candidates(&series, &config, &CancellationToken::new()).unwrap();
        let row = table
            .candidates
            .iter()
            .find(|c| (c.weights.as_slice()[0] - 0.25).abs() < 1e-12)
            .unwrap();
        // A: c0 = 25 000, a = 500, r = 1%, T = 42 / 21 = 2 -> 26 517.55
        // B: c0 = 75 000, a = 1 500, r = 0 -> 78 000
        let wealth = row.terminal_wealth.unwrap();
        assert!((wealth - 104_517.55).abs() < 1e-6, "got {}", wealth);
    }

    #[tokio::test]
    async fn test_fine_step_rejected_before_fetch() {
        let engine = mock_engine(&[], 0);
        let mut req = request(&["A1", "A2", "A3", "A4", "A5", "A6"]);
        req.config.step_size = 1e-9;
        let err = engine
            .run_allocation(req, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidParameters(_)));
        assert!(err.to_string().contains("too many"));
    }

    #[tokio::test]
    async fn test_blank_symbol_rejected() {
        let engine = mock_engine(&["PETR4.SA", "^BVSP"], 60);
        let err = engine
            .run_risk_report(RiskReportRequest {
                positions: vec![
                    Position {
                        symbol: "  ".into(),
                        contribution: 1.0,
                    },
                    Position {
                        symbol: "PETR4".into(),
                        contribution: 10_000.0,
                    },
                ],
                reference_date: end_date(),
                window: 40,
                benchmark: None,
                confidence_multiplier: 1.65,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidParameters(_)));

        let mut req = request(&["", "PETR4"]);
        req.current_weights = Some(vec![0.5, 0.5]);
        let err = engine
            .run_allocation(req, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn test_missing_symbol_is_insufficient_data() {
        let engine = mock_engine(&["PETR4.SA"], 60);
        let err = engine
            .run_allocation(request(&["PETR4", "XXXX3"]), CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            AnalysisError::InsufficientData { symbol } => assert_eq!(symbol, "XXXX3.SA"),
            other => panic!("expected InsufficientData, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_provider_failure_is_wrapped() {
        let engine = AnalysisEngine::new(FailingProvider, ProviderSettings::default());
        let err = engine
            .run_allocation(request(&["PETR4"]), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Provider { .. }));
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn test_infeasible_grid_fails_before_fetch() {
        // Nothing is mocked, so reaching the provider would give InsufficientData.
        let engine = mock_engine(&[], 0);
        let symbols: Vec<String> = (0..21).map(|i| format!("A{}", i)).collect();
        let refs: Vec<&str> = symbols.iter().map(|s| s.as_str()).collect();
        let err = engine
            .run_allocation(request(&refs), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InfeasibleParameters { assets: 21, .. }));
    }

    #[tokio::test]
    async fn test_duplicate_symbols_rejected() {
        let engine = mock_engine(&["PETR4.SA"], 60);
        let err = engine
            .run_allocation(request(&["PETR4", "petr4.sa"]), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidParameters(_)));
    }

    #[test]
    fn test_cancelled_run_discards_results() {
        let series = ReturnSeries::from_returns(
            vec!["A".into(), "B".into()],
            vec![vec![0.01, -0.02, 0.03], vec![0.0, 0.01, -0.01]],
        )
        .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            evaluate_candidates(&series, &AnalysisConfig::default(), &cancel),
            Err(AnalysisError::Cancelled)
        ));
    }

    #[test]
    fn test_candidate_limit() {
        let series = ReturnSeries::from_returns(
            vec!["A".into(), "B".into(), "C".into()],
            vec![vec![0.01, -0.02, 0.03]; 3],
        )
        .unwrap();
        let config = AnalysisConfig {
            max_candidates: 100,
            ..AnalysisConfig::default()
        };
        // 3 assets at 5%: C(19, 2) = 171 candidates.
        assert!(matches!(
            evaluate_candidates(&series, &config, &CancellationToken::new()),
            Err(AnalysisError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_evaluation_matches_direct_formulas() {
        let series = ReturnSeries::from_returns(
            vec!["A".into(), "B".into()],
            vec![
                vec![0.01, -0.02, 0.03, 0.005],
                vec![0.002, 0.01, -0.01, 0.0],
            ],
        )
        .unwrap();
        let config = AnalysisConfig {
            step_size: 0.25,
            ..AnalysisConfig::default()
        };
        let table = evaluate_candidates(&series, &config, &CancellationToken::new()).unwrap();
        assert_eq!(table.len(), 3);
        for c in &table.candidates {
            let w = c.weights.as_slice();
            let r = w[0] * risk::mean(series.asset(0)) + w[1] * risk::mean(series.asset(1));
            assert!((c.risk.expected_return - r).abs() < 1e-12);
            assert!(
                (c.risk.value_at_risk_amount - c.risk.value_at_risk.abs() * 100_000.0).abs() < 1e-6
            );
        }
    }

    fn constant_history(symbol: &str, days: usize) -> PriceHistory {
        let mock = PriceHistory::new_mock(symbol, end_date(), days, 7);
        PriceHistory::new(
            symbol,
            mock.history
                .iter()
                .map(|p| ClosePoint {
                    date: p.date,
                    close: 50.0,
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_risk_report_sums_positions() {
        let engine = mock_engine(&["PETR4.SA", "VALE3.SA", "^BVSP"], 120);
        let report = engine
            .run_risk_report(RiskReportRequest {
                positions: vec![
                    Position {
                        symbol: "PETR4".into(),
                        contribution: 10_000.0,
                    },
                    Position {
                        symbol: "VALE3".into(),
                        contribution: 5_000.0,
                    },
                ],
                reference_date: end_date(),
                window: 100,
                benchmark: None,
                confidence_multiplier: 1.65,
            })
            .await
            .unwrap();

        assert_eq!(report.benchmark, "^BVSP");
        assert_eq!(report.assets.len(), 2);
        assert_eq!(report.assets[0].symbol, "PETR4");
        let sum: f64 = report.assets.iter().map(|a| a.value_at_risk_amount).sum();
        assert!((report.total_value_at_risk_amount - sum).abs() < 1e-9);
        for asset in &report.assets {
            assert_eq!(asset.periods, 99);
            assert!(
                (asset.value_at_risk_amount - asset.value_at_risk.abs() * asset.contribution).abs()
                    < 1e-9
            );
            assert!(asset.beta.value().is_some());
            assert!(
                (asset.excess_mean_return - (asset.mean_return - asset.benchmark_mean_return)).abs()
                    < 1e-15
            );
            assert_eq!(asset.cumulative_variation.len(), 100);
            assert_eq!(asset.cumulative_variation[0], 0.0);
        }
    }

    #[test]
    fn test_benchmark_mean_and_excess() {
        let day = |d: u32| NaiveDate::from_ymd_opt(2024, 3, d).unwrap();
        let asset = PriceHistory::new(
            "AAA",
            vec![
                ClosePoint { date: day(4), close: 100.0 },
                ClosePoint { date: day(5), close: 110.0 },
                ClosePoint { date: day(6), close: 121.0 },
            ],
        );
        let bench = PriceHistory::new(
            "^IDX",
            vec![
                ClosePoint { date: day(4), close: 1000.0 },
                ClosePoint { date: day(5), close: 1020.0 },
                ClosePoint { date: day(6), close: 1020.0 },
            ],
        );
        let report = build_risk_report(&[(asset, 1_000.0)], &bench, 1.65).unwrap();
        let profile = &report.assets[0];
        // asset: +10%, +10%; benchmark: +2%, 0%
        assert!((profile.mean_return - 0.1).abs() < 1e-12);
        assert!((profile.benchmark_mean_return - 0.01).abs() < 1e-12);
        assert!((profile.excess_mean_return - 0.09).abs() < 1e-12);
    }

    #[test]
    fn test_constant_benchmark_gives_undefined_beta() {
        let asset = PriceHistory::new_mock("AAA", end_date(), 30, 3);
        let bench = constant_history("^FLAT", 30);
        let report = build_risk_report(&[(asset, 1_000.0)], &bench, 1.65).unwrap();
        let profile = &report.assets[0];
        assert!(profile.beta.is_undefined());
        assert!(profile.correlation.is_undefined());
        assert!(profile.sharpe_ratio.value().is_some());

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["assets"][0]["beta"].is_null());
    }

    #[test]
    fn test_request_json_defaults() {
        let req: AnalysisRequest = serde_json::from_str(
            r#"{"symbols":["PETR4","VALE3"],"referenceDate":"2024-06-28","stepSize":0.1}"#,
        )
        .unwrap();
        assert_eq!(req.window, DEFAULT_WINDOW);
        assert_eq!(req.config.step_size, 0.1);
        assert_eq!(req.config.sort_key, SortKey::ValueAtRisk);
        assert!(req.current_weights.is_none());
    }
}
