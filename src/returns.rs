use crate::data::PriceHistory;
use crate::error::{AnalysisError, AnalysisResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

// ──────────────────────────────────────────────────────────────────────────────
// Date-aligned periodic returns
// ──────────────────────────────────────────────────────────────────────────────

/// Simple returns for N assets (and optionally a benchmark) on one shared,
/// gap-free period index.
///
/// `dates[k]` is the session that closes period `k`; the first intersected
/// session only anchors the first return.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReturnSeries {
    symbols: Vec<String>,
    dates: Vec<NaiveDate>,
    /// `returns[asset][period]`
    returns: Vec<Vec<f64>>,
    benchmark: Option<BenchmarkReturns>,
    /// Aligned closes, one more than the number of periods. Kept for the
    /// cumulative-variation paths of the single-asset report.
    closes: Vec<Vec<f64>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReturns {
    pub symbol: String,
    pub returns: Vec<f64>,
    pub closes: Vec<f64>,
}

impl ReturnSeries {
    /// Intersects the dates of every history (benchmark included), then
    /// computes `p_t / p_{t-1} - 1` on the common sessions.
    pub fn from_prices(
        assets: &[PriceHistory],
        benchmark: Option<&PriceHistory>,
    ) -> AnalysisResult<Self> {
        if assets.is_empty() {
            return Err(AnalysisError::invalid("at least one asset is required"));
        }
        for history in assets.iter().chain(benchmark) {
            if history.is_empty() {
                return Err(AnalysisError::insufficient(&history.symbol));
            }
        }

        let mut common: BTreeSet<NaiveDate> = assets[0].history.iter().map(|p| p.date).collect();
        for history in assets[1..].iter().chain(benchmark) {
            let dates: BTreeSet<NaiveDate> = history.history.iter().map(|p| p.date).collect();
            common = common.intersection(&dates).copied().collect();
        }

        if common.len() < 2 {
            // Name the series that shrank the intersection the most.
            let shortest = assets
                .iter()
                .chain(benchmark)
                .min_by_key(|h| h.len())
                .map(|h| h.symbol.clone())
                .unwrap_or_default();
            warn!(
                "Only {} common sessions across {} series; shortest is {}",
                common.len(),
                assets.len() + benchmark.is_some() as usize,
                shortest
            );
            return Err(AnalysisError::insufficient(shortest));
        }

        let aligned_dates: Vec<NaiveDate> = common.into_iter().collect();
        let align = |history: &PriceHistory| -> Vec<f64> {
            let by_date: BTreeMap<NaiveDate, f64> =
                history.history.iter().map(|p| (p.date, p.close)).collect();
            aligned_dates
                .iter()
                .filter_map(|d| by_date.get(d).copied())
                .collect()
        };

        let closes: Vec<Vec<f64>> = assets.iter().map(|h| align(h)).collect();
        let returns = closes.iter().map(|c| simple_returns(c)).collect();
        let benchmark = benchmark.map(|h| {
            let closes = align(h);
            BenchmarkReturns {
                symbol: h.symbol.clone(),
                returns: simple_returns(&closes),
                closes,
            }
        });

        debug!(
            "Aligned {} assets on {} sessions ({} return periods)",
            assets.len(),
            aligned_dates.len(),
            aligned_dates.len() - 1
        );

        Ok(Self {
            symbols: assets.iter().map(|h| h.symbol.clone()).collect(),
            dates: aligned_dates[1..].to_vec(),
            returns,
            benchmark,
            closes,
        })
    }

    /// Builds a series directly from return columns; no benchmark, synthetic dates.
    pub fn from_returns(symbols: Vec<String>, returns: Vec<Vec<f64>>) -> AnalysisResult<Self> {
        Self::from_returns_with_benchmark(symbols, returns, None)
    }

    pub fn from_returns_with_benchmark(
        symbols: Vec<String>,
        returns: Vec<Vec<f64>>,
        benchmark: Option<(String, Vec<f64>)>,
    ) -> AnalysisResult<Self> {
        if symbols.len() != returns.len() || symbols.is_empty() {
            return Err(AnalysisError::invalid(
                "one return column per symbol is required",
            ));
        }
        let periods = returns[0].len();
        for (symbol, column) in symbols.iter().zip(&returns) {
            if column.is_empty() {
                return Err(AnalysisError::insufficient(symbol));
            }
            if column.len() != periods {
                return Err(AnalysisError::invalid(format!(
                    "return column for {} has {} periods, expected {}",
                    symbol,
                    column.len(),
                    periods
                )));
            }
        }
        if let Some((symbol, column)) = &benchmark {
            if column.len() != periods {
                return Err(AnalysisError::insufficient(symbol));
            }
        }

        let start = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default();
        let dates = (0..periods)
            .map(|k| start + chrono::Duration::days(k as i64 + 1))
            .collect();
        let closes = returns.iter().map(|r| closes_from_returns(r)).collect();
        let benchmark = benchmark.map(|(symbol, returns)| BenchmarkReturns {
            symbol,
            closes: closes_from_returns(&returns),
            returns,
        });

        Ok(Self {
            symbols,
            dates,
            returns,
            benchmark,
            closes,
        })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn asset_count(&self) -> usize {
        self.returns.len()
    }

    pub fn period_count(&self) -> usize {
        self.dates.len()
    }

    pub fn asset(&self, index: usize) -> &[f64] {
        &self.returns[index]
    }

    pub fn columns(&self) -> &[Vec<f64>] {
        &self.returns
    }

    pub fn benchmark(&self) -> Option<&BenchmarkReturns> {
        self.benchmark.as_ref()
    }

    /// `p_t / p_0 - 1` for every aligned session of the asset.
    pub fn cumulative_variation(&self, index: usize) -> Vec<f64> {
        cumulative_variation(&self.closes[index])
    }

    pub fn benchmark_cumulative_variation(&self) -> Option<Vec<f64>> {
        self.benchmark.as_ref().map(|b| cumulative_variation(&b.closes))
    }
}

fn simple_returns(closes: &[f64]) -> Vec<f64> {
    closes.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

fn closes_from_returns(returns: &[f64]) -> Vec<f64> {
    let mut closes = Vec::with_capacity(returns.len() + 1);
    closes.push(1.0);
    for r in returns {
        let last = closes[closes.len() - 1];
        closes.push(last * (1.0 + r));
    }
    closes
}

fn cumulative_variation(closes: &[f64]) -> Vec<f64> {
    match closes.first() {
        Some(&base) if base != 0.0 => closes.iter().map(|c| c / base - 1.0).collect(),
        _ => vec![0.0; closes.len()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ClosePoint;

    fn history(symbol: &str, points: &[(u32, f64)]) -> PriceHistory {
        PriceHistory::new(
            symbol,
            points
                .iter()
                .map(|&(day, close)| ClosePoint {
                    date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
                    close,
                })
                .collect(),
        )
    }

    #[test]
    fn test_alignment_intersects_dates() {
        let a = history("A", &[(1, 10.0), (4, 11.0), (5, 12.1), (6, 12.1)]);
        let b = history("B", &[(1, 20.0), (5, 22.0), (6, 44.0), (7, 1.0)]);
        let bench = history("^BVSP", &[(1, 100.0), (4, 90.0), (5, 110.0), (6, 99.0)]);

        let series = ReturnSeries::from_prices(&[a, b], Some(&bench)).unwrap();
        assert_eq!(series.period_count(), 2);
        assert_eq!(
            series.dates(),
            &[
                NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 6).unwrap()
            ]
        );
        assert!((series.asset(0)[0] - 0.21).abs() < 1e-12);
        assert!((series.asset(0)[1] - 0.0).abs() < 1e-12);
        assert!((series.asset(1)[0] - 0.1).abs() < 1e-12);
        assert!((series.asset(1)[1] - 1.0).abs() < 1e-12);

        let bench = series.benchmark().unwrap();
        assert_eq!(bench.returns.len(), 2);
        assert!((bench.returns[0] - 0.1).abs() < 1e-12);
        assert!((bench.returns[1] + 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_empty_history_is_insufficient() {
        let a = history("A", &[(1, 10.0), (2, 11.0)]);
        let empty = PriceHistory::new("B", vec![]);
        match ReturnSeries::from_prices(&[a, empty], None) {
            Err(AnalysisError::InsufficientData { symbol }) => assert_eq!(symbol, "B"),
            other => panic!("expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn test_disjoint_dates_are_insufficient() {
        let a = history("A", &[(1, 10.0), (2, 11.0), (3, 12.0)]);
        let b = history("B", &[(4, 10.0), (5, 11.0)]);
        assert!(matches!(
            ReturnSeries::from_prices(&[a, b], None),
            Err(AnalysisError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_cumulative_variation() {
        let a = history("A", &[(1, 10.0), (2, 12.0), (3, 9.0)]);
        let series = ReturnSeries::from_prices(&[a], None).unwrap();
        let path = series.cumulative_variation(0);
        assert_eq!(path.len(), 3);
        assert!((path[1] - 0.2).abs() < 1e-12);
        assert!((path[2] + 0.1).abs() < 1e-12);
        assert!(series.benchmark_cumulative_variation().is_none());
    }

    #[test]
    fn test_from_returns_validates_shape() {
        let ok = ReturnSeries::from_returns(
            vec!["A".into(), "B".into()],
            vec![vec![0.01, 0.02], vec![0.0, -0.01]],
        )
        .unwrap();
        assert_eq!(ok.period_count(), 2);
        assert_eq!(ok.asset_count(), 2);

        assert!(
            ReturnSeries::from_returns(vec!["A".into(), "B".into()], vec![vec![0.01], vec![]])
                .is_err()
        );
        assert!(
            ReturnSeries::from_returns(
                vec!["A".into(), "B".into()],
                vec![vec![0.01], vec![0.01, 0.02]]
            )
            .is_err()
        );
    }
}
