use crate::error::{AnalysisError, AnalysisResult};
use crate::returns::ReturnSeries;
use crate::weights::WeightVector;
use serde::{Deserialize, Serialize};

// ──────────────────────────────────────────────────────────────────────────────
// Covariance-based portfolio risk and single-asset statistics
// ──────────────────────────────────────────────────────────────────────────────
// All inputs and outputs are fractional returns. Percent scaling belongs to
// the presentation layer.

/// A ratio whose denominator may be zero.
///
/// Serialises as a number, or `null` when undefined.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum Ratio {
    Value(f64),
    Undefined,
}

/// A standard deviation at or below this is treated as zero.
const ZERO_DISPERSION: f64 = 1e-12;

fn is_dispersed(std_dev: f64) -> bool {
    std_dev.is_finite() && std_dev > ZERO_DISPERSION
}

impl Ratio {
    /// `numerator / std_dev`, undefined when the standard deviation is zero
    /// (within accumulated rounding of a constant series).
    pub fn checked(numerator: f64, std_dev: f64) -> Self {
        if is_dispersed(std_dev) {
            Ratio::Value(numerator / std_dev)
        } else {
            Ratio::Undefined
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Ratio::Value(v) => Some(v),
            Ratio::Undefined => None,
        }
    }

    pub fn is_undefined(self) -> bool {
        matches!(self, Ratio::Undefined)
    }
}

impl From<Option<f64>> for Ratio {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Ratio::Undefined, Ratio::Value)
    }
}

impl From<Ratio> for Option<f64> {
    fn from(value: Ratio) -> Self {
        value.value()
    }
}

impl std::fmt::Display for Ratio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match (self, f.precision()) {
            (Ratio::Value(v), Some(p)) => format!("{:.*}", p, v),
            (Ratio::Value(v), None) => v.to_string(),
            (Ratio::Undefined, _) => "n/a".to_string(),
        };
        write!(f, "{:>width$}", text, width = f.width().unwrap_or(0))
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Sample statistics
// ──────────────────────────────────────────────────────────────────────────────

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample covariance with an `n - 1` denominator; zero for fewer than two points.
pub fn covariance(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let mean_a = mean(&a[..n]);
    let mean_b = mean(&b[..n]);
    let sum: f64 = a[..n]
        .iter()
        .zip(&b[..n])
        .map(|(x, y)| (x - mean_a) * (y - mean_b))
        .sum();
    sum / (n as f64 - 1.0)
}

pub fn variance(values: &[f64]) -> f64 {
    covariance(values, values)
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Mean vector and covariance matrix of the aligned return columns.
///
/// Computed once per request and shared read-only by every candidate
/// evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReturnMoments {
    pub means: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,
    pub periods: usize,
}

impl ReturnMoments {
    pub fn from_series(series: &ReturnSeries) -> AnalysisResult<Self> {
        let columns = series.columns();
        let n = columns.len();
        let periods = series.period_count();
        if periods < 2 {
            let symbol = series.symbols().first().cloned().unwrap_or_default();
            return Err(AnalysisError::insufficient(symbol));
        }

        let means: Vec<f64> = columns.iter().map(|c| mean(c)).collect();

        let mut cov = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in i..n {
                let mut sum = 0.0;
                for k in 0..periods {
                    let di = columns[i][k] - means[i];
                    let dj = columns[j][k] - means[j];
                    sum += di * dj;
                }
                let covariance = sum / (periods as f64 - 1.0);
                cov[i][j] = covariance;
                cov[j][i] = covariance;
            }
        }

        Ok(Self {
            means,
            covariance: cov,
            periods,
        })
    }

    pub fn asset_count(&self) -> usize {
        self.means.len()
    }

    /// Parametric risk of one allocation.
    pub fn evaluate(&self, weights: &WeightVector, params: &RiskParams) -> AnalysisResult<RiskMetrics> {
        let w = weights.as_slice();
        if w.len() != self.asset_count() {
            return Err(AnalysisError::invalid(format!(
                "weight vector has {} entries for {} assets",
                w.len(),
                self.asset_count()
            )));
        }

        let expected_return = portfolio_return(w, &self.means);
        // Rounding can push a zero variance slightly negative.
        let volatility = portfolio_variance(w, &self.covariance).max(0.0).sqrt();
        let value_at_risk = parametric_var(expected_return, volatility, params.confidence_multiplier);

        Ok(RiskMetrics {
            expected_return,
            volatility,
            value_at_risk,
            value_at_risk_amount: value_at_risk.abs() * params.total_contribution,
            sharpe_ratio: Ratio::checked(expected_return - params.risk_free_rate, volatility),
        })
    }
}

/// Inputs shared by every candidate evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RiskParams {
    pub confidence_multiplier: f64,
    pub total_contribution: f64,
    pub risk_free_rate: f64,
}

/// Risk of one weight vector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskMetrics {
    /// `w · μ`, per period.
    pub expected_return: f64,
    /// `sqrt(wᵀ Σ w)`, per period.
    pub volatility: f64,
    /// `R - z·σ` as a fraction; negative values are losses.
    pub value_at_risk: f64,
    /// `|VaR| · total contribution`.
    pub value_at_risk_amount: f64,
    /// `(R - r_f) / σ`.
    pub sharpe_ratio: Ratio,
}

pub fn portfolio_return(weights: &[f64], means: &[f64]) -> f64 {
    weights.iter().zip(means.iter()).map(|(w, r)| w * r).sum()
}

pub fn portfolio_variance(weights: &[f64], cov: &[Vec<f64>]) -> f64 {
    let n = weights.len();
    let mut var = 0.0;
    for i in 0..n {
        for j in 0..n {
            var += weights[i] * weights[j] * cov[i][j];
        }
    }
    var
}

pub fn parametric_var(expected_return: f64, volatility: f64, z: f64) -> f64 {
    expected_return - z * volatility
}

// ──────────────────────────────────────────────────────────────────────────────
// Single-asset statistics
// ──────────────────────────────────────────────────────────────────────────────

/// `mean / std`, undefined for a constant series.
pub fn sharpe_ratio(returns: &[f64]) -> Ratio {
    Ratio::checked(mean(returns), std_dev(returns))
}

/// `Cov(asset, benchmark) / Var(benchmark)`, undefined for a constant benchmark.
pub fn beta(asset: &[f64], benchmark: &[f64]) -> Ratio {
    if !is_dispersed(std_dev(benchmark)) {
        return Ratio::Undefined;
    }
    Ratio::Value(covariance(asset, benchmark) / variance(benchmark))
}

/// Pearson correlation, undefined when either side is constant.
pub fn correlation(a: &[f64], b: &[f64]) -> Ratio {
    let (std_a, std_b) = (std_dev(a), std_dev(b));
    if !is_dispersed(std_a) || !is_dispersed(std_b) {
        return Ratio::Undefined;
    }
    Ratio::Value(covariance(a, b) / (std_a * std_b))
}

/// Parametric VaR of a single return column.
pub fn asset_value_at_risk(returns: &[f64], z: f64) -> f64 {
    parametric_var(mean(returns), std_dev(returns), z)
}
