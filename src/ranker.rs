use crate::error::{AnalysisError, AnalysisResult};
use crate::risk::{Ratio, RiskMetrics};
use crate::weights::WeightVector;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ──────────────────────────────────────────────────────────────────────────────
// Candidate table ordering and lookups
// ──────────────────────────────────────────────────────────────────────────────

/// Column the candidate table is ordered by, ascending.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortKey {
    /// Fractional VaR (`R - z·σ`).
    #[default]
    #[serde(rename = "var")]
    ValueAtRisk,
    /// VaR in currency (`|VaR| · total`).
    #[serde(rename = "var-amount")]
    ValueAtRiskAmount,
}

impl SortKey {
    fn value(self, risk: &RiskMetrics) -> f64 {
        match self {
            SortKey::ValueAtRisk => risk.value_at_risk,
            SortKey::ValueAtRiskAmount => risk.value_at_risk_amount,
        }
    }
}

/// One evaluated allocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub weights: WeightVector,
    #[serde(flatten)]
    pub risk: RiskMetrics,
    /// Present only when wealth projection was requested.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub terminal_wealth: Option<f64>,
}

/// Evaluated candidates for one asset list, ordered by `sort_key`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedTable {
    pub symbols: Vec<String>,
    pub sort_key: SortKey,
    pub candidates: Vec<Candidate>,
}

impl RankedTable {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Candidate> {
        self.candidates.get(index)
    }
}

/// Nearest candidate to a query allocation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearestMatch {
    pub index: usize,
    pub distance: f64,
}

/// Sorts candidates ascending by `sort_key`.
///
/// The sort is stable, so candidates with equal keys keep the lexicographic
/// order of their weight vectors.
pub fn rank_candidates(
    symbols: Vec<String>,
    mut candidates: Vec<Candidate>,
    sort_key: SortKey,
) -> RankedTable {
    candidates.sort_by(|a, b| sort_key.value(&a.risk).total_cmp(&sort_key.value(&b.risk)));
    RankedTable {
        symbols,
        sort_key,
        candidates,
    }
}

/// Candidate closest to `query` in Euclidean distance; `None` on an empty table.
///
/// The first of several equidistant candidates wins.
pub fn nearest_match(table: &RankedTable, query: &[f64]) -> AnalysisResult<Option<NearestMatch>> {
    if query.len() != table.symbols.len() {
        return Err(AnalysisError::invalid(format!(
            "query has {} weights for {} assets",
            query.len(),
            table.symbols.len()
        )));
    }

    let best = table
        .candidates
        .iter()
        .enumerate()
        .map(|(index, c)| NearestMatch {
            index,
            distance: c.weights.distance(query),
        })
        .fold(None::<NearestMatch>, |best, m| match best {
            Some(b) if b.distance.total_cmp(&m.distance) != Ordering::Greater => Some(b),
            _ => Some(m),
        });
    Ok(best)
}

/// Index of the candidate with the highest `(R - r_f) / σ`.
///
/// Candidates with zero volatility have no defined ratio and are skipped;
/// `None` when no candidate qualifies.
pub fn market_portfolio(table: &RankedTable, risk_free_rate: f64) -> Option<usize> {
    table
        .candidates
        .iter()
        .enumerate()
        .filter_map(|(i, c)| {
            Ratio::checked(c.risk.expected_return - risk_free_rate, c.risk.volatility)
                .value()
                .map(|s| (i, s))
        })
        .fold(None::<(usize, f64)>, |best, (i, s)| match best {
            Some((_, bs)) if bs >= s => best,
            _ => Some((i, s)),
        })
        .map(|(i, _)| i)
}
