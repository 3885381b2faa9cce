use crate::config::WEIGHT_TOLERANCE;
use crate::error::{AnalysisError, AnalysisResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

// ──────────────────────────────────────────────────────────────────────────────
// Discrete weight grid enumeration
// ──────────────────────────────────────────────────────────────────────────────
// Every admissible allocation is a composition of `total = round(1/step)`
// integer units into N parts, each holding at least `min_units`. Tuples are
// deduplicated as integers and only converted to fractions at the end.

/// One allocation: a fractional weight per asset, in the request's asset order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightVector(Vec<f64>);

impl WeightVector {
    /// Wraps caller-supplied weights (e.g. a "current portfolio" query).
    ///
    /// No simplex check is applied here: nearest-match queries are allowed to
    /// sit off the grid.
    pub fn new(weights: Vec<f64>) -> Self {
        Self(weights)
    }

    /// Builds weights from percentages, e.g. `[30.0, 70.0]`.
    pub fn from_percentages(percentages: &[f64]) -> Self {
        Self(percentages.iter().map(|p| p / 100.0).collect())
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn min(&self) -> f64 {
        self.0.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn distance(&self, other: &[f64]) -> f64 {
        self.0
            .iter()
            .zip(other.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

/// Unit bookkeeping for one (N, step, min weight) grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridUnits {
    pub total: u32,
    pub min_units: u32,
    pub remainder: u32,
}

/// Resolves the unit counts, failing before any enumeration if the floor
/// cannot be honoured by every asset.
pub fn grid_units(assets: usize, step: f64, min_weight: f64) -> AnalysisResult<GridUnits> {
    if assets == 0 {
        return Err(AnalysisError::invalid("at least one asset is required"));
    }
    if !step.is_finite() || step <= 0.0 || step > 1.0 {
        return Err(AnalysisError::invalid(format!(
            "step size must be in (0, 1], got {}",
            step
        )));
    }
    if !min_weight.is_finite() || !(0.0..1.0).contains(&min_weight) {
        return Err(AnalysisError::invalid(format!(
            "min weight must be in [0, 1), got {}",
            min_weight
        )));
    }

    let units = (1.0 / step).round();
    if units > u32::MAX as f64 {
        return Err(AnalysisError::invalid(format!(
            "step size {} is too fine for the unit grid",
            step
        )));
    }
    let total = units as u32;
    let min_units = (min_weight / step - WEIGHT_TOLERANCE).ceil().max(0.0) as u32;
    let needed = assets as u64 * min_units as u64;

    if needed > total as u64 {
        return Err(AnalysisError::InfeasibleParameters {
            assets,
            step,
            min_weight,
        });
    }

    Ok(GridUnits {
        total,
        min_units,
        remainder: total - needed as u32,
    })
}

/// Size of the combination space without enumerating it: C(remainder + N - 1, N - 1).
///
/// Saturates at `u128::MAX` when the count does not fit.
pub fn combination_count(assets: usize, step: f64, min_weight: f64) -> AnalysisResult<u128> {
    let units = grid_units(assets, step, min_weight)?;
    Ok(binomial(units.remainder as u128 + assets as u128 - 1, assets as u128 - 1)
        .unwrap_or(u128::MAX))
}

/// `None` on overflow. Each partial product is C(n, i+1), so the division is exact.
fn binomial(n: u128, k: u128) -> Option<u128> {
    let k = k.min(n - k);
    (0..k).try_fold(1u128, |acc, i| acc.checked_mul(n - i).map(|v| v / (i + 1)))
}

/// Enumerates the full combination space, sorted lexicographically.
pub fn generate_weights(
    assets: usize,
    step: f64,
    min_weight: f64,
) -> AnalysisResult<Vec<WeightVector>> {
    let units = grid_units(assets, step, min_weight)?;
    let compositions = generate_unit_compositions(assets, units);

    let total = units.total as f64;
    let weights: Vec<WeightVector> = compositions
        .into_iter()
        .map(|parts| WeightVector(parts.into_iter().map(|u| u as f64 / total).collect()))
        .collect();

    info!(
        "Generated {} weight combinations for {} assets (step {:.2}%, floor {:.2}%)",
        weights.len(),
        assets,
        step * 100.0,
        min_weight * 100.0
    );
    Ok(weights)
}

/// Integer compositions of `units.total` into `assets` parts, each `>= units.min_units`.
///
/// Multiset partitions of the remainder are enumerated first, then every
/// distinct ordering of each. The `BTreeSet` collapses repeated orderings and
/// yields the canonical lexicographic order.
pub fn generate_unit_compositions(assets: usize, units: GridUnits) -> BTreeSet<Vec<u32>> {
    let mut out = BTreeSet::new();
    let mut partitions = Vec::new();
    let mut current = Vec::with_capacity(assets);
    collect_partitions(units.remainder, assets, units.remainder, &mut current, &mut partitions);
    debug!(
        "{} base partitions of {} units into {} parts",
        partitions.len(),
        units.remainder,
        assets
    );

    for partition in partitions {
        let mut parts: Vec<u32> = partition.iter().map(|p| p + units.min_units).collect();
        parts.sort_unstable();
        loop {
            out.insert(parts.clone());
            if !next_permutation(&mut parts) {
                break;
            }
        }
    }
    out
}

/// Non-increasing sequences of exactly `slots` non-negative parts summing to `remaining`.
fn collect_partitions(
    remaining: u32,
    slots: usize,
    max_part: u32,
    current: &mut Vec<u32>,
    out: &mut Vec<Vec<u32>>,
) {
    if slots == 0 {
        if remaining == 0 {
            out.push(current.clone());
        }
        return;
    }
    // Each remaining slot can hold at most `max_part`.
    if remaining as u64 > max_part as u64 * slots as u64 {
        return;
    }
    for part in (0..=remaining.min(max_part)).rev() {
        current.push(part);
        collect_partitions(remaining - part, slots - 1, part, current, out);
        current.pop();
    }
}

/// Advances to the next lexicographic permutation; false once the sequence is descending.
fn next_permutation(parts: &mut [u32]) -> bool {
    if parts.len() < 2 {
        return false;
    }
    let mut i = parts.len() - 1;
    while i > 0 && parts[i - 1] >= parts[i] {
        i -= 1;
    }
    if i == 0 {
        return false;
    }
    let mut j = parts.len() - 1;
    while parts[j] <= parts[i - 1] {
        j -= 1;
    }
    parts.swap(i - 1, j);
    parts[i..].reverse();
    true
}
