use crate::error::{AnalysisError, AnalysisResult};
use crate::ranker::SortKey;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

pub fn init_cpu_parallelism() {
    RAYON_INIT.get_or_init(|| {
        let num_threads = num_cpus::get().max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!(
                "Initialized Rayon thread pool with {} threads (all logical CPU cores)",
                num_threads
            ),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}

// ── Allocation grid ─────────────────────────────────────────────────────────
/// Weight granularity (5% steps).
pub const DEFAULT_STEP_SIZE: f64 = 0.05;
/// Floor applied to every asset in every candidate.
pub const MIN_WEIGHT: f64 = 0.05;
/// Upper bound on the number of candidates a single request may enumerate.
pub const DEFAULT_MAX_CANDIDATES: usize = 2_000_000;
/// Tolerance for weight sums and unit conversions.
pub const WEIGHT_TOLERANCE: f64 = 1e-9;

// ── Risk ────────────────────────────────────────────────────────────────────
/// One-tailed 95% z-score used for parametric VaR.
pub const DEFAULT_CONFIDENCE_MULTIPLIER: f64 = 1.65;
/// Per-period risk-free rate used for the market portfolio Sharpe ratio.
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.0;

// ── Contributions ───────────────────────────────────────────────────────────
pub const DEFAULT_TOTAL_CONTRIBUTION: f64 = 100_000.0;
pub const DEFAULT_MONTHLY_CONTRIBUTION: f64 = 2_000.0;
/// Trading sessions per month used to turn observations into contribution periods.
pub const TRADING_DAYS_PER_MONTH: usize = 21;

// ── Market data ─────────────────────────────────────────────────────────────
/// Number of sessions fetched per asset by default.
pub const DEFAULT_WINDOW: usize = 252;
pub const DEFAULT_BENCHMARK_SYMBOL: &str = "^BVSP";
pub const DEFAULT_MARKET_SUFFIX: &str = ".SA";
pub const DEFAULT_CACHE_DIR: &str = ".cache";
/// Yahoo history is requested this many calendar days per wanted session.
pub const CALENDAR_DAYS_PER_SESSION: i64 = 4;
pub const CACHE_MAX_AGE_SECS: u64 = 86_400;
pub const FETCH_MAX_ATTEMPTS: usize = 3;

/// Options recognised by the analytics core for one request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisConfig {
    pub step_size: f64,
    pub min_weight: f64,
    pub confidence_multiplier: f64,
    pub total_contribution: f64,
    pub monthly_contribution: f64,
    pub sort_key: SortKey,
    pub include_wealth_projection: bool,
    pub risk_free_rate: f64,
    pub max_candidates: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            step_size: DEFAULT_STEP_SIZE,
            min_weight: MIN_WEIGHT,
            confidence_multiplier: DEFAULT_CONFIDENCE_MULTIPLIER,
            total_contribution: DEFAULT_TOTAL_CONTRIBUTION,
            monthly_contribution: DEFAULT_MONTHLY_CONTRIBUTION,
            sort_key: SortKey::default(),
            include_wealth_projection: false,
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> AnalysisResult<()> {
        if !self.step_size.is_finite() || self.step_size <= 0.0 || self.step_size > 1.0 {
            return Err(AnalysisError::invalid(format!(
                "step size must be in (0, 1], got {}",
                self.step_size
            )));
        }
        if !self.min_weight.is_finite() || !(0.0..1.0).contains(&self.min_weight) {
            return Err(AnalysisError::invalid(format!(
                "min weight must be in [0, 1), got {}",
                self.min_weight
            )));
        }
        if !self.confidence_multiplier.is_finite() || self.confidence_multiplier < 0.0 {
            return Err(AnalysisError::invalid(format!(
                "confidence multiplier must be a non-negative number, got {}",
                self.confidence_multiplier
            )));
        }
        for (name, value) in [
            ("total contribution", self.total_contribution),
            ("monthly contribution", self.monthly_contribution),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AnalysisError::invalid(format!(
                    "{} must be a non-negative amount, got {}",
                    name, value
                )));
            }
        }
        if !self.risk_free_rate.is_finite() {
            return Err(AnalysisError::invalid("risk-free rate must be finite"));
        }
        if self.max_candidates == 0 {
            return Err(AnalysisError::invalid("max candidates must be positive"));
        }
        Ok(())
    }
}

/// Where and how the price provider looks up history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderSettings {
    pub cache_dir: std::path::PathBuf,
    pub market_suffix: String,
    pub benchmark_symbol: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            cache_dir: std::path::PathBuf::from(DEFAULT_CACHE_DIR),
            market_suffix: DEFAULT_MARKET_SUFFIX.to_string(),
            benchmark_symbol: DEFAULT_BENCHMARK_SYMBOL.to_string(),
        }
    }
}

impl ProviderSettings {
    /// Reads `FRONTIER_CACHE_DIR`, `FRONTIER_MARKET_SUFFIX` and `FRONTIER_BENCHMARK`.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Some(dir) = env_non_empty("FRONTIER_CACHE_DIR") {
            settings.cache_dir = std::path::PathBuf::from(dir);
        }
        // An explicitly empty suffix disables suffixing, so this one is read raw.
        if let Ok(suffix) = std::env::var("FRONTIER_MARKET_SUFFIX") {
            settings.market_suffix = suffix.trim().to_uppercase();
        }
        if let Some(benchmark) = env_non_empty("FRONTIER_BENCHMARK") {
            settings.benchmark_symbol = benchmark.to_uppercase();
        }

        info!(
            "Provider settings: cache_dir={}, suffix='{}', benchmark={}",
            settings.cache_dir.display(),
            settings.market_suffix,
            settings.benchmark_symbol
        );
        settings
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
