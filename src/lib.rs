//! Discrete-allocation Value-at-Risk and wealth frontier.
//!
//! Enumerates every allocation of a contribution across a small asset list on
//! a fixed weight grid, evaluates parametric VaR (and optionally projected
//! terminal wealth under monthly contributions) for each, and ranks them.

pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod ranker;
pub mod report;
pub mod returns;
pub mod risk;
pub mod wealth;
pub mod webui;
pub mod weights;

pub use analysis::{
    AnalysisEngine, AnalysisRequest, AnalysisResponse, CancellationToken, RiskReport,
    RiskReportRequest,
};
pub use config::{AnalysisConfig, ProviderSettings};
pub use error::{AnalysisError, AnalysisResult};
pub use ranker::{Candidate, RankedTable, SortKey};
pub use risk::{Ratio, RiskMetrics};
pub use weights::WeightVector;
