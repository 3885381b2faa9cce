use thiserror::Error;

/// Request-scoped failures of the analytics core.
///
/// None of these is fatal to the process: every variant aborts only the
/// request that produced it. Zero-variance ratios are not errors at all, see
/// [`crate::risk::Ratio`].
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("insufficient data for {symbol}: no aligned return periods")]
    InsufficientData { symbol: String },

    #[error(
        "infeasible parameters: {assets} assets x min weight {min_weight} exceed 100% at step {step}"
    )]
    InfeasibleParameters {
        assets: usize,
        step: f64,
        min_weight: f64,
    },

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("price provider failed for {symbol}: {source}")]
    Provider {
        symbol: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    pub fn insufficient(symbol: impl Into<String>) -> Self {
        Self::InsufficientData {
            symbol: symbol.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameters(message.into())
    }

    /// True for errors caused by the caller's input rather than the environment.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InsufficientData { .. } | Self::InfeasibleParameters { .. } | Self::InvalidParameters(_)
        )
    }
}

pub type AnalysisResult<T> = std::result::Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = AnalysisError::InfeasibleParameters {
            assets: 11,
            step: 0.1,
            min_weight: 0.05,
        };
        let msg = err.to_string();
        assert!(msg.contains("11"));
        assert!(msg.contains("0.1"));
        assert!(msg.contains("0.05"));

        let err = AnalysisError::insufficient("PETR4");
        assert!(err.to_string().contains("PETR4"));
    }

    #[test]
    fn test_client_error_classification() {
        assert!(AnalysisError::insufficient("X").is_client_error());
        assert!(AnalysisError::invalid("bad").is_client_error());
        assert!(!AnalysisError::Cancelled.is_client_error());
        let provider = AnalysisError::Provider {
            symbol: "X".to_string(),
            source: anyhow::anyhow!("timeout"),
        };
        assert!(!provider.is_client_error());
    }
}
