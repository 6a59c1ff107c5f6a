use thiserror::Error;

/// Failure kinds of the recommendation pipeline.
///
/// "Not found" from an optional source is not an error: adapters return
/// [`crate::sources::Lookup::NotFound`] and the caller falls back.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("data unavailable ({source_name}): {detail}")]
    DataUnavailable {
        source_name: &'static str,
        detail: String,
    },

    /// The source answered, but its contents cannot be used. Never a fallback trigger.
    #[error("malformed data ({source_name}): {detail}")]
    MalformedData {
        source_name: &'static str,
        detail: String,
    },

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("optimization failed: {0}")]
    OptimizationFailed(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn unavailable(source_name: &'static str, detail: impl Into<String>) -> Self {
        Self::DataUnavailable {
            source_name,
            detail: detail.into(),
        }
    }

    pub fn malformed(source_name: &'static str, detail: impl Into<String>) -> Self {
        Self::MalformedData {
            source_name,
            detail: detail.into(),
        }
    }

    /// Stable machine-readable kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataUnavailable { .. } => "data_unavailable",
            Self::MalformedData { .. } => "malformed_data",
            Self::InsufficientData(_) => "insufficient_data",
            Self::DimensionMismatch(_) => "dimension_mismatch",
            Self::Validation(_) => "validation",
            Self::OptimizationFailed(_) => "optimization_failed",
        }
    }
}
