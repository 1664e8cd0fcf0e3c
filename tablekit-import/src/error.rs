use thiserror::Error;

pub type ImportResult<T> = Result<T, ImportError>;

#[derive(Debug, Error)]
pub enum ImportError {
    /// Record `index` (0-based, in source order) could not be parsed.
    #[error("record {index}: {reason}")]
    Parse { index: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported source: {0}")]
    UnsupportedSource(String),
}

impl ImportError {
    pub(crate) fn parse(index: usize, reason: impl Into<String>) -> Self {
        Self::Parse {
            index,
            reason: reason.into(),
        }
    }
}
