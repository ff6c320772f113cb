use thiserror::Error;

#[derive(Error, Debug)]
pub enum DepShiftError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl DepShiftError {
    /// Only transient failures (throttling, refused connections, flaky
    /// metadata) are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DepShiftError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, DepShiftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(DepShiftError::Transient("429".into()).is_retryable());
        assert!(!DepShiftError::NotFound("a:b:1".into()).is_retryable());
        assert!(!DepShiftError::MalformedInput("line 3".into()).is_retryable());
        assert!(!DepShiftError::Cancelled.is_retryable());
    }
}
