use depshift_core::DepShiftError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No code model for {0}")]
    MissingModel(PathBuf),

    #[error("Malformed fact at {path}:{line}: {reason}")]
    MalformedFact {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Front end {command} failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Unreadable front-end output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("Corrupt cache entry {0}")]
    CorruptCache(PathBuf),
}

impl From<ExtractError> for DepShiftError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::CorruptCache(_) | ExtractError::MalformedFact { .. } => {
                DepShiftError::MalformedInput(err.to_string())
            }
            other => DepShiftError::Extraction(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
