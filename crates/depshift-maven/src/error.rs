use depshift_core::DepShiftError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Throttling, refused connections, timeouts and 5xx answers.
    #[error("Transient failure fetching {url}: {reason}")]
    Transient { url: String, reason: String },

    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("Failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client setup failed: {0}")]
    Client(String),

    #[error("Gave up on {url} after {attempts} attempts")]
    Exhausted { url: String, attempts: u32 },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound(_))
    }

    /// Classifies an HTTP status that is not a success.
    pub fn from_status(status: u16, url: &str) -> Self {
        match status {
            404 | 410 => FetchError::NotFound(url.to_string()),
            429 | 500..=599 => FetchError::Transient {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            },
            _ => FetchError::Http {
                status,
                url: url.to_string(),
            },
        }
    }

    pub fn from_reqwest(error: reqwest::Error, url: &str) -> Self {
        if let Some(status) = error.status() {
            return Self::from_status(status.as_u16(), url);
        }
        if error.is_builder() {
            return FetchError::Client(error.to_string());
        }
        // Connect errors, timeouts and broken bodies are all worth retrying.
        FetchError::Transient {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}

impl From<FetchError> for DepShiftError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound(what) => DepShiftError::NotFound(what),
            FetchError::Transient { .. } => DepShiftError::Transient(err.to_string()),
            FetchError::Parse { .. } => DepShiftError::MalformedInput(err.to_string()),
            FetchError::Io(e) => DepShiftError::Io(e),
            FetchError::Client(reason) => DepShiftError::Config(reason),
            other => DepShiftError::NotFound(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
