//! Error types for the surveillance pipeline

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Upstream HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    // Input-shape errors on upstream payloads
    #[error("Malformed upstream payload: {0}")]
    Payload(String),

    // Store errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid timestamp: {0}")]
    Timestamp(String),

    #[error("Invalid decimal: {0}")]
    Decimal(String),

    // Notifier errors
    #[error("Notifier send failed: {0}")]
    Notify(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::Notify(_) => true,
            Error::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<chrono::ParseError> for Error {
    fn from(e: chrono::ParseError) -> Self {
        Error::Timestamp(e.to_string())
    }
}

impl From<rust_decimal::Error> for Error {
    fn from(e: rust_decimal::Error) -> Self {
        Error::Decimal(e.to_string())
    }
}
