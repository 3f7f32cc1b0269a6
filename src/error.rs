//! Error types for kennel.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Durable storage holds no record for this submission.
    #[error("no such submission: {0}")]
    NoSuchSubmission(String),

    #[error("remote call failed ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache error: {0}")]
    Cache(#[from] sqlx::Error),

    #[error("cache migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Remote { status, .. } => matches!(status, 408 | 429 | 500..=599),
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
