//! Unified error types for Tidings.

use thiserror::Error;

/// Result type alias using TidingsError.
pub type Result<T> = std::result::Result<T, TidingsError>;

#[derive(Error, Debug)]
pub enum TidingsError {
    // Admission errors
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Delivery store rejected record: {0}")]
    AdapterRejected(String),

    #[error("Delivery store error: {0}")]
    Store(String),

    // Overflow queue persistence
    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TidingsError {
    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::AdapterRejected(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
