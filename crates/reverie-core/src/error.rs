//! Error types for Reverie

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("evaluator error: {0}")]
    Evaluator(String),

    #[error("repository error: {operation} - {message}")]
    Repository { operation: String, message: String },

    #[error("deliberation failed: {0}")]
    Deliberation(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn repository(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Repository {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn deliberation(message: impl Into<String>) -> Self {
        Self::Deliberation(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}
