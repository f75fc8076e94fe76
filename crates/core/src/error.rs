//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid user id: {0}")]
    InvalidUserId(String),

    #[error("inventory length mismatch: {paths} paths, {hashes} hashes")]
    InventoryLengthMismatch { paths: usize, hashes: usize },

    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::MalformedPayload(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
