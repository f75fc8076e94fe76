//! Transport error types.

use thiserror::Error;

/// Pub/sub and log stream errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("identity {identity} may not {action} {topic}")]
    Unauthorized {
        identity: String,
        action: &'static str,
        topic: String,
    },

    #[error("client id {client_id} is held by another identity")]
    ClientIdInUse { client_id: String, identity: String },

    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("session disconnected: {0}")]
    Disconnected(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;
