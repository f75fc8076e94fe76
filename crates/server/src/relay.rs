//! Chunk relay from agents to the chunk log.

use crate::metrics;
use burrow_core::messages::{decode, encode};
use burrow_core::{TextChunkMessage, UserId};
use burrow_transport::{LogOffset, LogStream, TransportError};
use bytes::Bytes;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("malformed chunk: {0}")]
    Malformed(#[from] burrow_core::Error),

    #[error("failed to append chunk: {0}")]
    Append(#[from] TransportError),
}

/// Appends agent chunks to the log, keyed by user so one user's chunks stay
/// ordered within a partition.
pub struct ChunkRelay {
    log: Arc<dyn LogStream>,
    topic: String,
}

impl ChunkRelay {
    pub fn new(log: Arc<dyn LogStream>, topic: impl Into<String>) -> Self {
        Self {
            log,
            topic: topic.into(),
        }
    }

    /// Relay one `new_chunk` payload published under `user`'s topic.
    ///
    /// The chunk's `user_id` is replaced by the topic identity whatever the
    /// payload claims.
    pub async fn relay(&self, user: &UserId, payload: &[u8]) -> Result<LogOffset, RelayError> {
        let mut chunk: TextChunkMessage = decode(payload)?;
        if !chunk.metadata.user_id.is_empty() && chunk.metadata.user_id != user.as_str() {
            tracing::warn!(
                user_id = %user,
                claimed = %chunk.metadata.user_id,
                "Chunk claims another user, overwriting"
            );
        }
        chunk.metadata.user_id = user.to_string();

        let payload = encode(&chunk)?;
        let key = Bytes::copy_from_slice(user.as_str().as_bytes());
        let position = self
            .log
            .append(&self.topic, Some(key), payload.into())
            .await?;
        metrics::CHUNKS_RELAYED.inc();
        tracing::trace!(
            user_id = %user,
            partition = position.partition,
            offset = position.offset,
            "Chunk relayed"
        );
        Ok(position)
    }
}
