//! Vector index collaborator.
//!
//! Embedding and similarity search live outside this service. After a
//! reconciliation commits, the index is told which of a user's files survive
//! so it can drop vectors for everything else.

use async_trait::async_trait;
use burrow_core::UserId;

/// Error returned by a vector index implementation.
pub type VectorError = Box<dyn std::error::Error + Send + Sync>;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Delete every vector for `user` whose file path is not in `keep_paths`.
    async fn delete_files_except(&self, user: &UserId, keep_paths: &[String])
    -> Result<(), VectorError>;
}

/// Index that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVectorIndex;

#[async_trait]
impl VectorIndex for NoopVectorIndex {
    async fn delete_files_except(
        &self,
        user: &UserId,
        keep_paths: &[String],
    ) -> Result<(), VectorError> {
        tracing::trace!(user_id = %user, kept = keep_paths.len(), "No vector index configured");
        Ok(())
    }
}
