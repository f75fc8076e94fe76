//! File record repository trait.

use crate::error::MetadataResult;
use crate::models::FileRecordRow;
use async_trait::async_trait;
use burrow_core::UserId;
use time::OffsetDateTime;

/// Repository for per-user file records.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// All records stored for a user, in insertion order.
    async fn list_files(&self, user: &UserId) -> MetadataResult<Vec<FileRecordRow>>;

    /// Mark a pending record done and bump `crawled_files` in one transaction.
    ///
    /// Returns the number of records flipped. Zero means the path was not
    /// pending (already done, or deleted by a later reconciliation) and
    /// nothing was written.
    async fn mark_file_done(
        &self,
        user: &UserId,
        file_path: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<u64>;
}
