//! Transactional application of a reconciliation plan.

use crate::error::MetadataResult;
use async_trait::async_trait;
use burrow_core::{InventoryEntry, UserId};
use time::OffsetDateTime;

/// Move a kept record to the path the agent now reports for its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameOp {
    pub old_path: String,
    pub new_path: String,
    pub hash: String,
}

/// Changes computed by diffing an agent inventory against stored records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Hashes of done records that survive. Every other record is deleted,
    /// as are redundant duplicates of a kept hash.
    pub keep_hashes: Vec<String>,
    pub renames: Vec<RenameOp>,
    /// New pending records; also the list of files requested from the agent.
    pub inserts: Vec<InventoryEntry>,
}

/// Row counts observed while applying a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileCounts {
    pub deleted: u64,
    pub renamed: u64,
    pub inserted: u64,
    pub total_files: i64,
    pub crawled_files: i64,
}

/// Repository for the reconciliation transaction.
#[async_trait]
pub trait ReconcileRepo: Send + Sync {
    /// Delete, rename, insert and recount in one transaction.
    ///
    /// Any failure rolls back every step.
    async fn apply_reconciliation(
        &self,
        user: &UserId,
        plan: &ReconcilePlan,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<ReconcileCounts>;
}
