//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;

/// One file known to the backend for a user.
///
/// `file_path` is not unique on its own: paths move between hashes across
/// reconciliations, and a rename can briefly collide with a pending insert.
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct FileRecordRow {
    pub id: i64,
    pub user_id: String,
    pub file_path: String,
    pub file_hash: String,
    /// Content fully chunked and embedded.
    pub done: bool,
}

/// Per-user crawl counters and flags.
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct CrawlStatsRow {
    pub user_id: String,
    pub online: bool,
    /// Set while exactly one reconciliation/crawl is in flight for the user.
    pub crawling: bool,
    pub crawled_files: i64,
    pub total_files: i64,
    pub updated_at: OffsetDateTime,
}
