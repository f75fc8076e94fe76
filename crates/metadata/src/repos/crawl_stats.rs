//! Crawl stats repository trait.

use crate::error::MetadataResult;
use crate::models::CrawlStatsRow;
use async_trait::async_trait;
use burrow_core::UserId;
use time::OffsetDateTime;

/// Result of an atomic attempt to start a crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlClaim {
    /// The flag flipped from false to true; the caller owns the crawl.
    Claimed,
    /// Another crawl holds the flag.
    AlreadyCrawling,
    /// No stats row exists for the user.
    UnknownUser,
}

/// Repository for per-user crawl stats.
///
/// Every write refreshes `updated_at`.
#[async_trait]
pub trait CrawlStatsRepo: Send + Sync {
    /// Insert a zeroed stats row. Fails with `AlreadyExists` on a second call.
    async fn create_crawl_stats(
        &self,
        user: &UserId,
        created_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    async fn get_crawl_stats(&self, user: &UserId) -> MetadataResult<Option<CrawlStatsRow>>;

    /// Returns false when the user has no stats row.
    async fn set_online(
        &self,
        user: &UserId,
        online: bool,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Set `crawling` only if it is currently false, in a single conditional statement.
    async fn try_claim_crawl(
        &self,
        user: &UserId,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<CrawlClaim>;

    /// Clear `crawling`. Returns false when the user has no stats row.
    async fn release_crawl(&self, user: &UserId, updated_at: OffsetDateTime)
    -> MetadataResult<bool>;

    /// Clear `crawling` for every crawl not written since `idle_before`.
    async fn release_idle_crawls(
        &self,
        idle_before: OffsetDateTime,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<u64>;

    /// Clear `crawling` for every user.
    async fn release_all_crawls(&self, updated_at: OffsetDateTime) -> MetadataResult<u64>;
}
