//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{CrawlStatsRepo, FileRepo, ReconcileRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: FileRepo + CrawlStatsRepo + ReconcileRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout: Duration,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout = Duration::from_secs(query_timeout_secs.unwrap_or(30));

        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        Self::connect(opts, query_timeout).await
    }

    /// Create a private in-memory store.
    pub async fn in_memory() -> MetadataResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::connect(opts, Duration::from_secs(30)).await
    }

    async fn connect(opts: SqliteConnectOptions, query_timeout: Duration) -> MetadataResult<Self> {
        let pool = SqlitePoolOptions::new()
            // A single connection serializes writers and keeps an in-memory
            // database alive for the lifetime of the pool.
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            query_timeout,
        };
        store.migrate().await?;

        tracing::debug!(
            query_timeout_secs = query_timeout.as_secs(),
            "SQLite query timeout is advisory only; slow transactions are logged, not cancelled"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    fn warn_if_slow(&self, operation: &str, started: std::time::Instant) {
        let elapsed = started.elapsed();
        if elapsed > self.query_timeout {
            tracing::warn!(
                operation,
                elapsed_ms = elapsed.as_millis() as u64,
                timeout_ms = self.query_timeout.as_millis() as u64,
                "SQLite transaction exceeded advisory query timeout"
            );
        }
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::{CrawlClaim, ReconcileCounts, ReconcilePlan};
    use burrow_core::UserId;
    use time::{OffsetDateTime, UtcOffset};

    /// UTC timestamp text with nanosecond precision.
    ///
    /// `updated_at` is compared as text, so every row must use this one
    /// fixed-width layout for lexical order to match time order.
    pub(super) fn sortable_timestamp(ts: OffsetDateTime) -> String {
        let ts = ts.to_offset(UtcOffset::UTC);
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}Z",
            ts.year(),
            u8::from(ts.month()),
            ts.day(),
            ts.hour(),
            ts.minute(),
            ts.second(),
            ts.nanosecond()
        )
    }

    #[async_trait]
    impl FileRepo for SqliteStore {
        async fn list_files(&self, user: &UserId) -> MetadataResult<Vec<FileRecordRow>> {
            let rows = sqlx::query_as::<_, FileRecordRow>(
                "SELECT * FROM file_records WHERE user_id = ? ORDER BY id",
            )
            .bind(user.as_str())
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn mark_file_done(
            &self,
            user: &UserId,
            file_path: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let mut tx = self.pool.begin().await?;

            let flipped = sqlx::query(
                "UPDATE file_records SET done = 1 WHERE user_id = ? AND file_path = ? AND done = 0",
            )
            .bind(user.as_str())
            .bind(file_path)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if flipped > 0 {
                sqlx::query(
                    "UPDATE crawl_stats SET crawled_files = crawled_files + ?, updated_at = ? WHERE user_id = ?",
                )
                .bind(flipped as i64)
                .bind(sortable_timestamp(updated_at))
                .bind(user.as_str())
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(flipped)
        }
    }

    #[async_trait]
    impl CrawlStatsRepo for SqliteStore {
        async fn create_crawl_stats(
            &self,
            user: &UserId,
            created_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "INSERT INTO crawl_stats (user_id, online, crawling, crawled_files, total_files, updated_at) VALUES (?, 0, 0, 0, 0, ?)",
            )
            .bind(user.as_str())
            .bind(sortable_timestamp(created_at))
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(e) => {
                    let err = MetadataError::from(e);
                    if err.is_unique_violation() {
                        Err(MetadataError::AlreadyExists(format!(
                            "crawl stats for user {user}"
                        )))
                    } else {
                        Err(err)
                    }
                }
            }
        }

        async fn get_crawl_stats(&self, user: &UserId) -> MetadataResult<Option<CrawlStatsRow>> {
            let row =
                sqlx::query_as::<_, CrawlStatsRow>("SELECT * FROM crawl_stats WHERE user_id = ?")
                    .bind(user.as_str())
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn set_online(
            &self,
            user: &UserId,
            online: bool,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result =
                sqlx::query("UPDATE crawl_stats SET online = ?, updated_at = ? WHERE user_id = ?")
                    .bind(online)
                    .bind(sortable_timestamp(updated_at))
                    .bind(user.as_str())
                    .execute(&self.pool)
                    .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn try_claim_crawl(
            &self,
            user: &UserId,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<CrawlClaim> {
            let result = sqlx::query(
                "UPDATE crawl_stats SET crawling = 1, updated_at = ? WHERE user_id = ? AND crawling = 0",
            )
            .bind(sortable_timestamp(updated_at))
            .bind(user.as_str())
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                return Ok(CrawlClaim::Claimed);
            }

            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM crawl_stats WHERE user_id = ?)")
                    .bind(user.as_str())
                    .fetch_one(&self.pool)
                    .await?;
            Ok(if exists {
                CrawlClaim::AlreadyCrawling
            } else {
                CrawlClaim::UnknownUser
            })
        }

        async fn release_crawl(
            &self,
            user: &UserId,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result =
                sqlx::query("UPDATE crawl_stats SET crawling = 0, updated_at = ? WHERE user_id = ?")
                    .bind(sortable_timestamp(updated_at))
                    .bind(user.as_str())
                    .execute(&self.pool)
                    .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn release_idle_crawls(
            &self,
            idle_before: OffsetDateTime,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let result = sqlx::query(
                "UPDATE crawl_stats SET crawling = 0, updated_at = ? WHERE crawling = 1 AND updated_at < ?",
            )
            .bind(sortable_timestamp(updated_at))
            .bind(sortable_timestamp(idle_before))
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }

        async fn release_all_crawls(&self, updated_at: OffsetDateTime) -> MetadataResult<u64> {
            let result =
                sqlx::query("UPDATE crawl_stats SET crawling = 0, updated_at = ? WHERE crawling = 1")
                    .bind(sortable_timestamp(updated_at))
                    .execute(&self.pool)
                    .await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl ReconcileRepo for SqliteStore {
        async fn apply_reconciliation(
            &self,
            user: &UserId,
            plan: &ReconcilePlan,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<ReconcileCounts> {
            let started = std::time::Instant::now();
            let keep_json = serde_json::to_string(&plan.keep_hashes)
                .map_err(|e| MetadataError::Internal(format!("encode keep set: {e}")))?;
            let mut counts = ReconcileCounts::default();
            let mut tx = self.pool.begin().await?;

            // Pending records are never kept; they are re-requested below if still present.
            counts.deleted = sqlx::query(
                "DELETE FROM file_records WHERE user_id = ? AND (done = 0 OR file_hash NOT IN (SELECT value FROM json_each(?)))",
            )
            .bind(user.as_str())
            .bind(&keep_json)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            for rename in &plan.renames {
                let result = sqlx::query(
                    "UPDATE file_records SET file_path = ? WHERE user_id = ? AND file_hash = ?",
                )
                .bind(&rename.new_path)
                .bind(user.as_str())
                .bind(&rename.hash)
                .execute(&mut *tx)
                .await?;
                if result.rows_affected() > 0 {
                    counts.renamed += 1;
                }
            }

            // One surviving record per kept hash.
            counts.deleted += sqlx::query(
                "DELETE FROM file_records WHERE user_id = ? AND id NOT IN (SELECT MIN(id) FROM file_records WHERE user_id = ? GROUP BY file_hash)",
            )
            .bind(user.as_str())
            .bind(user.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();

            for entry in &plan.inserts {
                sqlx::query(
                    "INSERT INTO file_records (user_id, file_path, file_hash, done) VALUES (?, ?, ?, 0)",
                )
                .bind(user.as_str())
                .bind(&entry.path)
                .bind(&entry.hash)
                .execute(&mut *tx)
                .await?;
                counts.inserted += 1;
            }

            let (total_files, crawled_files): (i64, i64) = sqlx::query_as(
                "SELECT COUNT(*), COALESCE(SUM(done), 0) FROM file_records WHERE user_id = ?",
            )
            .bind(user.as_str())
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE crawl_stats SET total_files = ?, crawled_files = ?, updated_at = ? WHERE user_id = ?",
            )
            .bind(total_files)
            .bind(crawled_files)
            .bind(sortable_timestamp(updated_at))
            .bind(user.as_str())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            self.warn_if_slow("apply_reconciliation", started);

            counts.total_files = total_files;
            counts.crawled_files = crawled_files;
            Ok(counts)
        }
    }
}


/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS file_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    file_hash TEXT NOT NULL,
    done INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_file_records_user_hash ON file_records(user_id, file_hash);
CREATE INDEX IF NOT EXISTS idx_file_records_user_path ON file_records(user_id, file_path);

CREATE TABLE IF NOT EXISTS crawl_stats (
    user_id TEXT PRIMARY KEY,
    online INTEGER NOT NULL DEFAULT 0,
    crawling INTEGER NOT NULL DEFAULT 0,
    crawled_files INTEGER NOT NULL DEFAULT 0,
    total_files INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_crawl_stats_crawling ON crawl_stats(crawling, updated_at);
"#;
