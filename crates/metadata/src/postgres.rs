//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{
    CrawlClaim, CrawlStatsRepo, FileRepo, ReconcileCounts, ReconcilePlan, ReconcileRepo,
};
use crate::store::MetadataStore;
use async_trait::async_trait;
use burrow_core::UserId;
use burrow_core::config::PgSslMode;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// Lets the password arrive separately, e.g. via `BURROW_METADATA__PASSWORD`.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        // Bounds a hung reconciliation transaction.
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl FileRepo for PostgresStore {
    async fn list_files(&self, user: &UserId) -> MetadataResult<Vec<FileRecordRow>> {
        let rows = sqlx::query_as::<_, FileRecordRow>(
            "SELECT * FROM file_records WHERE user_id = $1 ORDER BY id",
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
            "UPDATE file_records SET done = TRUE WHERE user_id = $1 AND file_path = $2 AND NOT done",
        )
        .bind(user.as_str())
        .bind(file_path)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if flipped > 0 {
            sqlx::query(
                "UPDATE crawl_stats SET crawled_files = crawled_files + $1, updated_at = $2 WHERE user_id = $3",
            )
            .bind(flipped as i64)
            .bind(updated_at)
            .bind(user.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(flipped)
    }
}

#[async_trait]
impl CrawlStatsRepo for PostgresStore {
    async fn create_crawl_stats(
        &self,
        user: &UserId,
        created_at: OffsetDateTime,
    ) -> MetadataResult<()> {
        let result = sqlx::query(
            "INSERT INTO crawl_stats (user_id, online, crawling, crawled_files, total_files, updated_at) VALUES ($1, FALSE, FALSE, 0, 0, $2)",
        )
        .bind(user.as_str())
        .bind(created_at)
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
        let row = sqlx::query_as::<_, CrawlStatsRow>("SELECT * FROM crawl_stats WHERE user_id = $1")
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
            sqlx::query("UPDATE crawl_stats SET online = $1, updated_at = $2 WHERE user_id = $3")
                .bind(online)
                .bind(updated_at)
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
        let claimed: Option<bool> = sqlx::query_scalar(
            "UPDATE crawl_stats SET crawling = TRUE, updated_at = $1 WHERE user_id = $2 AND NOT crawling RETURNING crawling",
        )
        .bind(updated_at)
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            return Ok(CrawlClaim::Claimed);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM crawl_stats WHERE user_id = $1)")
                .bind(user.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(if exists {
            CrawlClaim::AlreadyCrawling
        } else {
            CrawlClaim::UnknownUser
        })
    }

    async fn release_crawl(&self, user: &UserId, updated_at: OffsetDateTime) -> MetadataResult<bool> {
        let result = sqlx::query(
            "UPDATE crawl_stats SET crawling = FALSE, updated_at = $1 WHERE user_id = $2",
        )
        .bind(updated_at)
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
            "UPDATE crawl_stats SET crawling = FALSE, updated_at = $1 WHERE crawling AND updated_at < $2",
        )
        .bind(updated_at)
        .bind(idle_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn release_all_crawls(&self, updated_at: OffsetDateTime) -> MetadataResult<u64> {
        let result =
            sqlx::query("UPDATE crawl_stats SET crawling = FALSE, updated_at = $1 WHERE crawling")
                .bind(updated_at)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ReconcileRepo for PostgresStore {
    async fn apply_reconciliation(
        &self,
        user: &UserId,
        plan: &ReconcilePlan,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<ReconcileCounts> {
        let mut counts = ReconcileCounts::default();
        let mut tx = self.pool.begin().await?;

        // Pending records are never kept; they are re-requested below if still present.
        counts.deleted = sqlx::query(
            "DELETE FROM file_records WHERE user_id = $1 AND (NOT done OR file_hash <> ALL($2))",
        )
        .bind(user.as_str())
        .bind(&plan.keep_hashes)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        for rename in &plan.renames {
            let result = sqlx::query(
                "UPDATE file_records SET file_path = $1 WHERE user_id = $2 AND file_hash = $3",
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
            "DELETE FROM file_records WHERE user_id = $1 AND id NOT IN (SELECT MIN(id) FROM file_records WHERE user_id = $1 GROUP BY file_hash)",
        )
        .bind(user.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if !plan.inserts.is_empty() {
            let (paths, hashes): (Vec<String>, Vec<String>) = plan
                .inserts
                .iter()
                .map(|e| (e.path.clone(), e.hash.clone()))
                .unzip();
            counts.inserted = sqlx::query(
                r#"
                INSERT INTO file_records (user_id, file_path, file_hash, done)
                SELECT $1, p, h, FALSE FROM UNNEST($2::text[], $3::text[]) WITH ORDINALITY AS t(p, h, n)
                ORDER BY n
                "#,
            )
            .bind(user.as_str())
            .bind(&paths)
            .bind(&hashes)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        let (total_files, crawled_files): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE done) FROM file_records WHERE user_id = $1",
        )
        .bind(user.as_str())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE crawl_stats SET total_files = $1, crawled_files = $2, updated_at = $3 WHERE user_id = $4",
        )
        .bind(total_files)
        .bind(crawled_files)
        .bind(updated_at)
        .bind(user.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        counts.total_files = total_files;
        counts.crawled_files = crawled_files;
        Ok(counts)
    }
}
