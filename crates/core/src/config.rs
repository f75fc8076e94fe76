//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: restrict this endpoint to scrapers at the network level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// SHA256 hex of the bearer token RPC callers must present.
    /// When unset the RPC surface is unauthenticated (internal deployments only).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    #[serde(default)]
    pub service_token_hash: Option<String>,
    /// Header carrying the verified client-certificate subject of an agent,
    /// set by the TLS-terminating proxy. When unset the agent gateway is disabled.
    #[serde(default)]
    pub agent_identity_header: Option<String>,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            service_token_hash: None,
            agent_identity_header: None,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(hash) = &self.service_token_hash
            && (hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()))
        {
            return Err("server.service_token_hash must be 64 hex characters".to_string());
        }
        if let Some(header) = &self.agent_identity_header
            && header.trim().is_empty()
        {
            return Err("server.agent_identity_header cannot be empty".to_string());
        }
        Ok(())
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (testing and single-node deployments).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only - SQLite cannot force-cancel queries).
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// WARNING: Prefer BURROW_METADATA__PASSWORD over storing in config.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds. Bounds a hung reconciliation transaction.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/burrow.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if *max_connections == 0 {
                    return Err("metadata.max_connections must be at least 1".to_string());
                }
                // Must have either url OR (host + database)
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) => Ok(()),
                    (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "postgres config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Agent transport configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Identity granted unrestricted topic access. The backend connects as it.
    #[serde(default = "default_service_identity")]
    pub service_identity: String,
    /// Client id the backend's own session uses.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Bounded inbox size per connection. Deliveries to a full inbox are dropped.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

fn default_service_identity() -> String {
    crate::DEFAULT_SERVICE_IDENTITY.to_string()
}

fn default_client_id() -> String {
    "desktop-service".to_string()
}

fn default_inbox_capacity() -> usize {
    1024
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            service_identity: default_service_identity(),
            client_id: default_client_id(),
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.service_identity.is_empty() {
            return Err("transport.service_identity cannot be empty".to_string());
        }
        if self.client_id.is_empty() {
            return Err("transport.client_id cannot be empty".to_string());
        }
        if self.inbox_capacity == 0 {
            return Err("transport.inbox_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Append-only log stream configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Partitions per topic.
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    /// Topic relayed agent chunks are appended to.
    #[serde(default = "default_chunk_topic")]
    pub chunk_topic: String,
    /// Topic completion signals are read from.
    #[serde(default = "default_signal_topic")]
    pub signal_topic: String,
    /// Consumer group of the completion signal consumer.
    #[serde(default = "default_signal_group")]
    pub signal_group: String,
    /// Payload bytes each partition may hold before the oldest records are
    /// evicted (default: 32 MiB).
    #[serde(default = "default_max_partition_bytes")]
    pub max_partition_bytes: u64,
}

fn default_partitions() -> u32 {
    4
}

fn default_chunk_topic() -> String {
    "text-chunks".to_string()
}

fn default_signal_topic() -> String {
    "desktop-signals".to_string()
}

fn default_signal_group() -> String {
    "desktop-signal-readers".to_string()
}

fn default_max_partition_bytes() -> u64 {
    32 * 1024 * 1024
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            chunk_topic: default_chunk_topic(),
            signal_topic: default_signal_topic(),
            signal_group: default_signal_group(),
            max_partition_bytes: default_max_partition_bytes(),
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.partitions == 0 {
            return Err("stream.partitions must be at least 1".to_string());
        }
        if self.max_partition_bytes == 0 {
            return Err("stream.max_partition_bytes must be positive".to_string());
        }
        if self.chunk_topic == self.signal_topic {
            return Err("stream.chunk_topic and stream.signal_topic must differ".to_string());
        }
        Ok(())
    }
}

/// Idle-crawl reaper configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_reaper_enabled")]
    pub enabled: bool,
    /// Seconds between sweeps (default: 5 minutes).
    #[serde(default = "default_reaper_interval_secs")]
    pub interval_secs: u64,
    /// A crawl untouched for this many seconds is released (default: 30 minutes).
    #[serde(default = "default_idle_threshold_secs")]
    pub idle_threshold_secs: u64,
}

fn default_reaper_enabled() -> bool {
    true
}

fn default_reaper_interval_secs() -> u64 {
    300
}

fn default_idle_threshold_secs() -> u64 {
    1800
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: default_reaper_enabled(),
            interval_secs: default_reaper_interval_secs(),
            idle_threshold_secs: default_idle_threshold_secs(),
        }
    }
}

impl ReaperConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    /// Idle threshold as a `time::Duration` for timestamp arithmetic.
    pub fn idle_threshold(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.idle_threshold_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.interval_secs == 0 {
            return Err("reaper.interval_secs must be at least 1".to_string());
        }
        if self.idle_threshold_secs == 0 {
            return Err("reaper.idle_threshold_secs must be at least 1".to_string());
        }
        if self.idle_threshold_secs > i64::MAX as u64 {
            return Err(format!(
                "reaper.idle_threshold_secs {} exceeds maximum value {}",
                self.idle_threshold_secs,
                i64::MAX
            ));
        }
        Ok(())
    }
}

/// Chunk request/response correlator configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    /// How long a delivery may wait on a full response slot before dropping it.
    #[serde(default = "default_response_grace_ms")]
    pub response_grace_ms: u64,
    /// TTL used when a caller does not supply one.
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,
    /// Upper bound applied to caller-supplied TTLs.
    #[serde(default = "default_max_ttl_ms")]
    pub max_ttl_ms: u64,
}

fn default_response_grace_ms() -> u64 {
    2000
}

fn default_ttl_ms() -> u64 {
    5000
}

fn default_max_ttl_ms() -> u64 {
    60_000
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            response_grace_ms: default_response_grace_ms(),
            default_ttl_ms: default_ttl_ms(),
            max_ttl_ms: default_max_ttl_ms(),
        }
    }
}

impl CorrelatorConfig {
    pub fn response_grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.response_grace_ms)
    }

    /// Resolve a caller TTL: zero or absent means default, and the result is capped.
    pub fn effective_ttl(&self, requested_ms: Option<u64>) -> std::time::Duration {
        let ms = match requested_ms {
            Some(ms) if ms > 0 => ms.min(self.max_ttl_ms),
            _ => self.default_ttl_ms,
        };
        std::time::Duration::from_millis(ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.default_ttl_ms == 0 || self.max_ttl_ms == 0 {
            return Err("correlator TTLs must be at least 1ms".to_string());
        }
        if self.default_ttl_ms > self.max_ttl_ms {
            return Err(format!(
                "correlator.default_ttl_ms {} exceeds correlator.max_ttl_ms {}",
                self.default_ttl_ms, self.max_ttl_ms
            ));
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub correlator: CorrelatorConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** SQLite metadata, reaper disabled, short TTLs.
    pub fn for_testing() -> Self {
        Self {
            reaper: ReaperConfig {
                enabled: false,
                ..ReaperConfig::default()
            },
            correlator: CorrelatorConfig {
                response_grace_ms: 100,
                default_ttl_ms: 500,
                max_ttl_ms: 5000,
            },
            ..Self::default()
        }
    }

    /// Validate every section, reporting the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.metadata.validate()?;
        self.transport.validate()?;
        self.stream.validate()?;
        self.reaper.validate()?;
        self.correlator.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(AppConfig::default().validate().is_ok());
        assert!(AppConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_stream_defaults_match_deployed_topics() {
        let config = StreamConfig::default();
        assert_eq!(config.chunk_topic, "text-chunks");
        assert_eq!(config.signal_topic, "desktop-signals");
    }

    #[test]
    fn test_reaper_rejects_zero_interval() {
        let config = ReaperConfig {
            interval_secs: 0,
            ..ReaperConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_ttl() {
        let config = CorrelatorConfig::default();
        assert_eq!(config.effective_ttl(None).as_millis(), 5000);
        assert_eq!(config.effective_ttl(Some(0)).as_millis(), 5000);
        assert_eq!(config.effective_ttl(Some(50)).as_millis(), 50);
        assert_eq!(config.effective_ttl(Some(10_000_000)).as_millis(), 60_000);
    }

    #[test]
    fn test_postgres_requires_url_or_host_and_database() {
        let json = r#"{"type":"postgres","host":"db"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());

        let json = r#"{"type":"postgres","url":"postgres://u:p@db/burrow"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_service_token_hash_must_be_hex() {
        let config = ServerConfig {
            service_token_hash: Some("nothex".to_string()),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
