//! Transport trait definitions.

use crate::error::TransportResult;
use async_trait::async_trait;
use bytes::Bytes;

/// A message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
}

/// Publishing side of the pub/sub transport.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish to every matching subscriber. Delivery is best-effort.
    async fn publish(&self, topic: &str, payload: Bytes) -> TransportResult<()>;
}

/// Notified when an authenticated client connects or disconnects.
#[async_trait]
pub trait ConnectionHook: Send + Sync {
    async fn on_connect(&self, identity: &str);

    async fn on_disconnect(&self, identity: &str);
}

/// Position of a record in a partitioned log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogOffset {
    pub partition: u32,
    pub offset: u64,
}

/// A record read from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: String,
    pub position: LogOffset,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

/// Append-only partitioned log.
///
/// Producers never wait for consumers. Each consumer group owns one offset
/// per partition, committed when a record is handed out.
#[async_trait]
pub trait LogStream: Send + Sync + 'static {
    /// Append a record. Records sharing a key land in the same partition.
    async fn append(
        &self,
        topic: &str,
        key: Option<Bytes>,
        payload: Bytes,
    ) -> TransportResult<LogOffset>;

    /// Next unread record for `group`, waiting until one is available.
    ///
    /// Cancel-safe: dropping the future never loses a record.
    async fn read(&self, topic: &str, group: &str) -> TransportResult<LogRecord>;

    /// Backend name for logging.
    fn backend_name(&self) -> &'static str;
}
