//! Agent transport for burrow.
//!
//! This crate provides:
//! - A topic-based pub/sub broker with per-identity ACLs
//! - Identity extraction from client certificate subjects
//! - Connect/disconnect hooks
//! - A partitioned append-only log with consumer groups

pub mod acl;
pub mod backends;
pub mod error;
pub mod identity;
pub mod traits;

pub use acl::{Access, TopicAcl, filter_matches};
pub use backends::broker::{Inbox, MemoryBroker, Session};
pub use backends::log::MemoryLog;
pub use error::{TransportError, TransportResult};
pub use identity::{identity_from_subject, subject_for_identity};
pub use traits::{ConnectionHook, LogOffset, LogRecord, LogStream, Message, PubSub};

use burrow_core::config::{StreamConfig, TransportConfig};
use std::sync::Arc;

/// Create a broker from configuration.
pub fn broker_from_config(config: &TransportConfig) -> TransportResult<MemoryBroker> {
    config.validate().map_err(TransportError::Config)?;
    Ok(MemoryBroker::new(
        config.service_identity.clone(),
        config.inbox_capacity,
    ))
}

/// Create a log stream from configuration.
pub fn log_from_config(config: &StreamConfig) -> TransportResult<Arc<dyn LogStream>> {
    config.validate().map_err(TransportError::Config)?;
    Ok(Arc::new(MemoryLog::with_retention(
        config.partitions,
        config.max_partition_bytes,
    )?))
}
