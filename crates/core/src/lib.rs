//! Core domain types and shared logic for the burrow desktop sync backend.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Tenant identifiers
//! - Client file inventories (path/hash snapshots)
//! - Wire payloads exchanged with desktop agents
//! - Topic naming for the agent transport
//! - Shared configuration

pub mod config;
pub mod error;
pub mod inventory;
pub mod messages;
pub mod topic;
pub mod user;

pub use error::{Error, Result};
pub use inventory::{Inventory, InventoryEntry};
pub use messages::{
    ChunkMetadata, Completion, CompletionSignal, CrawlRequest, NewCrawl, QueryRequest, QueryResponse,
    TextChunkMessage,
};
pub use topic::{Topic, TopicKind};
pub use user::UserId;

/// Identity the backend presents to the transport; granted unrestricted topic access.
pub const DEFAULT_SERVICE_IDENTITY: &str = "desktop-service";
