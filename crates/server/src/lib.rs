//! Desktop sync backend.
//!
//! This crate provides:
//! - Crawl reconciliation of agent inventories
//! - Chunk request/response correlation over the pub/sub transport
//! - Completion signal consumption and the idle-crawl reaper
//! - Chunk relay into the append-only log
//! - The agent WebSocket gateway and the HTTP RPC surface

pub mod auth;
pub mod completion;
pub mod correlator;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod hooks;
pub mod metrics;
pub mod reaper;
pub mod reconcile;
pub mod relay;
pub mod routes;
pub mod state;
pub mod vector;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
