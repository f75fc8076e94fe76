//! HTTP request handlers.

pub mod health;
pub mod rpc;
pub mod streams;

pub use health::*;
pub use rpc::*;
pub use streams::*;
