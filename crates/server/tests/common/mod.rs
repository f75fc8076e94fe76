//! Common test utilities and fixtures.

pub mod fixtures;
pub mod metadata;
pub mod publisher;
pub mod server;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use metadata::*;
#[allow(unused_imports)]
pub use publisher::*;
#[allow(unused_imports)]
pub use server::*;
