//! In-process transport backends.

pub mod broker;
pub mod log;
