pub mod hooks;

#[allow(unused_imports)]
pub use hooks::{HookEvent, RecordingHook};
