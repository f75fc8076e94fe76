//! Connection hook test doubles.

use async_trait::async_trait;
use burrow_transport::ConnectionHook;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    Connect(String),
    Disconnect(String),
}

/// Records every hook invocation in order.
#[derive(Default)]
pub struct RecordingHook {
    events: Mutex<Vec<HookEvent>>,
}

impl RecordingHook {
    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectionHook for RecordingHook {
    async fn on_connect(&self, identity: &str) {
        self.events
            .lock()
            .unwrap()
            .push(HookEvent::Connect(identity.to_string()));
    }

    async fn on_disconnect(&self, identity: &str) {
        self.events
            .lock()
            .unwrap()
            .push(HookEvent::Disconnect(identity.to_string()));
    }
}
