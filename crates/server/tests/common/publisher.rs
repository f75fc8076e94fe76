//! Recording publisher for engine tests.

use async_trait::async_trait;
use burrow_transport::{Message, PubSub, TransportError, TransportResult};
use bytes::Bytes;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Captures every publish instead of delivering it.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<Message>>,
    notify: Notify,
    fail: AtomicBool,
}

#[allow(dead_code)]
impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later publish fail.
    pub fn fail_publishes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<Message> {
        self.published.lock().unwrap().clone()
    }

    /// Wait until at least `count` messages were published.
    pub async fn wait_for(&self, count: usize) -> Vec<Message> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.notify.notified();
                let messages = self.messages();
                if messages.len() >= count {
                    return messages;
                }
                notified.await;
            }
        })
        .await
        .expect("timed out waiting for publishes")
    }
}

#[async_trait]
impl PubSub for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> TransportResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected("recording publisher".to_string()));
        }
        self.published.lock().unwrap().push(Message {
            topic: topic.to_string(),
            payload,
        });
        self.notify.notify_waiters();
        Ok(())
    }
}
