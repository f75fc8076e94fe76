//! Chunk request/response correlation.
//!
//! A caller that needs chunk text from an agent publishes a `query_req`
//! carrying a fresh request id and waits on a single-slot channel registered
//! under that id. The agent's `query_res` is routed back through
//! [`Correlator::deliver`]. Whichever of delivery or timeout happens first
//! removes the entry; the other finds it gone.

use crate::metrics;
use burrow_core::messages::encode;
use burrow_core::{
    ChunkMetadata, QueryRequest, QueryResponse, TextChunkMessage, Topic, TopicKind, UserId,
};
use burrow_transport::{PubSub, TransportError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

/// Why a fetch returned no chunks.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// No response arrived within the TTL.
    #[error("no response to request {request_id} within {ttl:?}")]
    Timeout { request_id: String, ttl: Duration },

    #[error("failed to publish chunk request: {0}")]
    Publish(#[from] TransportError),

    #[error("failed to encode chunk request: {0}")]
    Encode(#[from] burrow_core::Error),

    /// The entry was removed without a response, e.g. during shutdown.
    #[error("request {0} was abandoned")]
    Abandoned(String),
}

/// What happened to an inbound response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No caller is waiting under that id (already resolved or timed out).
    Unknown,
    /// The id belongs to a request issued for another user.
    WrongUser,
    /// The caller gave up between lookup and send.
    Dropped,
}

struct PendingRequest {
    user: UserId,
    tx: mpsc::Sender<QueryResponse>,
}

/// Table of in-flight chunk requests.
pub struct Correlator {
    publisher: Arc<dyn PubSub>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    response_grace: Duration,
}

impl Correlator {
    pub fn new(publisher: Arc<dyn PubSub>, response_grace: Duration) -> Self {
        Self {
            publisher,
            pending: Mutex::new(HashMap::new()),
            response_grace,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        // Entries stay consistent even if a holder panicked.
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ask the user's agent for the text of `metadata` and wait up to `ttl`.
    pub async fn fetch_chunks(
        &self,
        user: &UserId,
        metadata: Vec<ChunkMetadata>,
        ttl: Duration,
    ) -> Result<Vec<TextChunkMessage>, FetchError> {
        let (tx, mut rx) = mpsc::channel(1);
        let request_id = self.register(user, tx);
        let _entry = PendingEntry {
            correlator: self,
            request_id: &request_id,
        };

        let payload = encode(&QueryRequest {
            request_id: request_id.clone(),
            requested_chunk_metadatas: metadata,
        })?;
        let topic = Topic::new(TopicKind::QueryReq, user.clone()).to_string();
        self.publisher.publish(&topic, payload.into()).await?;

        tracing::debug!(user_id = %user, request_id = %request_id, "Chunk request published");

        match tokio::time::timeout(ttl, rx.recv()).await {
            Ok(Some(response)) => Ok(response.text_chunks),
            Ok(None) => Err(FetchError::Abandoned(request_id.clone())),
            Err(_) => Err(FetchError::Timeout {
                request_id: request_id.clone(),
                ttl,
            }),
        }
    }

    /// Route an agent response to its waiting caller.
    ///
    /// Never blocks longer than the response grace period. A second response
    /// for the same id finds no entry and is dropped.
    pub async fn deliver(&self, from: &UserId, response: QueryResponse) -> Delivery {
        let tx = {
            let mut table = self.table();
            match table.get(&response.request_id) {
                None => {
                    metrics::LATE_RESPONSES.inc();
                    tracing::debug!(
                        user_id = %from,
                        request_id = %response.request_id,
                        "Response for unknown request, dropping"
                    );
                    return Delivery::Unknown;
                }
                Some(entry) if entry.user != *from => {
                    tracing::warn!(
                        user_id = %from,
                        request_id = %response.request_id,
                        "Response from a user that did not receive the request, dropping"
                    );
                    return Delivery::WrongUser;
                }
                Some(_) => {}
            }
            let entry = table.remove(&response.request_id);
            metrics::CORRELATOR_PENDING.set(gauge_value(table.len()));
            match entry {
                Some(entry) => entry.tx,
                None => return Delivery::Unknown,
            }
        };

        let request_id = response.request_id.clone();
        match tx.send_timeout(response, self.response_grace).await {
            Ok(()) => Delivery::Delivered,
            Err(SendTimeoutError::Timeout(_)) | Err(SendTimeoutError::Closed(_)) => {
                metrics::LATE_RESPONSES.inc();
                tracing::debug!(request_id = %request_id, "Caller gone before response, dropping");
                Delivery::Dropped
            }
        }
    }

    /// Number of requests waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.table().contains_key(request_id)
    }

    /// Drop every pending entry. Waiting callers see [`FetchError::Abandoned`].
    pub fn abandon_all(&self) -> usize {
        let mut table = self.table();
        let count = table.len();
        table.clear();
        metrics::CORRELATOR_PENDING.set(0);
        count
    }

    fn register(&self, user: &UserId, tx: mpsc::Sender<QueryResponse>) -> String {
        let mut table = self.table();
        let request_id = loop {
            let candidate = next_request_id();
            if !table.contains_key(&candidate) {
                break candidate;
            }
        };
        table.insert(
            request_id.clone(),
            PendingRequest {
                user: user.clone(),
                tx,
            },
        );
        metrics::CORRELATOR_PENDING.set(gauge_value(table.len()));
        request_id
    }

    fn remove(&self, request_id: &str) {
        let mut table = self.table();
        if table.remove(request_id).is_some() {
            metrics::CORRELATOR_PENDING.set(gauge_value(table.len()));
        }
    }
}

/// Removes the entry when the waiting caller returns or is cancelled.
struct PendingEntry<'a> {
    correlator: &'a Correlator,
    request_id: &'a str,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.correlator.remove(self.request_id);
    }
}

/// Nanosecond timestamp plus a random suffix.
fn next_request_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{nanos:x}-{:08x}", rand::random::<u32>())
}

fn gauge_value(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}
