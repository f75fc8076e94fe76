//! In-process pub/sub broker with per-identity topic ACLs.

use crate::acl::{Access, TopicAcl, filter_matches, is_valid_filter, is_valid_topic_name};
use crate::error::{TransportError, TransportResult};
use crate::identity::identity_from_subject;
use crate::traits::{ConnectionHook, Message, PubSub};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::mpsc;

struct Connection {
    conn_id: u64,
    identity: String,
    filters: Vec<String>,
    tx: mpsc::Sender<Message>,
}

struct BrokerInner {
    acl: TopicAcl,
    inbox_capacity: usize,
    connections: Mutex<HashMap<String, Connection>>,
    /// Serializes connect/disconnect so hooks observe transitions in order.
    transitions: tokio::sync::Mutex<()>,
    hooks: RwLock<Vec<Arc<dyn ConnectionHook>>>,
    next_conn_id: AtomicU64,
    dropped: AtomicU64,
}

impl BrokerInner {
    fn connections(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_live(connections: &HashMap<String, Connection>, identity: &str) -> bool {
        connections.values().any(|c| c.identity == identity)
    }

    fn hooks(&self) -> Vec<Arc<dyn ConnectionHook>> {
        self.hooks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn notify_connect(&self, identity: &str) {
        for hook in self.hooks() {
            hook.on_connect(identity).await;
        }
    }

    async fn notify_disconnect(&self, identity: &str) {
        for hook in self.hooks() {
            hook.on_disconnect(identity).await;
        }
    }
}

/// In-process topic broker.
///
/// Each connection owns one bounded inbox. A publish fans out to every
/// connection holding a matching filter; a full inbox drops the message for
/// that connection only.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new(privileged_identity: impl Into<String>, inbox_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                acl: TopicAcl::new(privileged_identity),
                inbox_capacity: inbox_capacity.max(1),
                connections: Mutex::new(HashMap::new()),
                transitions: tokio::sync::Mutex::new(()),
                hooks: RwLock::new(Vec::new()),
                next_conn_id: AtomicU64::new(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a hook for connect/disconnect events.
    pub fn add_hook(&self, hook: Arc<dyn ConnectionHook>) {
        self.inner
            .hooks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(hook);
    }

    /// Authenticate a client by its certificate subject and open a session.
    ///
    /// A live connection with the same client id and identity is taken over:
    /// its inbox closes and its session stops working. A client id held by
    /// another identity is refused.
    ///
    /// Hooks see one connect when an identity goes from zero live
    /// connections to one, and one disconnect when it drops back to zero.
    pub async fn connect(&self, client_id: &str, subject: &str) -> TransportResult<(Session, Inbox)> {
        if client_id.is_empty() {
            return Err(TransportError::InvalidCredential(
                "client id cannot be empty".to_string(),
            ));
        }
        let identity = identity_from_subject(subject)?;
        let _transition = self.inner.transitions.lock().await;
        let conn_id = self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.inbox_capacity);

        let first = {
            let mut connections = self.inner.connections();
            let holder = connections
                .get(client_id)
                .map(|held| held.identity.as_str())
                .filter(|held| *held != identity);
            if let Some(holder) = holder {
                tracing::warn!(
                    client_id = %client_id,
                    identity = %identity,
                    holder = %holder,
                    "Refused takeover of client id held by another identity"
                );
                return Err(TransportError::ClientIdInUse {
                    client_id: client_id.to_string(),
                    identity,
                });
            }
            let first = !BrokerInner::is_live(&connections, &identity);
            let replaced = connections.insert(
                client_id.to_string(),
                Connection {
                    conn_id,
                    identity: identity.clone(),
                    filters: Vec::new(),
                    tx,
                },
            );
            if replaced.is_some() {
                tracing::info!(
                    client_id = %client_id,
                    identity = %identity,
                    "Client id taken over by new connection"
                );
            }
            first
        };

        tracing::debug!(client_id = %client_id, identity = %identity, "Client connected");
        if first {
            self.inner.notify_connect(&identity).await;
        }

        Ok((
            Session {
                inner: self.inner.clone(),
                client_id: client_id.to_string(),
                conn_id,
                identity,
            },
            Inbox { rx },
        ))
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.connections().len()
    }

    /// Messages dropped because a subscriber's inbox was full.
    pub fn dropped_messages(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

/// An authenticated client connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<BrokerInner>,
    client_id: String,
    conn_id: u64,
    identity: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.client_id)
            .field("identity", &self.identity)
            .finish()
    }
}

impl Session {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn unauthorized(&self, access: Access, topic: &str) -> TransportError {
        TransportError::Unauthorized {
            identity: self.identity.clone(),
            action: access.as_str(),
            topic: topic.to_string(),
        }
    }

    fn disconnected(&self) -> TransportError {
        TransportError::Disconnected(self.client_id.clone())
    }

    /// Add a subscription filter. Wildcards are reserved for the privileged identity.
    pub fn subscribe(&self, filter: &str) -> TransportResult<()> {
        if !is_valid_filter(filter) {
            return Err(TransportError::InvalidTopic(filter.to_string()));
        }
        if !self.inner.acl.allows(&self.identity, filter, Access::Read) {
            return Err(self.unauthorized(Access::Read, filter));
        }

        let mut connections = self.inner.connections();
        let conn = connections
            .get_mut(&self.client_id)
            .filter(|c| c.conn_id == self.conn_id)
            .ok_or_else(|| self.disconnected())?;
        if !conn.filters.iter().any(|f| f == filter) {
            conn.filters.push(filter.to_string());
        }
        Ok(())
    }

    /// Close the session. Idempotent; a session already taken over is left alone.
    pub async fn disconnect(&self) {
        let _transition = self.inner.transitions.lock().await;
        let last = {
            let mut connections = self.inner.connections();
            let current = connections
                .get(&self.client_id)
                .is_some_and(|c| c.conn_id == self.conn_id);
            if !current {
                return;
            }
            connections.remove(&self.client_id);
            !BrokerInner::is_live(&connections, &self.identity)
        };
        tracing::debug!(client_id = %self.client_id, identity = %self.identity, "Client disconnected");
        if last {
            self.inner.notify_disconnect(&self.identity).await;
        }
    }

    fn fan_out(&self, topic: &str, payload: Bytes) -> TransportResult<()> {
        let targets: Vec<mpsc::Sender<Message>> = {
            let connections = self.inner.connections();
            match connections.get(&self.client_id) {
                Some(conn) if conn.conn_id == self.conn_id => {}
                _ => return Err(self.disconnected()),
            }
            connections
                .values()
                .filter(|c| c.filters.iter().any(|f| filter_matches(f, topic)))
                .map(|c| c.tx.clone())
                .collect()
        };

        for tx in targets {
            let message = Message {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            match tx.try_send(message) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(topic = %topic, "Subscriber inbox full, message dropped");
                }
                // Receiver gone; its connection is being torn down.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PubSub for Session {
    async fn publish(&self, topic: &str, payload: Bytes) -> TransportResult<()> {
        if !is_valid_topic_name(topic) {
            return Err(TransportError::InvalidTopic(topic.to_string()));
        }
        if !self.inner.acl.allows(&self.identity, topic, Access::Write) {
            return Err(self.unauthorized(Access::Write, topic));
        }
        self.fan_out(topic, payload)
    }
}

/// Receiving side of a connection.
pub struct Inbox {
    rx: mpsc::Receiver<Message>,
}

impl Inbox {
    /// Next delivered message; `None` once the connection is closed or taken over.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`Inbox::recv`].
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_matching_subscribers_only() {
        let broker = MemoryBroker::new("desktop-service", 8);
        let (service, mut service_inbox) = broker
            .connect("svc", "CN=desktop-service")
            .await
            .unwrap();
        let (agent, mut agent_inbox) = broker.connect("agent-1", "UID=u1,CN=laptop").await.unwrap();

        service.subscribe("new_crawl/+").unwrap();
        agent.subscribe("crawl_req/u1").unwrap();

        agent
            .publish("new_crawl/u1", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        let msg = service_inbox.recv().await.unwrap();
        assert_eq!(msg.topic, "new_crawl/u1");

        service
            .publish("crawl_req/u2", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert!(agent_inbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn full_inbox_drops_without_blocking() {
        let broker = MemoryBroker::new("desktop-service", 1);
        let (service, _) = broker.connect("svc", "CN=desktop-service").await.unwrap();
        let (agent, mut inbox) = broker.connect("a", "UID=u1").await.unwrap();
        agent.subscribe("query_req/u1").unwrap();

        for _ in 0..3 {
            service
                .publish("query_req/u1", Bytes::from_static(b"x"))
                .await
                .unwrap();
        }
        assert_eq!(broker.dropped_messages(), 2);
        assert!(inbox.try_recv().is_some());
        assert!(inbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn takeover_closes_old_inbox() {
        let broker = MemoryBroker::new("desktop-service", 4);
        let (old, mut old_inbox) = broker.connect("dup", "UID=u1").await.unwrap();
        let (_new, _new_inbox) = broker.connect("dup", "UID=u1").await.unwrap();

        assert_eq!(broker.connection_count(), 1);
        assert!(old_inbox.recv().await.is_none());
        assert!(matches!(
            old.publish("new_crawl/u1", Bytes::new()).await,
            Err(TransportError::Disconnected(_))
        ));
        // The stale session must not tear down its replacement.
        old.disconnect().await;
        assert_eq!(broker.connection_count(), 1);
    }

    #[tokio::test]
    async fn foreign_identity_cannot_take_over_client_id() {
        let broker = MemoryBroker::new("desktop-service", 4);
        let (service, mut service_inbox) = broker
            .connect("desktop-service", "CN=desktop-service")
            .await
            .unwrap();

        let result = broker.connect("desktop-service", "UID=u1").await;
        assert!(matches!(
            result,
            Err(TransportError::ClientIdInUse { ref identity, .. }) if identity == "u1"
        ));

        assert_eq!(broker.connection_count(), 1);
        service.subscribe("new_crawl/+").unwrap();
        service
            .publish("new_crawl/u1", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert!(service_inbox.try_recv().is_some());
    }
}
