//! Routes agent messages received by the backend session.
//!
//! The backend subscribes to every user's `new_crawl`, `new_chunk` and
//! `query_res` topics. Announcements are reconciled on their own task so
//! users proceed in parallel; chunks and responses are handled inline.

use crate::correlator::Correlator;
use crate::reconcile::{ReconcileEngine, ReconcileOutcome};
use crate::relay::ChunkRelay;
use burrow_core::messages::decode;
use burrow_core::{QueryResponse, Topic, TopicKind};
use burrow_transport::{Inbox, Message, Session, TransportResult};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Topic kinds the backend consumes.
pub const CONSUMED_KINDS: [TopicKind; 3] =
    [TopicKind::NewCrawl, TopicKind::NewChunk, TopicKind::QueryRes];

#[derive(Clone)]
pub struct Dispatcher {
    reconciler: Arc<ReconcileEngine>,
    correlator: Arc<Correlator>,
    relay: Arc<ChunkRelay>,
}

impl Dispatcher {
    pub fn new(
        reconciler: Arc<ReconcileEngine>,
        correlator: Arc<Correlator>,
        relay: Arc<ChunkRelay>,
    ) -> Self {
        Self {
            reconciler,
            correlator,
            relay,
        }
    }

    /// Subscribe the backend session to every consumed topic.
    pub fn subscribe(session: &Session) -> TransportResult<()> {
        for kind in CONSUMED_KINDS {
            session.subscribe(&kind.all_users_filter())?;
        }
        Ok(())
    }

    /// Handle one delivered message.
    ///
    /// Returns the reconciliation task when the message was an announcement.
    pub async fn dispatch(&self, message: Message) -> Option<JoinHandle<()>> {
        let topic = match Topic::parse(&message.topic) {
            Ok(topic) => topic,
            Err(e) => {
                tracing::warn!(topic = %message.topic, error = %e, "Dropping message on unparseable topic");
                return None;
            }
        };

        match topic.kind {
            TopicKind::NewCrawl => {
                let reconciler = self.reconciler.clone();
                Some(tokio::spawn(async move {
                    tracing::info!(user_id = %topic.user, "Received inventory announcement");
                    match reconciler
                        .handle_announcement(&topic.user, &message.payload)
                        .await
                    {
                        Ok(ReconcileOutcome::Committed(report)) => tracing::debug!(
                            user_id = %topic.user,
                            requested = report.counts.inserted,
                            published = report.published,
                            "Announcement reconciled"
                        ),
                        Ok(_) => {}
                        Err(e) => tracing::warn!(
                            user_id = %topic.user,
                            error = %e,
                            "Announcement dropped"
                        ),
                    }
                }))
            }
            TopicKind::NewChunk => {
                if let Err(e) = self.relay.relay(&topic.user, &message.payload).await {
                    tracing::warn!(user_id = %topic.user, error = %e, "Chunk dropped");
                }
                None
            }
            TopicKind::QueryRes => {
                match decode::<QueryResponse>(&message.payload) {
                    Ok(response) => {
                        self.correlator.deliver(&topic.user, response).await;
                    }
                    Err(e) => {
                        tracing::warn!(user_id = %topic.user, error = %e, "Malformed chunk response dropped");
                    }
                }
                None
            }
            kind => {
                tracing::warn!(topic = %message.topic, kind = %kind, "Unexpected topic kind, dropping");
                None
            }
        }
    }

    /// Drain the backend inbox until `shutdown` fires or the session ends.
    pub fn spawn(self, mut inbox: Inbox, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Transport dispatcher started");
            loop {
                let message = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    message = inbox.recv() => message,
                };
                match message {
                    Some(message) => {
                        self.dispatch(message).await;
                    }
                    None => {
                        tracing::error!("Backend transport session closed");
                        break;
                    }
                }
            }
            tracing::info!("Transport dispatcher stopped");
        })
    }
}
