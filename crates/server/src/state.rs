//! Application state shared across handlers and background tasks.

use crate::correlator::Correlator;
use crate::dispatch::Dispatcher;
use crate::hooks::OnlineStatusHook;
use crate::reconcile::ReconcileEngine;
use crate::relay::ChunkRelay;
use crate::vector::VectorIndex;
use burrow_core::config::AppConfig;
use burrow_metadata::MetadataStore;
use burrow_transport::{
    Inbox, LogStream, MemoryBroker, PubSub, Session, TransportResult, broker_from_config,
    subject_for_identity,
};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Pub/sub broker agents connect to.
    pub broker: MemoryBroker,
    /// The backend's own broker session.
    pub session: Session,
    /// Chunk and completion log.
    pub log: Arc<dyn LogStream>,
    pub reconciler: Arc<ReconcileEngine>,
    pub correlator: Arc<Correlator>,
    pub relay: Arc<ChunkRelay>,
}

impl AppState {
    /// Wire up the broker, the backend session and the engines.
    ///
    /// Returns the backend session's inbox; feed it to [`AppState::dispatcher`].
    pub async fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        log: Arc<dyn LogStream>,
        vectors: Arc<dyn VectorIndex>,
    ) -> TransportResult<(Self, Inbox)> {
        let broker = broker_from_config(&config.transport)?;
        broker.add_hook(Arc::new(OnlineStatusHook::new(
            metadata.clone(),
            config.transport.service_identity.clone(),
        )));

        let (session, inbox) = broker
            .connect(
                &config.transport.client_id,
                &subject_for_identity(&config.transport.service_identity),
            )
            .await?;
        Dispatcher::subscribe(&session)?;

        let publisher: Arc<dyn PubSub> = Arc::new(session.clone());
        let reconciler = Arc::new(ReconcileEngine::new(
            metadata.clone(),
            publisher.clone(),
            vectors,
        ));
        let correlator = Arc::new(Correlator::new(
            publisher,
            config.correlator.response_grace(),
        ));
        let relay = Arc::new(ChunkRelay::new(log.clone(), config.stream.chunk_topic.clone()));

        let state = Self {
            config: Arc::new(config),
            metadata,
            broker,
            session,
            log,
            reconciler,
            correlator,
            relay,
        };
        Ok((state, inbox))
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.reconciler.clone(),
            self.correlator.clone(),
            self.relay.clone(),
        )
    }
}
