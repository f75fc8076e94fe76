//! Server test utilities.

use burrow_core::UserId;
use burrow_core::config::{AppConfig, MetadataConfig};
use burrow_metadata::{MetadataStore, SqliteStore};
use burrow_server::vector::NoopVectorIndex;
use burrow_server::{AppState, create_router};
use burrow_transport::{Inbox, LogStream, Session, log_from_config};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub log: Arc<dyn LogStream>,
    shutdown: CancellationToken,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with a temporary SQLite database and a
    /// running transport dispatcher.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig::for_testing();
        config.metadata = MetadataConfig::Sqlite {
            path: db_path,
            query_timeout_secs: None,
        };
        modifier(&mut config);

        let log = log_from_config(&config.stream).expect("Failed to create log");
        let (state, inbox) =
            AppState::new(config, metadata, log.clone(), Arc::new(NoopVectorIndex))
                .await
                .expect("Failed to create app state");

        let shutdown = CancellationToken::new();
        state.dispatcher().spawn(inbox, shutdown.clone());
        let router = create_router(state.clone());

        Self {
            router,
            state,
            log,
            shutdown,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Connect an agent for `user` as its certificate subject would.
    pub async fn connect_agent(&self, user: &UserId) -> (Session, Inbox) {
        self.state
            .broker
            .connect(&format!("agent-{user}"), &format!("UID={user},CN=laptop"))
            .await
            .expect("Failed to connect agent")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
