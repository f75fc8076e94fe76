//! Transport connection hooks.

use async_trait::async_trait;
use burrow_core::UserId;
use burrow_metadata::MetadataStore;
use burrow_transport::ConnectionHook;
use std::sync::Arc;
use time::OffsetDateTime;

/// Mirrors agent connections into the `online` flag of crawl stats.
pub struct OnlineStatusHook {
    metadata: Arc<dyn MetadataStore>,
    service_identity: String,
}

impl OnlineStatusHook {
    pub fn new(metadata: Arc<dyn MetadataStore>, service_identity: impl Into<String>) -> Self {
        Self {
            metadata,
            service_identity: service_identity.into(),
        }
    }

    async fn update(&self, identity: &str, online: bool) {
        if identity == self.service_identity {
            return;
        }
        let user = match UserId::new(identity) {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "Connection identity is not a user id");
                return;
            }
        };
        match self
            .metadata
            .set_online(&user, online, OffsetDateTime::now_utc())
            .await
        {
            Ok(true) => tracing::debug!(user_id = %user, online, "Online status updated"),
            Ok(false) => tracing::warn!(user_id = %user, "Connected user has no crawl stats"),
            Err(e) => tracing::error!(user_id = %user, error = %e, "Failed to update online status"),
        }
    }
}

#[async_trait]
impl ConnectionHook for OnlineStatusHook {
    async fn on_connect(&self, identity: &str) {
        self.update(identity, true).await;
    }

    async fn on_disconnect(&self, identity: &str) {
        self.update(identity, false).await;
    }
}
