//! Idle-crawl reaper.
//!
//! The crawl flag normally clears on the agent's crawl-done signal. An agent
//! that crashes or disconnects mid-crawl never sends one, so a periodic sweep
//! releases every crawl whose stats row has not been written for longer than
//! the idle threshold.

use crate::metrics;
use burrow_core::config::ReaperConfig;
use burrow_metadata::{MetadataResult, MetadataStore};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub struct Reaper {
    metadata: Arc<dyn MetadataStore>,
    config: ReaperConfig,
}

impl Reaper {
    pub fn new(metadata: Arc<dyn MetadataStore>, config: ReaperConfig) -> Self {
        Self { metadata, config }
    }

    /// Release crawls idle as of `now`. Returns the number released.
    pub async fn sweep_once(&self, now: OffsetDateTime) -> MetadataResult<u64> {
        let cutoff = now - self.config.idle_threshold();
        let released = self.metadata.release_idle_crawls(cutoff, now).await?;
        if released > 0 {
            metrics::CRAWLS_REAPED.inc_by(released);
            tracing::warn!(released, cutoff = %cutoff, "Released idle crawls");
        } else {
            tracing::debug!("No idle crawls to release");
        }
        Ok(released)
    }

    /// Sweep on the configured interval until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; startup already released everything.
            ticker.tick().await;

            tracing::info!(
                interval_secs = self.config.interval_secs,
                idle_threshold_secs = self.config.idle_threshold_secs,
                "Idle-crawl reaper started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = self.sweep_once(OffsetDateTime::now_utc()).await {
                    tracing::error!(error = %e, "Idle-crawl sweep failed");
                }
            }

            tracing::info!("Idle-crawl reaper stopped");
        })
    }
}

/// Release every crawl.
///
/// Run at startup and on shutdown: no reconciliation or agent session
/// survives a process restart.
pub async fn release_all(metadata: &dyn MetadataStore, reason: &'static str) -> MetadataResult<u64> {
    let released = metadata
        .release_all_crawls(OffsetDateTime::now_utc())
        .await?;
    tracing::info!(released, reason, "Released all crawls");
    Ok(released)
}
