//! Completion signal consumer.
//!
//! Reads `{user_id, file_path, crawling_done}` records from the signal log.
//! A file signal marks one pending record done and bumps the user's crawled
//! counter. A crawl-done signal clears the user's crawl flag. Records that
//! fail to decode are logged and skipped.

use crate::metrics;
use burrow_core::messages::decode;
use burrow_core::{Completion, CompletionSignal};
use burrow_metadata::{MetadataError, MetadataStore};
use burrow_transport::LogStream;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// Pause after a log read error before trying again.
const READ_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("malformed completion signal: {0}")]
    Malformed(#[from] burrow_core::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

/// Effect of one signal on the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionApplied {
    /// A pending record was marked done.
    FileDone,
    /// No pending record matched; nothing was written.
    FileNotPending,
    CrawlReleased,
    /// Crawl-done for a user without crawl stats.
    UnknownUser,
}

pub struct CompletionConsumer {
    metadata: Arc<dyn MetadataStore>,
    log: Arc<dyn LogStream>,
    topic: String,
    group: String,
}

impl CompletionConsumer {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        log: Arc<dyn LogStream>,
        topic: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            metadata,
            log,
            topic: topic.into(),
            group: group.into(),
        }
    }

    /// Apply one raw signal.
    pub async fn handle(&self, payload: &[u8]) -> Result<CompletionApplied, CompletionError> {
        let completion = decode::<CompletionSignal>(payload).and_then(CompletionSignal::classify)?;
        self.apply(completion).await
    }

    pub async fn apply(&self, completion: Completion) -> Result<CompletionApplied, CompletionError> {
        let now = OffsetDateTime::now_utc();
        match completion {
            Completion::File { user, path } => {
                let flipped = self.metadata.mark_file_done(&user, &path, now).await?;
                if flipped == 0 {
                    tracing::debug!(
                        user_id = %user,
                        file_path = %path,
                        "Completion for a file that is not pending, ignoring"
                    );
                    metrics::record_completion("file_not_pending");
                    return Ok(CompletionApplied::FileNotPending);
                }
                metrics::record_completion("file");
                Ok(CompletionApplied::FileDone)
            }
            Completion::Crawl { user } => {
                if !self.metadata.release_crawl(&user, now).await? {
                    tracing::warn!(user_id = %user, "Crawl-done signal for unknown user");
                    metrics::record_completion("unknown_user");
                    return Ok(CompletionApplied::UnknownUser);
                }
                tracing::info!(user_id = %user, "Crawl finished");
                metrics::record_completion("crawl");
                Ok(CompletionApplied::CrawlReleased)
            }
        }
    }

    /// Consume until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            topic = %self.topic,
            group = %self.group,
            backend = self.log.backend_name(),
            "Completion consumer started"
        );

        loop {
            let record = tokio::select! {
                _ = shutdown.cancelled() => break,
                record = self.log.read(&self.topic, &self.group) => record,
            };

            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read completion signal");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(READ_RETRY_DELAY) => continue,
                    }
                }
            };

            match self.handle(&record.payload).await {
                Ok(_) => {}
                Err(CompletionError::Malformed(e)) => {
                    metrics::record_completion("malformed");
                    tracing::warn!(
                        partition = record.position.partition,
                        offset = record.position.offset,
                        error = %e,
                        "Skipping malformed completion signal"
                    );
                }
                Err(CompletionError::Metadata(e)) => {
                    tracing::error!(
                        partition = record.position.partition,
                        offset = record.position.offset,
                        error = %e,
                        "Failed to apply completion signal"
                    );
                }
            }
        }

        tracing::info!("Completion consumer stopped");
    }
}
