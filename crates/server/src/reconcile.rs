//! Crawl reconciliation.
//!
//! An agent announces its full `(path, hash)` inventory on `new_crawl/{user}`.
//! The engine claims the user's crawl flag, diffs the inventory against the
//! stored records, applies deletes, renames and pending inserts in one
//! transaction and then asks the agent for the files it still needs on
//! `crawl_req/{user}`.
//!
//! The crawl flag stays set after a successful pass. It is cleared by the
//! agent's crawl-done signal (see [`crate::completion`]) or by the reaper.

use crate::metrics;
use crate::vector::VectorIndex;
use burrow_core::messages::{decode, encode};
use burrow_core::{CrawlRequest, Inventory, NewCrawl, Topic, TopicKind, UserId};
use burrow_metadata::{
    CrawlClaim, FileRecordRow, MetadataError, MetadataStore, ReconcileCounts, ReconcilePlan,
    RenameOp,
};
use burrow_transport::PubSub;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;

/// Errors that abort a reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The announcement could not be decoded. Nothing was claimed or written.
    #[error("malformed announcement: {0}")]
    Malformed(#[from] burrow_core::Error),

    /// Storage failed. The transaction rolled back and the claim was released.
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

/// What a committed pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Files asked of the agent, in inventory order.
    pub requested: CrawlRequest,
    pub counts: ReconcileCounts,
    /// Whether the `crawl_req` publish succeeded.
    pub published: bool,
    /// Paths dropped because a later path reported the same hash.
    pub shadowed: usize,
}

/// Result of one announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Another pass holds the crawl flag; the announcement was discarded.
    AlreadyCrawling,
    /// No stats row exists for the user; the announcement was discarded.
    UnknownUser,
    Committed(ReconcileReport),
}

/// Diff stored records against an announced inventory.
///
/// A stored record survives only if it is done and its hash is still
/// announced; it then takes the path the agent now reports for that hash.
/// Every announced hash without a survivor is fetched again.
pub fn plan(stored: &[FileRecordRow], inventory: &Inventory) -> ReconcilePlan {
    let mut kept: HashMap<&str, Option<&str>> = HashMap::new();
    let mut keep_hashes = Vec::new();

    for record in stored.iter().filter(|record| record.done) {
        let Some(new_path) = inventory.path_for_hash(&record.file_hash) else {
            continue;
        };
        let stale_path = (record.file_path != new_path).then_some(record.file_path.as_str());
        match kept.get_mut(record.file_hash.as_str()) {
            Some(slot) => {
                if slot.is_none() {
                    *slot = stale_path;
                }
            }
            None => {
                kept.insert(&record.file_hash, stale_path);
                keep_hashes.push(record.file_hash.clone());
            }
        }
    }

    let renames = keep_hashes
        .iter()
        .filter_map(|hash| {
            let old_path = kept.get(hash.as_str()).copied().flatten()?;
            let new_path = inventory.path_for_hash(hash)?;
            Some(RenameOp {
                old_path: old_path.to_string(),
                new_path: new_path.to_string(),
                hash: hash.clone(),
            })
        })
        .collect();

    let inserts = inventory
        .entries()
        .iter()
        .filter(|entry| !kept.contains_key(entry.hash.as_str()))
        .cloned()
        .collect();

    ReconcilePlan {
        keep_hashes,
        renames,
        inserts,
    }
}

/// Runs reconciliation passes against the metadata store.
pub struct ReconcileEngine {
    metadata: Arc<dyn MetadataStore>,
    publisher: Arc<dyn PubSub>,
    vectors: Arc<dyn VectorIndex>,
}

impl ReconcileEngine {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        publisher: Arc<dyn PubSub>,
        vectors: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            metadata,
            publisher,
            vectors,
        }
    }

    /// Decode a `new_crawl` payload and reconcile it.
    ///
    /// The payload is validated before the crawl flag is claimed, so a
    /// malformed announcement never leaves the flag set.
    pub async fn handle_announcement(
        &self,
        user: &UserId,
        payload: &[u8],
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let inventory = decode::<NewCrawl>(payload)
            .and_then(NewCrawl::into_inventory)
            .inspect_err(|_| metrics::record_reconciliation("malformed"))?;
        self.reconcile(user, &inventory).await
    }

    /// Claim the user's crawl and run one pass.
    pub async fn reconcile(
        &self,
        user: &UserId,
        inventory: &Inventory,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        match self
            .metadata
            .try_claim_crawl(user, OffsetDateTime::now_utc())
            .await?
        {
            CrawlClaim::Claimed => {}
            CrawlClaim::AlreadyCrawling => {
                tracing::info!(user_id = %user, "Crawl already in progress, ignoring announcement");
                metrics::record_reconciliation("already_crawling");
                return Ok(ReconcileOutcome::AlreadyCrawling);
            }
            CrawlClaim::UnknownUser => {
                tracing::warn!(user_id = %user, "Announcement from user without crawl stats");
                metrics::record_reconciliation("unknown_user");
                return Ok(ReconcileOutcome::UnknownUser);
            }
        }

        match self.run_claimed(user, inventory).await {
            Ok(report) => {
                metrics::record_reconciliation("committed");
                Ok(ReconcileOutcome::Committed(report))
            }
            Err(e) => {
                metrics::record_reconciliation("failed");
                tracing::error!(user_id = %user, error = %e, "Reconciliation failed, releasing crawl");
                if let Err(release_err) = self
                    .metadata
                    .release_crawl(user, OffsetDateTime::now_utc())
                    .await
                {
                    tracing::error!(
                        user_id = %user,
                        error = %release_err,
                        "Failed to release crawl after failed reconciliation"
                    );
                }
                Err(e)
            }
        }
    }

    async fn run_claimed(
        &self,
        user: &UserId,
        inventory: &Inventory,
    ) -> Result<ReconcileReport, ReconcileError> {
        let shadowed = inventory.shadowed().len();
        if shadowed > 0 {
            // FIXME: duplicate content under several paths tracks only the last path.
            tracing::warn!(
                user_id = %user,
                shadowed,
                "Inventory reports one hash under several paths; only the last path is tracked"
            );
        }

        let stored = self.metadata.list_files(user).await?;
        let plan = plan(&stored, inventory);
        let counts = self
            .metadata
            .apply_reconciliation(user, &plan, OffsetDateTime::now_utc())
            .await?;

        tracing::info!(
            user_id = %user,
            announced = inventory.len(),
            kept = plan.keep_hashes.len(),
            deleted = counts.deleted,
            renamed = counts.renamed,
            requested = counts.inserted,
            total_files = counts.total_files,
            "Reconciliation committed"
        );
        metrics::FILES_REQUESTED.inc_by(counts.inserted);

        let keep_paths: Vec<String> = plan
            .keep_hashes
            .iter()
            .filter_map(|hash| inventory.path_for_hash(hash))
            .map(str::to_string)
            .collect();
        if let Err(e) = self.vectors.delete_files_except(user, &keep_paths).await {
            tracing::warn!(user_id = %user, error = %e, "Failed to prune vectors of removed files");
        }

        let requested = CrawlRequest::from_entries(&plan.inserts);
        let published = self.publish_request(user, &requested).await;

        Ok(ReconcileReport {
            requested,
            counts,
            published,
            shadowed,
        })
    }

    /// Send `crawl_req/{user}`. Failures are logged; the committed state stands.
    async fn publish_request(&self, user: &UserId, request: &CrawlRequest) -> bool {
        let topic = Topic::new(TopicKind::CrawlReq, user.clone()).to_string();
        let payload = match encode(request) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(user_id = %user, error = %e, "Failed to encode crawl request");
                return false;
            }
        };
        match self.publisher.publish(&topic, payload.into()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    user_id = %user,
                    error = %e,
                    "Failed to publish crawl request; agent must re-announce"
                );
                false
            }
        }
    }
}
