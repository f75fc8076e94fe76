//! Test fixtures for users, inventories and stored records.

use burrow_core::{Inventory, InventoryEntry, UserId};
use burrow_metadata::{MetadataStore, ReconcilePlan};
use sha2::{Digest, Sha256};
use std::time::Duration;
use time::OffsetDateTime;

/// Content hash for a test file.
#[allow(dead_code)]
pub fn sha256_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[allow(dead_code)]
pub fn file_hash(seed: &str) -> String {
    sha256_hash(seed.as_bytes())
}

#[allow(dead_code)]
pub fn user(id: &str) -> UserId {
    UserId::new(id).expect("valid test user id")
}

/// Build an inventory from `(path, hash)` pairs.
#[allow(dead_code)]
pub fn inventory<P: AsRef<str>, H: AsRef<str>>(pairs: &[(P, H)]) -> Inventory {
    Inventory::from_entries(
        pairs
            .iter()
            .map(|(path, hash)| InventoryEntry::new(path.as_ref(), hash.as_ref())),
    )
}

/// Create zeroed crawl stats for `user`.
#[allow(dead_code)]
pub async fn provision(store: &dyn MetadataStore, user: &UserId) {
    store
        .create_crawl_stats(user, OffsetDateTime::now_utc())
        .await
        .expect("Failed to create crawl stats");
}

/// Store `(path, hash)` records for `user` and mark them all done.
#[allow(dead_code)]
pub async fn seed_done_files<P: AsRef<str>, H: AsRef<str>>(
    store: &dyn MetadataStore,
    user: &UserId,
    files: &[(P, H)],
) {
    let plan = ReconcilePlan {
        inserts: files
            .iter()
            .map(|(path, hash)| InventoryEntry::new(path.as_ref(), hash.as_ref()))
            .collect(),
        ..ReconcilePlan::default()
    };
    store
        .apply_reconciliation(user, &plan, OffsetDateTime::now_utc())
        .await
        .expect("Failed to seed files");
    for (path, _) in files {
        let path = path.as_ref();
        let flipped = store
            .mark_file_done(user, path, OffsetDateTime::now_utc())
            .await
            .expect("Failed to mark seeded file done");
        assert_eq!(flipped, 1, "seeded file {path} was not pending");
    }
}

/// Stored `(path, hash, done)` triples for `user`, sorted by path.
#[allow(dead_code)]
pub async fn stored_files(store: &dyn MetadataStore, user: &UserId) -> Vec<(String, String, bool)> {
    let mut files: Vec<_> = store
        .list_files(user)
        .await
        .expect("Failed to list files")
        .into_iter()
        .map(|row| (row.file_path, row.file_hash, row.done))
        .collect();
    files.sort();
    files
}

/// Poll `check` until it returns true or `timeout` elapses.
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
