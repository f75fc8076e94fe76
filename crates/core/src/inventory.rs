//! Client file inventories.
//!
//! Agents announce their inventory as two parallel arrays. Internally the
//! snapshot becomes an ordered sequence of `(path, hash)` pairs keyed by hash.

use std::collections::HashMap;

/// One file reported by an agent.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InventoryEntry {
    pub path: String,
    pub hash: String,
}

impl InventoryEntry {
    pub fn new(path: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
        }
    }
}

/// A hash-keyed snapshot of an agent's files.
///
/// Duplicate hashes resolve last-wins: the path reported last for a hash is
/// the one tracked, and earlier paths are kept aside in [`Inventory::shadowed`]
/// so callers can report them. Entry order follows the first appearance of
/// each hash.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Inventory {
    entries: Vec<InventoryEntry>,
    index: HashMap<String, usize>,
    shadowed: Vec<InventoryEntry>,
}

impl Inventory {
    /// Build from the parallel arrays sent on the wire.
    pub fn from_parallel(paths: Vec<String>, hashes: Vec<String>) -> crate::Result<Self> {
        if paths.len() != hashes.len() {
            return Err(crate::Error::InventoryLengthMismatch {
                paths: paths.len(),
                hashes: hashes.len(),
            });
        }
        Ok(Self::from_entries(
            paths
                .into_iter()
                .zip(hashes)
                .map(|(path, hash)| InventoryEntry { path, hash }),
        ))
    }

    /// Build from already-paired entries.
    pub fn from_entries(entries: impl IntoIterator<Item = InventoryEntry>) -> Self {
        let mut inventory = Self::default();
        for entry in entries {
            inventory.insert(entry);
        }
        inventory
    }

    fn insert(&mut self, entry: InventoryEntry) {
        match self.index.get(&entry.hash) {
            Some(&slot) => {
                // FIXME: last-wins drops the earlier path from tracking entirely.
                // Retaining every path per hash needs a product decision first.
                let previous = std::mem::replace(&mut self.entries[slot], entry);
                if previous.path != self.entries[slot].path {
                    self.shadowed.push(previous);
                }
            }
            None => {
                self.index.insert(entry.hash.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Entries in first-appearance order, one per distinct hash.
    pub fn entries(&self) -> &[InventoryEntry] {
        &self.entries
    }

    /// Path currently tracked for `hash`.
    pub fn path_for_hash(&self, hash: &str) -> Option<&str> {
        self.index
            .get(hash)
            .map(|&slot| self.entries[slot].path.as_str())
    }

    pub fn contains_hash(&self, hash: &str) -> bool {
        self.index.contains_key(hash)
    }

    /// Entries whose path lost to a later path with the same hash.
    pub fn shadowed(&self) -> &[InventoryEntry] {
        &self.shadowed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
