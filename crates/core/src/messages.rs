//! Wire payloads exchanged with desktop agents and the completion stream.
//!
//! All payloads are JSON. Field names are stable and shared with agents.

use crate::inventory::{Inventory, InventoryEntry};
use crate::user::UserId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Decode a JSON payload.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> crate::Result<T> {
    Ok(serde_json::from_slice(payload)?)
}

/// Encode a payload as JSON bytes.
pub fn encode<T: Serialize>(value: &T) -> crate::Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| crate::Error::Serialization(e.to_string()))
}

/// Full inventory announcement published on `new_crawl/{user}`.
///
/// Both arrays are required. An empty inventory deletes every stored record,
/// so it must be sent explicitly rather than implied by missing fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCrawl {
    pub file_paths: Vec<String>,
    pub file_hashes: Vec<String>,
}

impl NewCrawl {
    pub fn into_inventory(self) -> crate::Result<Inventory> {
        Inventory::from_parallel(self.file_paths, self.file_hashes)
    }
}

/// Files the backend needs, published on `crawl_req/{user}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub file_paths: Vec<String>,
    pub file_hashes: Vec<String>,
}

impl CrawlRequest {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a InventoryEntry>) -> Self {
        let (file_paths, file_hashes): (Vec<String>, Vec<String>) = entries
            .into_iter()
            .map(|e| (e.path.clone(), e.hash.clone()))
            .unzip();
        Self {
            file_paths,
            file_hashes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.file_paths.is_empty()
    }
}

/// Metadata attached to a text chunk.
///
/// Unknown fields are carried through untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub start: u64,
    #[serde(default)]
    pub end: u64,
    #[serde(default)]
    pub chunk_id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One chunk of extracted text, published on `new_chunk/{user}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TextChunkMessage {
    pub content: String,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

/// Chunk pull request, published on `query_req/{user}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub request_id: String,
    #[serde(default)]
    pub requested_chunk_metadatas: Vec<ChunkMetadata>,
}

/// Agent reply to a [`QueryRequest`], published on `query_res/{user}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub request_id: String,
    #[serde(default)]
    pub text_chunks: Vec<TextChunkMessage>,
}

/// Record read from the completion signal stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSignal {
    pub user_id: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub crawling_done: bool,
}

/// A validated completion signal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    /// One file has been fully chunked and embedded.
    File { user: UserId, path: String },
    /// The agent finished the crawl. `file_path` is ignored.
    Crawl { user: UserId },
}

impl CompletionSignal {
    pub fn file(user: &UserId, path: impl Into<String>) -> Self {
        Self {
            user_id: user.to_string(),
            file_path: path.into(),
            crawling_done: false,
        }
    }

    pub fn crawl_done(user: &UserId) -> Self {
        Self {
            user_id: user.to_string(),
            file_path: String::new(),
            crawling_done: true,
        }
    }

    /// Validate and classify the signal.
    pub fn classify(self) -> crate::Result<Completion> {
        let user = UserId::new(self.user_id)?;
        if self.crawling_done {
            return Ok(Completion::Crawl { user });
        }
        if self.file_path.is_empty() {
            return Err(crate::Error::MalformedPayload(
                "file completion without file_path".to_string(),
            ));
        }
        Ok(Completion::File {
            user,
            path: self.file_path,
        })
    }
}
