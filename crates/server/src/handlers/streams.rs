//! Log stream access for the embedding pipeline.
//!
//! The embedding side drains relayed chunks through a consumer group and
//! reports progress by appending completion signals.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use burrow_core::messages::{decode, encode};
use burrow_core::{Completion, CompletionSignal, TextChunkMessage};
use bytes::Bytes;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_BATCH: usize = 500;
const MAX_WAIT_MS: u64 = 30_000;
const MAX_GROUP_LEN: usize = 128;

#[derive(Debug, Serialize, Deserialize)]
pub struct AppendedResponse {
    pub partition: u32,
    pub offset: u64,
}

/// POST /v1/streams/signals - Append a completion signal.
pub async fn append_signal(
    State(state): State<AppState>,
    Json(signal): Json<CompletionSignal>,
) -> ApiResult<(StatusCode, Json<AppendedResponse>)> {
    let user = match signal.clone().classify() {
        Ok(Completion::File { user, .. } | Completion::Crawl { user }) => user,
        Err(e) => return Err(ApiError::BadRequest(e.to_string())),
    };
    let payload = encode(&signal)?;
    let position = state
        .log
        .append(
            &state.config.stream.signal_topic,
            Some(Bytes::copy_from_slice(user.as_str().as_bytes())),
            payload.into(),
        )
        .await?;
    tracing::debug!(
        user_id = %user,
        crawling_done = signal.crawling_done,
        partition = position.partition,
        offset = position.offset,
        "Completion signal appended"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(AppendedResponse {
            partition: position.partition,
            offset: position.offset,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ChunkReadParams {
    pub group: String,
    /// Records to return at most (default 100, capped at 500).
    pub max: Option<usize>,
    /// How long to wait for the first record (default 0).
    pub wait_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub partition: u32,
    pub offset: u64,
    pub chunk: TextChunkMessage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkBatch {
    pub records: Vec<ChunkRecord>,
}

/// GET /v1/streams/chunks - Read the next relayed chunks for a consumer group.
///
/// Offsets are committed as records are handed out, so a batch lost in
/// transit is not redelivered.
pub async fn read_chunks(
    State(state): State<AppState>,
    Query(params): Query<ChunkReadParams>,
) -> ApiResult<Json<ChunkBatch>> {
    if params.group.is_empty() || params.group.len() > MAX_GROUP_LEN {
        return Err(ApiError::BadRequest(format!(
            "group must be 1 to {MAX_GROUP_LEN} bytes"
        )));
    }
    if params.group == state.config.stream.signal_group {
        return Err(ApiError::BadRequest(
            "group name is reserved for the completion consumer".to_string(),
        ));
    }
    let max = params.max.unwrap_or(100).clamp(1, MAX_BATCH);
    let wait = Duration::from_millis(params.wait_ms.unwrap_or(0).min(MAX_WAIT_MS));
    let topic = state.config.stream.chunk_topic.as_str();

    let mut records = Vec::new();
    let first = if wait.is_zero() {
        state.log.read(topic, &params.group).now_or_never()
    } else {
        tokio::time::timeout(wait, state.log.read(topic, &params.group))
            .await
            .ok()
    };
    let mut next = first;
    let mut taken = 0;
    while let Some(record) = next {
        let record = record?;
        taken += 1;
        match decode::<TextChunkMessage>(&record.payload) {
            Ok(chunk) => records.push(ChunkRecord {
                partition: record.position.partition,
                offset: record.position.offset,
                chunk,
            }),
            Err(e) => tracing::warn!(
                partition = record.position.partition,
                offset = record.position.offset,
                error = %e,
                "Skipping undecodable chunk record"
            ),
        }
        if taken >= max {
            break;
        }
        next = state.log.read(topic, &params.group).now_or_never();
    }

    Ok(Json(ChunkBatch { records }))
}
