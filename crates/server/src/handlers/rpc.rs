//! Per-user RPC endpoints.

use crate::correlator::FetchError;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use burrow_core::{ChunkMetadata, TextChunkMessage, UserId};
use burrow_metadata::MetadataError;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

fn parse_user(user_id: String) -> ApiResult<UserId> {
    UserId::new(user_id).map_err(|e| ApiError::BadRequest(e.to_string()))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// POST /v1/users/{user_id}/stats - Provision zeroed crawl stats.
///
/// Not idempotent: a second call for the same user is a conflict.
pub async fn setup_user_stats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<(StatusCode, Json<SuccessResponse>)> {
    let user = parse_user(user_id)?;
    state
        .metadata
        .create_crawl_stats(&user, OffsetDateTime::now_utc())
        .await
        .map_err(|e| match e {
            MetadataError::AlreadyExists(_) => {
                ApiError::Conflict(format!("crawl stats already exist for user {user}"))
            }
            e => e.into(),
        })?;
    tracing::info!(user_id = %user, "Crawl stats provisioned");
    Ok((StatusCode::CREATED, Json(SuccessResponse { success: true })))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CrawlStatsResponse {
    pub crawled_files: i64,
    pub total_files: i64,
    pub crawling: bool,
    pub online: bool,
}

/// GET /v1/users/{user_id}/stats
pub async fn get_crawl_stats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<CrawlStatsResponse>> {
    let user = parse_user(user_id)?;
    let stats = state
        .metadata
        .get_crawl_stats(&user)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no crawl stats for user {user}")))?;
    Ok(Json(CrawlStatsResponse {
        crawled_files: stats.crawled_files,
        total_files: stats.total_files,
        crawling: stats.crawling,
        online: stats.online,
    }))
}

#[derive(Debug, Deserialize)]
pub struct OnlineStatusRequest {
    pub online: bool,
}

/// PUT /v1/users/{user_id}/online
pub async fn update_online_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<OnlineStatusRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    let user = parse_user(user_id)?;
    if !state
        .metadata
        .set_online(&user, body.online, OffsetDateTime::now_utc())
        .await?
    {
        return Err(ApiError::NotFound(format!("no crawl stats for user {user}")));
    }
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Deserialize)]
pub struct ChunksRequest {
    #[serde(default)]
    pub metadata: Vec<ChunkMetadata>,
    /// Wait bound in milliseconds. Absent or zero uses the configured default.
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunksResponse {
    pub chunks: Vec<TextChunkMessage>,
    pub num_chunks: usize,
    /// False when the agent was offline and no request was sent.
    pub online: bool,
    /// True when the agent did not answer within the TTL.
    pub timed_out: bool,
}

impl ChunksResponse {
    fn empty(online: bool, timed_out: bool) -> Self {
        Self {
            chunks: Vec::new(),
            num_chunks: 0,
            online,
            timed_out,
        }
    }
}

/// POST /v1/users/{user_id}/chunks - Fetch chunk text from the user's agent.
///
/// An offline agent or a timeout yields an empty result, never an error.
pub async fn get_chunks_from_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<ChunksRequest>,
) -> ApiResult<Json<ChunksResponse>> {
    let user = parse_user(user_id)?;

    let online = state
        .metadata
        .get_crawl_stats(&user)
        .await?
        .is_some_and(|stats| stats.online);
    if !online {
        metrics::record_chunk_fetch("offline");
        tracing::debug!(user_id = %user, "Agent offline, skipping chunk fetch");
        return Ok(Json(ChunksResponse::empty(false, false)));
    }

    let ttl = state.config.correlator.effective_ttl(body.ttl_ms);
    match state
        .correlator
        .fetch_chunks(&user, body.metadata, ttl)
        .await
    {
        Ok(chunks) => {
            metrics::record_chunk_fetch("delivered");
            Ok(Json(ChunksResponse {
                num_chunks: chunks.len(),
                chunks,
                online: true,
                timed_out: false,
            }))
        }
        Err(FetchError::Timeout { request_id, ttl }) => {
            metrics::record_chunk_fetch("timeout");
            tracing::info!(
                user_id = %user,
                request_id = %request_id,
                ttl_ms = ttl.as_millis() as u64,
                "Agent did not answer chunk request in time"
            );
            Ok(Json(ChunksResponse::empty(true, true)))
        }
        Err(FetchError::Abandoned(request_id)) => {
            metrics::record_chunk_fetch("abandoned");
            Err(ApiError::Unavailable(format!(
                "chunk request {request_id} abandoned"
            )))
        }
        Err(FetchError::Publish(e)) => {
            metrics::record_chunk_fetch("error");
            Err(e.into())
        }
        Err(FetchError::Encode(e)) => {
            metrics::record_chunk_fetch("error");
            Err(ApiError::Internal(e.to_string()))
        }
    }
}
