//! Service token authentication for the RPC surface.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};

/// Extract bearer token from Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(&v[7..])
            } else {
                None
            }
        })
}

/// SHA256 hex of a token, as stored in `server.service_token_hash`.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of two hex digests.
fn digests_match(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x.to_ascii_lowercase() ^ y.to_ascii_lowercase()))
            == 0
}

/// Require the configured service token on every RPC.
///
/// With no `service_token_hash` configured the surface is open.
pub async fn service_auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.config.server.service_token_hash.as_deref() {
        let token = extract_bearer_token(&req)
            .ok_or_else(|| ApiError::Unauthorized("bearer token required".to_string()))?;
        if !digests_match(&hash_token(token), expected) {
            tracing::warn!(path = %req.uri().path(), "Rejected RPC with invalid service token");
            return Err(ApiError::Unauthorized("invalid service token".to_string()));
        }
    }
    Ok(next.run(req).await)
}
