//! WebSocket gateway for desktop agents.
//!
//! Agents authenticate with a client certificate at the TLS-terminating
//! proxy, which forwards the verified subject in a configured header. Each
//! socket becomes one broker session; every ACL check happens in the broker.
//!
//! Frames are JSON text:
//!
//! ```text
//! -> {"op":"subscribe","topic":"crawl_req/u1"}
//! -> {"op":"publish","topic":"new_crawl/u1","payload":{...}}
//! <- {"op":"message","topic":"crawl_req/u1","payload":{...}}
//! <- {"op":"error","message":"..."}
//! ```

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use burrow_transport::{Inbox, Message, PubSub, Session, identity_from_subject};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe {
        topic: String,
    },
    Publish {
        topic: String,
        payload: serde_json::Value,
    },
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServerFrame {
    Message {
        topic: String,
        payload: serde_json::Value,
    },
    Error {
        message: String,
    },
}

impl ServerFrame {
    fn from_delivery(message: &Message) -> Self {
        match serde_json::from_slice(&message.payload) {
            Ok(payload) => Self::Message {
                topic: message.topic.clone(),
                payload,
            },
            // Payloads published through the broker are always JSON.
            Err(_) => Self::Message {
                topic: message.topic.clone(),
                payload: serde_json::Value::String(
                    String::from_utf8_lossy(&message.payload).into_owned(),
                ),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Suffix for the broker client id, which is always `agent-{identity}`
    /// or `agent-{identity}/{client_id}`. A second socket with the same id
    /// takes over.
    pub client_id: Option<String>,
}

/// GET /v1/agent/connect
pub async fn agent_connect(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let header = state
        .config
        .server
        .agent_identity_header
        .as_deref()
        .ok_or_else(|| ApiError::NotFound("agent gateway is disabled".to_string()))?;
    let subject = headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing client certificate subject".to_string()))?;

    let client_id = agent_client_id(&identity_from_subject(subject)?, params.client_id.as_deref());
    let (session, inbox) = state.broker.connect(&client_id, subject).await?;
    tracing::info!(
        client_id = %session.client_id(),
        identity = %session.identity(),
        "Agent connected"
    );

    Ok(ws.on_upgrade(move |socket| serve_socket(socket, session, inbox)))
}

/// Broker client id for an agent socket, scoped to its identity.
pub fn agent_client_id(identity: &str, suffix: Option<&str>) -> String {
    match suffix.filter(|s| !s.is_empty()) {
        Some(suffix) => format!("agent-{identity}/{suffix}"),
        None => format!("agent-{identity}"),
    }
}

async fn serve_socket(socket: WebSocket, session: Session, mut inbox: Inbox) {
    let (mut sink, mut stream) = socket.split();

    loop {
        let outgoing = tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => handle_frame(&session, text.as_str()).await,
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => None,
                Some(Err(e)) => {
                    tracing::debug!(client_id = %session.client_id(), error = %e, "Agent socket error");
                    break;
                }
            },
            delivery = inbox.recv() => match delivery {
                Some(message) => Some(ServerFrame::from_delivery(&message)),
                None => {
                    tracing::info!(client_id = %session.client_id(), "Agent session taken over");
                    break;
                }
            },
        };

        if let Some(frame) = outgoing {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode gateway frame");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    }

    session.disconnect().await;
    tracing::info!(client_id = %session.client_id(), identity = %session.identity(), "Agent disconnected");
}

/// Apply one client frame. Returns an error frame to send back, if any.
pub async fn handle_frame(session: &Session, text: &str) -> Option<ServerFrame> {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            return Some(ServerFrame::Error {
                message: format!("malformed frame: {e}"),
            });
        }
    };

    let result = match frame {
        ClientFrame::Subscribe { topic } => session.subscribe(&topic),
        ClientFrame::Publish { topic, payload } => match serde_json::to_vec(&payload) {
            Ok(bytes) => session.publish(&topic, bytes.into()).await,
            Err(e) => {
                return Some(ServerFrame::Error {
                    message: format!("unencodable payload: {e}"),
                });
            }
        },
    };

    match result {
        Ok(()) => None,
        Err(e) => {
            tracing::warn!(identity = %session.identity(), error = %e, "Agent frame rejected");
            Some(ServerFrame::Error {
                message: e.to_string(),
            })
        }
    }
}
