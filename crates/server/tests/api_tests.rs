//! Integration tests for HTTP API endpoints.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use burrow_core::messages::{decode, encode};
use burrow_core::{ChunkMetadata, CrawlRequest, QueryRequest, QueryResponse, TextChunkMessage};
use burrow_server::auth::hash_token;
use burrow_transport::{LogStream, PubSub};
use common::{TestServer, file_hash, user, wait_until};
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceExt;

/// Helper to make JSON requests.
async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    auth_token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = auth_token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }

    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let request = builder.body(body).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

/// Provision stats for `user_id` through the API.
async fn setup_user(server: &TestServer, user_id: &str) {
    let (status, body) = json_request(
        &server.router,
        "POST",
        &format!("/v1/users/{user_id}/stats"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {body}");
}

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;
    let (status, body) = json_request(&server.router, "GET", "/v1/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_stats_setup_and_read() {
    let server = TestServer::new().await;

    let (status, body) =
        json_request(&server.router, "POST", "/v1/users/u1/stats", None, None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({"success": true}));

    let (status, body) =
        json_request(&server.router, "POST", "/v1/users/u1/stats", None, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    let (status, body) =
        json_request(&server.router, "GET", "/v1/users/u1/stats", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"crawled_files": 0, "total_files": 0, "crawling": false, "online": false})
    );
}

#[tokio::test]
async fn test_stats_unknown_and_invalid_user() {
    let server = TestServer::new().await;

    let (status, _) =
        json_request(&server.router, "GET", "/v1/users/ghost/stats", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) =
        json_request(&server.router, "GET", "/v1/users/bad+id/stats", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_online_status() {
    let server = TestServer::new().await;
    setup_user(&server, "u1").await;

    let (status, _) = json_request(
        &server.router,
        "PUT",
        "/v1/users/u1/online",
        Some(json!({"online": true})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = json_request(&server.router, "GET", "/v1/users/u1/stats", None, None).await;
    assert_eq!(body["online"], true);

    let (status, _) = json_request(
        &server.router,
        "PUT",
        "/v1/users/ghost/online",
        Some(json!({"online": true})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_agent_connection_tracks_online() {
    let server = TestServer::new().await;
    setup_user(&server, "u1").await;

    let (session, _inbox) = server.connect_agent(&user("u1")).await;
    let (_, body) = json_request(&server.router, "GET", "/v1/users/u1/stats", None, None).await;
    assert_eq!(body["online"], true);

    session.disconnect().await;
    let (_, body) = json_request(&server.router, "GET", "/v1/users/u1/stats", None, None).await;
    assert_eq!(body["online"], false);
}

#[tokio::test]
async fn test_chunks_from_offline_user_is_empty() {
    let server = TestServer::new().await;
    setup_user(&server, "u1").await;

    for uri in ["/v1/users/u1/chunks", "/v1/users/ghost/chunks"] {
        let (status, body) = json_request(
            &server.router,
            "POST",
            uri,
            Some(json!({"metadata": [{"file_path": "/a.txt"}]})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["online"], false);
        assert_eq!(body["num_chunks"], 0);
        assert_eq!(body["chunks"], json!([]));
    }
}

#[tokio::test]
async fn test_chunks_timeout_is_empty() {
    let server = TestServer::new().await;
    setup_user(&server, "u1").await;
    // Connected but never answers.
    let (_session, _inbox) = server.connect_agent(&user("u1")).await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/users/u1/chunks",
        Some(json!({"metadata": [{"file_path": "/a.txt"}], "ttl_ms": 50})),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["online"], true);
    assert_eq!(body["timed_out"], true);
    assert_eq!(body["num_chunks"], 0);
    assert_eq!(server.state.correlator.pending_count(), 0);
}

#[tokio::test]
async fn test_chunks_round_trip_through_agent() {
    let server = TestServer::new().await;
    setup_user(&server, "u1").await;

    let (session, mut inbox) = server.connect_agent(&user("u1")).await;
    session.subscribe("query_req/u1").unwrap();

    // Agent: answer every chunk request with the text it names.
    let agent = tokio::spawn(async move {
        let message = inbox.recv().await.expect("chunk request delivered");
        assert_eq!(message.topic, "query_req/u1");
        let request: QueryRequest = decode(&message.payload).unwrap();
        let text_chunks = request
            .requested_chunk_metadatas
            .into_iter()
            .map(|metadata| TextChunkMessage {
                content: format!("text of {}", metadata.file_path),
                metadata,
            })
            .collect();
        let response = QueryResponse {
            request_id: request.request_id,
            text_chunks,
        };
        session
            .publish("query_res/u1", encode(&response).unwrap().into())
            .await
            .unwrap();
        session
    });

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/users/u1/chunks",
        Some(json!({
            "metadata": [
                {"user_id": "u1", "file_path": "/a.txt", "start": 0, "end": 10},
                {"user_id": "u1", "file_path": "/b.txt", "start": 5, "end": 9},
            ],
            "ttl_ms": 2000,
        })),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["online"], true);
    assert_eq!(body["timed_out"], false);
    assert_eq!(body["num_chunks"], 2);
    assert_eq!(body["chunks"][0]["content"], "text of /a.txt");
    assert_eq!(body["chunks"][1]["metadata"]["start"], 5);
    agent.await.unwrap();
}

#[tokio::test]
async fn test_service_token_required_when_configured() {
    let server = TestServer::with_config(|config| {
        config.server.service_token_hash = Some(hash_token("s3cret"));
    })
    .await;

    let (status, _) =
        json_request(&server.router, "POST", "/v1/users/u1/stats", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/v1/users/u1/stats",
        None,
        Some("wrong"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/v1/users/u1/stats",
        None,
        Some("s3cret"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Health stays open.
    let (status, _) = json_request(&server.router, "GET", "/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    burrow_server::metrics::register_metrics();
    let server = TestServer::new().await;

    let response = server
        .router
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("burrow_transport_connections"), "{text}");
}

#[tokio::test]
async fn test_metrics_can_be_disabled() {
    let server = TestServer::with_config(|config| {
        config.server.metrics_enabled = false;
    })
    .await;
    let (status, _) = json_request(&server.router, "GET", "/metrics", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_agent_announcement_gets_crawl_request() {
    let server = TestServer::new().await;
    setup_user(&server, "u1").await;

    let (session, mut inbox) = server.connect_agent(&user("u1")).await;
    session.subscribe("crawl_req/u1").unwrap();

    let announcement = json!({
        "file_paths": ["/a.txt", "/b.txt"],
        "file_hashes": [file_hash("a"), file_hash("b")],
    });
    session
        .publish(
            "new_crawl/u1",
            serde_json::to_vec(&announcement).unwrap().into(),
        )
        .await
        .unwrap();

    let message = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
        .await
        .expect("crawl request delivered")
        .unwrap();
    assert_eq!(message.topic, "crawl_req/u1");
    let request: CrawlRequest = decode(&message.payload).unwrap();
    assert_eq!(request.file_paths, vec!["/a.txt", "/b.txt"]);

    let (_, body) = json_request(&server.router, "GET", "/v1/users/u1/stats", None, None).await;
    assert_eq!(body["crawling"], true);
    assert_eq!(body["total_files"], 2);
}

#[tokio::test]
async fn test_agent_cannot_announce_for_other_user() {
    let server = TestServer::new().await;
    setup_user(&server, "u1").await;
    setup_user(&server, "u2").await;

    let (session, _inbox) = server.connect_agent(&user("u1")).await;
    let result = session
        .publish(
            "new_crawl/u2",
            br#"{"file_paths":["/x"],"file_hashes":["h"]}"#.to_vec().into(),
        )
        .await;
    assert!(result.is_err());

    let (_, body) = json_request(&server.router, "GET", "/v1/users/u2/stats", None, None).await;
    assert_eq!(body["crawling"], false);
}

#[tokio::test]
async fn test_agent_chunks_are_relayed_under_topic_user() {
    let server = TestServer::new().await;
    setup_user(&server, "u1").await;

    let (session, _inbox) = server.connect_agent(&user("u1")).await;
    let spoofed = TextChunkMessage {
        content: "hello".to_string(),
        metadata: ChunkMetadata {
            user_id: "someone-else".to_string(),
            file_path: "/a.txt".to_string(),
            ..ChunkMetadata::default()
        },
    };
    session
        .publish("new_chunk/u1", encode(&spoofed).unwrap().into())
        .await
        .unwrap();

    let chunk_topic = server.state.config.stream.chunk_topic.clone();
    let record = tokio::time::timeout(
        Duration::from_secs(5),
        server.log.read(&chunk_topic, "api-test"),
    )
    .await
    .expect("chunk relayed")
    .unwrap();

    assert_eq!(record.key.as_deref(), Some(&b"u1"[..]));
    let relayed: TextChunkMessage = decode(&record.payload).unwrap();
    assert_eq!(relayed.metadata.user_id, "u1");
    assert_eq!(relayed.content, "hello");
}

#[tokio::test]
async fn test_crawl_done_signal_updates_stats() {
    let server = TestServer::new().await;
    setup_user(&server, "u1").await;
    let metadata = server.metadata();
    let u1 = user("u1");
    metadata
        .try_claim_crawl(&u1, time::OffsetDateTime::now_utc())
        .await
        .unwrap();

    let consumer = burrow_server::completion::CompletionConsumer::new(
        metadata.clone(),
        server.log.clone(),
        server.state.config.stream.signal_topic.clone(),
        server.state.config.stream.signal_group.clone(),
    );
    let shutdown = tokio_util::sync::CancellationToken::new();
    let task = tokio::spawn(consumer.run(shutdown.clone()));

    server
        .log
        .append(
            &server.state.config.stream.signal_topic,
            None,
            br#"{"user_id":"u1","crawling_done":true}"#.to_vec().into(),
        )
        .await
        .unwrap();

    let router = server.router.clone();
    let released = wait_until(Duration::from_secs(5), || {
        let router = router.clone();
        async move {
            let (_, body) = json_request(&router, "GET", "/v1/users/u1/stats", None, None).await;
            body["crawling"] == false
        }
    })
    .await;
    assert!(released);

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_second_agent_socket_keeps_user_online() {
    let server = TestServer::new().await;
    setup_user(&server, "u1").await;

    let (laptop, _i1) = server
        .state
        .broker
        .connect("agent-u1/laptop", "UID=u1,CN=laptop")
        .await
        .unwrap();
    let (desktop, _i2) = server
        .state
        .broker
        .connect("agent-u1/desktop", "UID=u1,CN=desktop")
        .await
        .unwrap();

    laptop.disconnect().await;
    let (_, body) = json_request(&server.router, "GET", "/v1/users/u1/stats", None, None).await;
    assert_eq!(body["online"], true);

    desktop.disconnect().await;
    let (_, body) = json_request(&server.router, "GET", "/v1/users/u1/stats", None, None).await;
    assert_eq!(body["online"], false);
}

#[tokio::test]
async fn test_agent_cannot_evict_backend_session() {
    let server = TestServer::new().await;
    setup_user(&server, "u1").await;

    let backend_id = server.state.config.transport.client_id.clone();
    let result = server.state.broker.connect(&backend_id, "UID=u1").await;
    assert!(result.is_err());

    // The backend still answers announcements.
    let (session, mut inbox) = server.connect_agent(&user("u1")).await;
    session.subscribe("crawl_req/u1").unwrap();
    session
        .publish(
            "new_crawl/u1",
            br#"{"file_paths":[],"file_hashes":[]}"#.to_vec().into(),
        )
        .await
        .unwrap();
    let message = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
        .await
        .expect("crawl request delivered")
        .unwrap();
    assert_eq!(message.topic, "crawl_req/u1");
}

#[tokio::test]
async fn test_chunk_stream_read_by_consumer_group() {
    let server = TestServer::new().await;
    setup_user(&server, "u1").await;

    let (session, _inbox) = server.connect_agent(&user("u1")).await;
    for content in ["first", "second"] {
        let chunk = TextChunkMessage {
            content: content.to_string(),
            metadata: ChunkMetadata {
                file_path: "/a.txt".to_string(),
                ..ChunkMetadata::default()
            },
        };
        session
            .publish("new_chunk/u1", encode(&chunk).unwrap().into())
            .await
            .unwrap();
    }

    let (status, body) = json_request(
        &server.router,
        "GET",
        "/v1/streams/chunks?group=embedder&max=10&wait_ms=5000",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    let mut records = body["records"].as_array().unwrap().clone();
    if records.len() < 2 {
        // The second chunk may still be in flight through the dispatcher.
        let (_, more) = json_request(
            &server.router,
            "GET",
            "/v1/streams/chunks?group=embedder&wait_ms=5000",
            None,
            None,
        )
        .await;
        records.extend(more["records"].as_array().unwrap().iter().cloned());
    }
    let contents: Vec<&str> = records
        .iter()
        .map(|r| r["chunk"]["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["first", "second"]);
    assert!(records.iter().all(|r| r["chunk"]["metadata"]["user_id"] == "u1"));

    // Everything is committed for the group.
    let (_, body) = json_request(
        &server.router,
        "GET",
        "/v1/streams/chunks?group=embedder",
        None,
        None,
    )
    .await;
    assert_eq!(body["records"], json!([]));

    let reserved = format!(
        "/v1/streams/chunks?group={}",
        server.state.config.stream.signal_group
    );
    let (status, _) = json_request(&server.router, "GET", &reserved, None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_signal_endpoint_feeds_completion_consumer() {
    let server = TestServer::new().await;
    setup_user(&server, "u1").await;
    let metadata = server.metadata();
    metadata
        .try_claim_crawl(&user("u1"), time::OffsetDateTime::now_utc())
        .await
        .unwrap();

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/v1/streams/signals",
        Some(json!({"user_id": "u1"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/streams/signals",
        Some(json!({"user_id": "u1", "crawling_done": true})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "body: {body}");

    let consumer = burrow_server::completion::CompletionConsumer::new(
        metadata.clone(),
        server.log.clone(),
        server.state.config.stream.signal_topic.clone(),
        server.state.config.stream.signal_group.clone(),
    );
    let shutdown = tokio_util::sync::CancellationToken::new();
    let task = tokio::spawn(consumer.run(shutdown.clone()));

    let router = server.router.clone();
    let released = wait_until(Duration::from_secs(5), || {
        let router = router.clone();
        async move {
            let (_, body) = json_request(&router, "GET", "/v1/users/u1/stats", None, None).await;
            body["crawling"] == false
        }
    })
    .await;
    assert!(released);

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_stream_endpoints_require_service_token() {
    let server = TestServer::with_config(|config| {
        config.server.service_token_hash = Some(hash_token("s3cret"));
    })
    .await;

    let (status, _) = json_request(
        &server.router,
        "GET",
        "/v1/streams/chunks?group=embedder",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = json_request(
        &server.router,
        "GET",
        "/v1/streams/chunks?group=embedder",
        None,
        Some("s3cret"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
