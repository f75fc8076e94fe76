//! Prometheus metrics for the burrow server.
//!
//! Exposes counters for reconciliation, chunk correlation, completion signals
//! and the idle-crawl reaper.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! No label carries a user id, file path or hash; only aggregate counts are
//! exposed. The endpoint MUST still be network-restricted to authorized
//! scrapers.

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{self, Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Reconciliation
pub static RECONCILIATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "burrow_reconciliations_total",
            "Inventory announcements by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static FILES_REQUESTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "burrow_files_requested_total",
        "Files requested from agents after reconciliation",
    )
    .expect("metric creation failed")
});

// Correlator
pub static CHUNK_FETCHES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("burrow_chunk_fetches_total", "Chunk fetches by outcome"),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static CORRELATOR_PENDING: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "burrow_correlator_pending",
        "Chunk requests waiting for an agent response",
    )
    .expect("metric creation failed")
});

pub static LATE_RESPONSES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "burrow_late_responses_total",
        "Agent responses dropped because no caller was waiting",
    )
    .expect("metric creation failed")
});

// Completion signals
pub static COMPLETION_SIGNALS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "burrow_completion_signals_total",
            "Completion signals consumed by kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

// Reaper
pub static CRAWLS_REAPED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "burrow_crawls_reaped_total",
        "Idle crawls released by the reaper",
    )
    .expect("metric creation failed")
});

// Relay and transport
pub static CHUNKS_RELAYED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "burrow_chunks_relayed_total",
        "Agent chunks appended to the chunk log",
    )
    .expect("metric creation failed")
});

pub static TRANSPORT_DROPPED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "burrow_transport_dropped_messages",
        "Deliveries dropped because a subscriber inbox was full",
    )
    .expect("metric creation failed")
});

pub static TRANSPORT_CONNECTIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "burrow_transport_connections",
        "Live pub/sub connections",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Safe to call more than once.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(RECONCILIATIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(FILES_REQUESTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_FETCHES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CORRELATOR_PENDING.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(LATE_RESPONSES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(COMPLETION_SIGNALS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CRAWLS_REAPED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_RELAYED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(TRANSPORT_DROPPED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(TRANSPORT_CONNECTIONS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    TRANSPORT_DROPPED.set(i64::try_from(state.broker.dropped_messages()).unwrap_or(i64::MAX));
    TRANSPORT_CONNECTIONS.set(i64::try_from(state.broker.connection_count()).unwrap_or(i64::MAX));

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

pub fn record_reconciliation(outcome: &str) {
    RECONCILIATIONS.with_label_values(&[outcome]).inc();
}

pub fn record_chunk_fetch(outcome: &str) {
    CHUNK_FETCHES.with_label_values(&[outcome]).inc();
}

pub fn record_completion(kind: &str) {
    COMPLETION_SIGNALS.with_label_values(&[kind]).inc();
}
