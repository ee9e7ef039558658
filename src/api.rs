//! Health & Status API endpoints
//!
//! - GET /health  - Simple health check
//! - GET /healthz - Liveness probe
//! - GET /readyz  - Ready once a scan cycle has completed
//! - GET /metrics - Prometheus metrics
//! - GET /status  - Intent counts, cursor, uptime
//! - GET /reviews - Transfers held for manual review

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::{Result, WrapErr};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::db;
use crate::db::models::{IntentCounts, ReviewRow};
use crate::metrics;

const DEFAULT_REVIEW_LIMIT: i64 = 50;
const MAX_REVIEW_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    /// Raw form of the watched address, the cursor key
    pub deposit_address: String,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(pool: PgPool, deposit_address: String) -> Self {
        Self {
            pool,
            deposit_address,
            started_at: Instant::now(),
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    uptime_seconds: u64,
    deposit_address: String,
    cursor_lt: Option<String>,
    last_successful_poll: Option<i64>,
    intents: Option<IntentCounts>,
}

#[derive(Serialize)]
struct ReviewsResponse {
    reviews: Vec<ReviewRow>,
}

#[derive(Deserialize)]
struct ReviewsQuery {
    limit: Option<i64>,
}

async fn health_check() -> &'static str {
    "OK"
}

async fn liveness() -> &'static str {
    "OK"
}

async fn readiness() -> Response {
    if metrics::LAST_SUCCESSFUL_POLL.get() > 0.0 {
        "OK".into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY").into_response()
    }
}

async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let cursor_lt = match db::get_scan_cursor(&state.pool, &state.deposit_address).await {
        Ok(cursor) => cursor.map(|lt| lt.to_string()),
        Err(e) => {
            warn!(error = %e, "Status: failed to read cursor");
            None
        }
    };
    let intents = match db::count_intents(&state.pool).await {
        Ok(counts) => Some(counts),
        Err(e) => {
            warn!(error = %e, "Status: failed to count intents");
            None
        }
    };

    let last_poll = metrics::LAST_SUCCESSFUL_POLL.get();
    Json(StatusResponse {
        status: if intents.is_some() { "ok" } else { "degraded" }.to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        deposit_address: state.deposit_address.clone(),
        cursor_lt,
        last_successful_poll: (last_poll > 0.0).then_some(last_poll as i64),
        intents,
    })
}

async fn reviews(State(state): State<AppState>, Query(query): Query<ReviewsQuery>) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_REVIEW_LIMIT)
        .clamp(1, MAX_REVIEW_LIMIT);
    match db::get_open_reviews(&state.pool, limit).await {
        Ok(reviews) => Json(ReviewsResponse { reviews }).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to load open reviews");
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable").into_response()
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .route("/status", get(status))
        .route("/reviews", get(reviews))
        .with_state(state)
}

/// Serve the API until the listener fails
pub async fn start_api_server(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Failed to bind API server to {}", addr))?;
    info!(%addr, "API server started");

    metrics::UP.set(1.0);

    axum::serve(listener, router(state))
        .await
        .wrap_err("API server failed")?;
    Ok(())
}
