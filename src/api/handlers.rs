//! HTTP API handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::engine::EngineStatus;

/// Application state shared with handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Every symbol has been seeded.
    pub seeded: Arc<AtomicBool>,
    /// The kline stream is connected.
    pub streaming: Arc<AtomicBool>,
    /// Latest engine snapshot.
    pub status: Arc<RwLock<EngineStatus>>,
}

impl AppState {
    /// Create new app state from the engine's and stream's shared handles.
    pub fn new(seeded: Arc<AtomicBool>, streaming: Arc<AtomicBool>, status: Arc<RwLock<EngineStatus>>) -> Self {
        Self {
            seeded,
            streaming,
            status,
        }
    }

    /// Check if ready: seeded and streaming.
    pub fn is_ready(&self) -> bool {
        self.seeded.load(Ordering::SeqCst) && self.streaming.load(Ordering::SeqCst)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicBool::new(false)),
            Arc::new(RwLock::new(EngineStatus::default())),
        )
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether service is ready.
    pub ready: bool,
    /// History seeded.
    pub seeded: bool,
    /// Kline stream connected.
    pub streaming: bool,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// "running" once ready, else "starting".
    pub status: &'static str,
    /// Engine snapshot.
    #[serde(flatten)]
    pub engine: EngineStatus,
    /// Share of closed trades that won.
    pub win_rate: f64,
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 if ready, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let response = ReadyResponse {
        ready: state.is_ready(),
        seeded: state.seeded.load(Ordering::SeqCst),
        streaming: state.streaming.load(Ordering::SeqCst),
    };

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Status handler - exchange, mode, symbols, positions and trade summary.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.status.read().await.clone();
    let win_rate = engine.trades.win_rate();

    Json(StatusResponse {
        status: if state.is_ready() { "running" } else { "starting" },
        engine,
        win_rate,
    })
}
