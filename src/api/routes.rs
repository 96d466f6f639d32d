//! HTTP API route definitions.

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use super::handlers::{health, ready, status, AppState};

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Status endpoint
        .route("/api/v1/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use rust_decimal_macros::dec;
    use tower::ServiceExt;

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = create_router(AppState::default());
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_endpoint_returns_503_when_not_ready() {
        let app = create_router(AppState::default());
        let response = app.oneshot(get("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn ready_endpoint_returns_200_when_ready() {
        let state = AppState::default();
        state.seeded.store(true, Ordering::SeqCst);
        state.streaming.store(true, Ordering::SeqCst);
        let app = create_router(state);

        let response = app.oneshot(get("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_endpoint_serves_engine_snapshot() {
        let state = AppState::default();
        {
            let mut snapshot = state.status.write().await;
            snapshot.exchange = "binance".to_string();
            snapshot.mode = "dry_run".to_string();
            snapshot.symbols = vec!["BTCUSDT".to_string()];
            snapshot.trades.closed = 4;
            snapshot.trades.wins = 3;
            snapshot.trades.total_pnl = dec!(12.5);
        }
        let app = create_router(state);

        let response = app.oneshot(get("/api/v1/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "starting");
        assert_eq!(json["exchange"], "binance");
        assert_eq!(json["symbols"][0], "BTCUSDT");
        assert_eq!(json["trades"]["closed"], 4);
        assert_eq!(json["trades"]["total_pnl"], "12.5");
        assert_eq!(json["win_rate"], 0.75);
    }
}
