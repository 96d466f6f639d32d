//! Prometheus metrics for latency tracking and monitoring.
//!
//! This module provides metrics for:
//! - Order submission latency and outcomes
//! - REST request latency and retries
//! - Kline stream messages and reconnects
//! - Signal decisions, entries and exits

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{debug, info, warn};

// === Metric Name Constants ===

/// Order submission latency metric name.
pub const METRIC_ORDER_SUBMIT_LATENCY: &str = "order_submit_latency_ms";
/// HTTP request latency metric name.
pub const METRIC_HTTP_REQUEST_LATENCY: &str = "http_request_latency_ms";
/// WebSocket message latency metric name.
pub const METRIC_WS_MESSAGE_LATENCY: &str = "ws_message_latency_ms";
/// Orders submitted counter metric name.
pub const METRIC_ORDERS_SUBMITTED: &str = "orders_submitted_total";
/// Orders filled counter metric name.
pub const METRIC_ORDERS_FILLED: &str = "orders_filled_total";
/// Orders failed counter metric name.
pub const METRIC_ORDERS_FAILED: &str = "orders_failed_total";
/// REST retries counter metric name.
pub const METRIC_HTTP_RETRIES: &str = "http_retries_total";
/// Closed klines counter metric name.
pub const METRIC_KLINES_CLOSED: &str = "klines_closed_total";
/// WebSocket reconnects counter metric name.
pub const METRIC_WS_RECONNECTS: &str = "ws_reconnects_total";
/// Signal evaluations counter metric name.
pub const METRIC_SIGNALS: &str = "signals_total";
/// Position entries counter metric name.
pub const METRIC_ENTRIES: &str = "positions_opened_total";
/// Position exits counter metric name.
pub const METRIC_EXITS: &str = "positions_closed_total";
/// Open positions gauge metric name.
pub const METRIC_OPEN_POSITIONS: &str = "open_positions";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_ORDER_SUBMIT_LATENCY,
        "Order submission latency in milliseconds"
    );
    describe_histogram!(
        METRIC_HTTP_REQUEST_LATENCY,
        "Exchange REST request latency in milliseconds"
    );
    describe_histogram!(
        METRIC_WS_MESSAGE_LATENCY,
        "Kline message processing latency in milliseconds"
    );

    describe_counter!(METRIC_ORDERS_SUBMITTED, "Total number of orders submitted");
    describe_counter!(METRIC_ORDERS_FILLED, "Total number of orders filled");
    describe_counter!(METRIC_ORDERS_FAILED, "Total number of orders that failed");
    describe_counter!(METRIC_HTTP_RETRIES, "Total number of REST request retries");
    describe_counter!(METRIC_KLINES_CLOSED, "Total number of closed klines received");
    describe_counter!(METRIC_WS_RECONNECTS, "Total number of WebSocket reconnections");
    describe_counter!(METRIC_SIGNALS, "Signal evaluations by action");
    describe_counter!(METRIC_ENTRIES, "Positions opened");
    describe_counter!(METRIC_EXITS, "Positions closed by exit reason");
    describe_gauge!(METRIC_OPEN_POSITIONS, "Currently open positions");

    debug!("Metrics initialized");
}

/// Install the Prometheus exporter on `addr`, then register descriptions.
/// A bind failure is logged and the bot keeps running without an exporter.
pub fn install_prometheus(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => info!(%addr, "Prometheus exporter listening"),
        Err(e) => warn!(%addr, error = %e, "Prometheus exporter not started"),
    }
    init_metrics();
}

/// Record HTTP request latency.
pub fn record_http_latency(start: Instant, endpoint: &str) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_HTTP_REQUEST_LATENCY, "endpoint" => endpoint.to_string()).record(latency_ms);
}

/// Record kline message processing latency.
pub fn record_ws_message_latency(start: Instant) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_WS_MESSAGE_LATENCY).record(latency_ms);
}

/// Increment order submitted counter.
pub fn inc_orders_submitted() {
    counter!(METRIC_ORDERS_SUBMITTED).increment(1);
}

/// Increment orders filled counter.
pub fn inc_orders_filled() {
    counter!(METRIC_ORDERS_FILLED).increment(1);
}

/// Increment orders failed counter.
pub fn inc_orders_failed() {
    counter!(METRIC_ORDERS_FAILED).increment(1);
}

/// Increment REST retries counter.
pub fn inc_http_retries(endpoint: &str) {
    counter!(METRIC_HTTP_RETRIES, "endpoint" => endpoint.to_string()).increment(1);
}

/// Increment closed klines counter.
pub fn inc_klines_closed(symbol: &str) {
    counter!(METRIC_KLINES_CLOSED, "symbol" => symbol.to_string()).increment(1);
}

/// Increment WebSocket reconnects counter.
pub fn inc_ws_reconnects() {
    counter!(METRIC_WS_RECONNECTS).increment(1);
}

/// Count a signal evaluation.
pub fn inc_signals(action: &str) {
    counter!(METRIC_SIGNALS, "action" => action.to_string()).increment(1);
}

/// Count a position entry.
pub fn inc_entries(symbol: &str) {
    counter!(METRIC_ENTRIES, "symbol" => symbol.to_string()).increment(1);
}

/// Count a position exit.
pub fn inc_exits(reason: &str) {
    counter!(METRIC_EXITS, "reason" => reason.to_string()).increment(1);
}

/// Set the open positions gauge.
pub fn set_open_positions(count: usize) {
    gauge!(METRIC_OPEN_POSITIONS).set(count as f64);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        let latency_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        histogram!(self.metric_name).record(latency_ms);
    }
}

/// Create a latency timer for order submission.
pub fn timer_order_submit() -> LatencyTimer {
    LatencyTimer::new(METRIC_ORDER_SUBMIT_LATENCY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn latency_timer_measures_time() {
        let timer = LatencyTimer::new("test_metric");
        sleep(Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 9.0);
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        inc_signals("HOLD");
        inc_exits("STOP");
        set_open_positions(2);
        record_http_latency(Instant::now(), "/api/v3/klines");
    }
}
