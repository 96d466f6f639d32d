//! Closed-kline WebSocket streams for Binance and Bybit.
//!
//! Features:
//! - One connection per venue carrying every symbol's kline topic
//! - Automatic reconnection with exponential backoff
//! - Heartbeat pings for Bybit and stale-connection detection

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::ExchangeKind;
use crate::error::WsError;
use crate::market::{Candle, Timeframe};
use crate::metrics;

/// Kline update from either venue.
#[derive(Debug, Clone, PartialEq)]
pub struct KlineMsg {
    /// Trading pair, upper case.
    pub symbol: String,
    /// Venue interval string.
    pub interval: String,
    /// Whether the candle is final.
    pub is_closed: bool,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Base volume.
    pub volume: Decimal,
    /// Candle start in milliseconds.
    pub start_ms: i64,
    /// Candle end (close time) in milliseconds.
    pub end_ms: i64,
}

impl KlineMsg {
    /// Candle keyed by the kline's end time.
    pub fn to_candle(&self) -> Candle {
        Candle {
            close_time_ms: self.end_ms,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BinanceKlineEvent {
    #[serde(rename = "e")]
    event: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: BinanceKline,
}

#[derive(Debug, Deserialize)]
struct BinanceKline {
    #[serde(rename = "t")]
    start: i64,
    #[serde(rename = "T")]
    end: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: Decimal,
    #[serde(rename = "h")]
    high: Decimal,
    #[serde(rename = "l")]
    low: Decimal,
    #[serde(rename = "c")]
    close: Decimal,
    #[serde(rename = "v")]
    volume: Decimal,
    #[serde(rename = "x")]
    closed: bool,
}

#[derive(Debug, Deserialize)]
struct BybitKlineEnvelope {
    topic: String,
    data: Vec<BybitKline>,
}

#[derive(Debug, Deserialize)]
struct BybitKline {
    start: i64,
    end: i64,
    interval: String,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    #[serde(default)]
    confirm: bool,
}

/// Parse a Binance `kline` event; anything else yields `None`.
pub fn parse_binance_kline(text: &str) -> Option<KlineMsg> {
    let event: BinanceKlineEvent = serde_json::from_str(text).ok()?;
    if event.event != "kline" {
        return None;
    }
    let k = event.kline;
    Some(KlineMsg {
        symbol: event.symbol.to_uppercase(),
        interval: k.interval,
        is_closed: k.closed,
        open: k.open,
        high: k.high,
        low: k.low,
        close: k.close,
        volume: k.volume,
        start_ms: k.start,
        end_ms: k.end,
    })
}

/// Parse a Bybit `kline.<interval>.<SYMBOL>` push using its last data item.
pub fn parse_bybit_kline(text: &str) -> Option<KlineMsg> {
    let envelope: BybitKlineEnvelope = serde_json::from_str(text).ok()?;
    let mut parts = envelope.topic.split('.');
    if parts.next() != Some("kline") {
        return None;
    }
    let symbol = parts.nth(1)?.to_uppercase();
    let k = envelope.data.into_iter().last()?;
    Some(KlineMsg {
        symbol,
        interval: k.interval,
        is_closed: k.confirm,
        open: k.open,
        high: k.high,
        low: k.low,
        close: k.close,
        volume: k.volume,
        start_ms: k.start,
        end_ms: k.end,
    })
}

/// Subscription request for `symbols` on `tf`.
pub fn subscribe_message(kind: ExchangeKind, symbols: &[String], tf: Timeframe) -> String {
    match kind {
        ExchangeKind::Binance => {
            let params: Vec<String> = symbols
                .iter()
                .map(|s| format!("{}@kline_{}", s.to_lowercase(), tf.as_str()))
                .collect();
            json!({"method": "SUBSCRIBE", "params": params, "id": 1}).to_string()
        }
        ExchangeKind::Bybit => {
            let args: Vec<String> = symbols
                .iter()
                .map(|s| format!("kline.{}.{}", tf.bybit_interval(), s.to_uppercase()))
                .collect();
            json!({"op": "subscribe", "args": args}).to_string()
        }
    }
}

/// Reconnection configuration for WebSocket.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial backoff delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff multiplier (e.g., 2.0 for exponential).
    pub backoff_multiplier: f64,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_s: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            heartbeat_interval_s: 20,
        }
    }
}

impl ReconnectConfig {
    /// Calculate next delay with exponential backoff.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let clamped_ms = delay_ms.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(clamped_ms)
    }
}

/// Closed-kline stream for one venue and timeframe.
pub struct KlineStream {
    kind: ExchangeKind,
    ws_url: String,
    symbols: Vec<String>,
    timeframe: Timeframe,
    reconnect_config: ReconnectConfig,
    connected: Arc<AtomicBool>,
    reconnect_attempts: Arc<AtomicU64>,
}

impl KlineStream {
    /// Create a stream for `symbols` on `timeframe`.
    pub fn new(kind: ExchangeKind, ws_url: impl Into<String>, symbols: Vec<String>, timeframe: Timeframe) -> Self {
        Self {
            kind,
            ws_url: ws_url.into(),
            symbols,
            timeframe,
            reconnect_config: ReconnectConfig::default(),
            connected: Arc::new(AtomicBool::new(false)),
            reconnect_attempts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Replace the reconnection settings.
    pub fn with_reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnect_config = config;
        self
    }

    /// Shared connection flag, true while subscribed.
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Get reconnection attempt count.
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    fn parse(&self, text: &str) -> Option<KlineMsg> {
        match self.kind {
            ExchangeKind::Binance => parse_binance_kline(text),
            ExchangeKind::Bybit => parse_bybit_kline(text),
        }
    }

    /// Connect, subscribe and forward closed klines until the connection drops.
    ///
    /// Returns `Ok(false)` when the receiver has gone away.
    async fn run_once(&self, tx: &mpsc::Sender<KlineMsg>, attempt: &mut u32) -> Result<bool, WsError> {
        info!(url = %self.ws_url, symbols = ?self.symbols, tf = %self.timeframe, "Connecting to kline stream");

        let (ws_stream, _) = connect_async(&self.ws_url)
            .await
            .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(Message::Text(subscribe_message(self.kind, &self.symbols, self.timeframe)))
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))?;

        self.connected.store(true, Ordering::SeqCst);
        *attempt = 0;
        info!(count = self.symbols.len(), "Subscribed to kline topics");

        let heartbeat = Duration::from_secs(self.reconnect_config.heartbeat_interval_s.max(1));
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;
        let mut last_message = Instant::now();

        loop {
            tokio::select! {
                msg = read.next() => {
                    last_message = Instant::now();
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let start = Instant::now();
                            let parsed = self.parse(&text);
                            metrics::record_ws_message_latency(start);

                            if let Some(kline) = parsed.filter(|k| k.is_closed) {
                                metrics::inc_klines_closed(&kline.symbol);
                                debug!(symbol = %kline.symbol, end_ms = kline.end_ms, "Closed kline");
                                if tx.send(kline).await.is_err() {
                                    return Ok(false);
                                }
                            }
                        }
                        Some(Ok(Message::Ping(_))) => debug!("Received ping"),
                        Some(Ok(Message::Close(frame))) => {
                            warn!(frame = ?frame, "WebSocket closed");
                            return Ok(true);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(WsError::Tungstenite(e)),
                        None => return Ok(true),
                    }
                }
                _ = ticker.tick() => {
                    if last_message.elapsed() > heartbeat * 2 {
                        warn!("Kline stream stale, reconnecting");
                        return Ok(true);
                    }
                    if self.kind == ExchangeKind::Bybit {
                        write
                            .send(Message::Text(json!({"op": "ping"}).to_string()))
                            .await
                            .map_err(|e| WsError::SendFailed(e.to_string()))?;
                    }
                }
                _ = tx.closed() => return Ok(false),
            }
        }
    }

    /// Run with automatic reconnection on disconnect.
    /// Returns a channel receiver that yields closed klines; dropping it stops the task.
    pub fn run_with_reconnect(self: Arc<Self>) -> mpsc::Receiver<KlineMsg> {
        let (tx, rx) = mpsc::channel(1000);

        tokio::spawn(async move {
            let mut attempt = 0u32;

            loop {
                match self.run_once(&tx, &mut attempt).await {
                    Ok(false) => {
                        info!("Channel closed, stopping kline stream");
                        self.connected.store(false, Ordering::SeqCst);
                        return;
                    }
                    Ok(true) => warn!("Kline stream ended, will reconnect"),
                    Err(e) => error!(error = %e, attempt, "Kline stream failed"),
                }
                self.connected.store(false, Ordering::SeqCst);

                let delay = self.reconnect_config.next_delay(attempt);
                self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
                metrics::inc_ws_reconnects();

                info!(delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = tx.closed() => return,
                }
                attempt = attempt.saturating_add(1);
            }
        });

        rx
    }
}
