//! Long-only spot trading bot for Binance and Bybit.
//!
//! Trades a trend-following long setup on 15-minute candles, confirmed on
//! 30-minute and 1-hour aggregates, with ATR-based stops, a trailing stop and
//! a partial take-profit.
//!
//! # Strategy
//!
//! A long is opened when all of these hold on the latest closed candle:
//!
//! ```text
//! close(15m) > EMA50(15m) > EMA200(15m)
//! close(30m) > EMA50(30m)
//! close(1h)  > EMA50(1h)
//! RSI14(15m) >= 55, ATR14 > 0
//! ```
//!
//! Optional gates (SMA regime, order book imbalance, logistic filter) can veto
//! the entry. Stop = entry - 1.5 ATR, take-profit = entry + 3 ATR.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`market`]: Timeframes, candles and resampling
//! - [`indicators`]: EMA, RSI, ATR, SMA
//! - [`strategy`]: Long signal and entry gates
//! - [`risk`]: Sizing, stops, fees and slippage
//! - [`portfolio`]: Open positions and cooldowns
//! - [`exchange`]: Binance/Bybit REST adapters, kline streams, paper wallet
//! - [`router`]: Order routing
//! - [`store`]: SQLite trade journal
//! - [`engine`]: Live candle-driven engine
//! - [`backtest`]: Historical replay and walk-forward splits
//! - [`api`]: HTTP API for health/status
//! - [`metrics`]: Prometheus metrics
//! - [`signing`]: HMAC request signing
//! - [`utils`]: Utility functions

pub mod api;
pub mod backtest;
pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod indicators;
pub mod market;
pub mod metrics;
pub mod portfolio;
pub mod risk;
pub mod router;
pub mod signing;
pub mod store;
pub mod strategy;
pub mod utils;

pub use config::{Config, ExchangeKind};
pub use engine::Engine;
pub use error::{BotError, Result};
