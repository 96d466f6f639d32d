//! Entry logic: the long signal and its optional gates.
//!
//! This module handles:
//! - Multi-timeframe EMA/RSI/ATR long signal
//! - SMA50/SMA200 regime classification
//! - Order book imbalance
//! - Logistic-regression confirmation filter

pub mod ml;
pub mod orderbook;
pub mod regime;
pub mod signal;

pub use ml::{LogisticModel, MlSignalFilter};
pub use orderbook::{orderbook_signal, OrderBook, PriceLevel, IMBALANCE_DEPTH};
pub use regime::{classify_regime, Regime};
pub use signal::{compute_long_signal, Signal, SignalAction, SignalParams, SignalReason};
