//! Multi-timeframe long entry signal.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use strum::Display;

use crate::config::Config;
use crate::indicators::{atr, ema, rsi};
use crate::market::{closes, highs, lows, Candle};

/// Signal decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum SignalAction {
    /// Open a long position.
    Buy,
    /// Stay flat.
    Hold,
}

/// Why the signal resolved the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalReason {
    /// Every check passed.
    LongSetup,
    /// Primary close/EMA stack is not bullish.
    TrendDown,
    /// Secondary timeframe close is below its fast EMA.
    Tf30NotAligned,
    /// Confirmation timeframe close is below its fast EMA.
    Tf1hNotConfirmed,
    /// RSI below the long threshold.
    RsiWeak,
    /// No measurable volatility.
    AtrZero,
}

/// Indicator parameters for [`compute_long_signal`].
#[derive(Debug, Clone, Copy)]
pub struct SignalParams {
    /// Fast EMA period.
    pub ema_fast: usize,
    /// Slow EMA period.
    pub ema_slow: usize,
    /// RSI period.
    pub rsi_period: usize,
    /// Minimum RSI for a long.
    pub rsi_long_min: f64,
    /// ATR period.
    pub atr_period: usize,
}

impl SignalParams {
    /// Take the strategy settings from config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            ema_fast: config.ema_fast,
            ema_slow: config.ema_slow,
            rsi_period: config.rsi_period,
            rsi_long_min: config.rsi_long_min,
            atr_period: config.atr_period,
        }
    }

    /// Primary candles needed before a signal is produced.
    pub fn min_primary_len(&self) -> usize {
        (self.ema_slow + 1).max(self.rsi_period + 1).max(self.atr_period + 1)
    }

    /// Secondary/confirmation candles needed.
    pub fn min_higher_len(&self) -> usize {
        self.ema_fast + 1
    }
}

/// Evaluated signal with the values the engine needs downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    /// BUY or HOLD.
    pub action: SignalAction,
    /// First failing check, or `LongSetup`.
    pub reason: SignalReason,
    /// ATR of the primary timeframe at the last candle.
    pub atr_value: f64,
    /// Feature vector for the ML filter.
    pub features: Vec<f64>,
}

impl Signal {
    /// Whether this is a BUY.
    pub fn is_buy(&self) -> bool {
        self.action == SignalAction::Buy
    }

    /// ATR as a decimal price distance.
    pub fn atr_decimal(&self) -> Decimal {
        Decimal::from_f64(self.atr_value).unwrap_or(Decimal::ZERO)
    }
}

fn last(values: &[f64]) -> f64 {
    values.last().copied().unwrap_or_default()
}

fn ratio(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        0.0
    } else {
        a / b - 1.0
    }
}

/// Evaluate the long setup on primary, secondary and confirmation frames.
///
/// Returns `None` while any frame is too short for its indicators.
pub fn compute_long_signal(
    primary: &[Candle],
    secondary: &[Candle],
    confirm: &[Candle],
    params: &SignalParams,
) -> Option<Signal> {
    if primary.len() < params.min_primary_len()
        || secondary.len() < params.min_higher_len()
        || confirm.len() < params.min_higher_len()
    {
        return None;
    }

    let close = closes(primary);
    let last_close = last(&close);
    let ema_fast = last(&ema(&close, params.ema_fast));
    let ema_slow = last(&ema(&close, params.ema_slow));
    let rsi_now = last(&rsi(&close, params.rsi_period));
    let atr_now = last(&atr(&highs(primary), &lows(primary), &close, params.atr_period));

    let close30 = closes(secondary);
    let last30 = last(&close30);
    let ema30 = last(&ema(&close30, params.ema_fast));

    let close1h = closes(confirm);
    let last1h = last(&close1h);
    let ema1h = last(&ema(&close1h, params.ema_fast));

    let features = vec![
        ratio(last_close, ema_fast),
        ratio(ema_fast, ema_slow),
        rsi_now / 100.0,
        if last_close == 0.0 { 0.0 } else { atr_now / last_close },
        ratio(last30, ema30),
        ratio(last1h, ema1h),
    ];

    let reason = if !(last_close > ema_fast && ema_fast > ema_slow) {
        SignalReason::TrendDown
    } else if last30 <= ema30 {
        SignalReason::Tf30NotAligned
    } else if last1h <= ema1h {
        SignalReason::Tf1hNotConfirmed
    } else if rsi_now < params.rsi_long_min {
        SignalReason::RsiWeak
    } else if atr_now <= 0.0 {
        SignalReason::AtrZero
    } else {
        SignalReason::LongSetup
    };

    let action = if reason == SignalReason::LongSetup {
        SignalAction::Buy
    } else {
        SignalAction::Hold
    };

    Some(Signal {
        action,
        reason,
        atr_value: atr_now,
        features,
    })
}
