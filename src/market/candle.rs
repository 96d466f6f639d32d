//! OHLCV candles and the rolling per-symbol history.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::timeframe::Timeframe;
use crate::error::MarketDataError;

/// Single OHLCV candle keyed by its close time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Close time in milliseconds since the epoch.
    pub close_time_ms: i64,
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
}

/// Rolling, ascending, de-duplicated candle history for one symbol.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    candles: Vec<Candle>,
    max_len: usize,
}

impl CandleSeries {
    /// Create an empty series retaining at most `max_len` candles.
    pub fn new(max_len: usize) -> Self {
        Self {
            candles: Vec::new(),
            max_len: max_len.max(1),
        }
    }

    /// Build a series from candles in any order.
    pub fn from_candles(candles: impl IntoIterator<Item = Candle>, max_len: usize) -> Self {
        let mut series = Self::new(max_len);
        for candle in candles {
            series.upsert(candle);
        }
        series
    }

    /// Insert a candle, replacing any candle with the same close time.
    pub fn upsert(&mut self, candle: Candle) {
        match self
            .candles
            .binary_search_by_key(&candle.close_time_ms, |c| c.close_time_ms)
        {
            Ok(i) => self.candles[i] = candle,
            Err(i) => self.candles.insert(i, candle),
        }

        if self.candles.len() > self.max_len {
            let excess = self.candles.len() - self.max_len;
            self.candles.drain(..excess);
        }
    }

    /// All candles, oldest first.
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// Number of candles held.
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    /// Whether the series is empty.
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Most recent candle.
    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Aggregate into 30m or 1h buckets (right-closed, right-labelled).
    pub fn resample(&self, tf: Timeframe) -> Result<Vec<Candle>, MarketDataError> {
        match tf {
            Timeframe::M30 | Timeframe::H1 => Ok(resample(&self.candles, tf)),
            other => Err(MarketDataError::UnsupportedResample(other.to_string())),
        }
    }
}

/// Aggregate ascending candles into `tf` buckets.
///
/// A candle closing at `t` belongs to the bucket labelled `ceil(t / tf)`, so a
/// bucket covers `(label - tf, label]`. Empty buckets are omitted.
pub fn resample(candles: &[Candle], tf: Timeframe) -> Vec<Candle> {
    let period = tf.millis();
    let mut out: Vec<Candle> = Vec::new();

    for c in candles {
        let label = (c.close_time_ms + period - 1).div_euclid(period) * period;
        match out.last_mut() {
            Some(bucket) if bucket.close_time_ms == label => {
                bucket.high = bucket.high.max(c.high);
                bucket.low = bucket.low.min(c.low);
                bucket.close = c.close;
                bucket.volume += c.volume;
            }
            _ => out.push(Candle {
                close_time_ms: label,
                ..*c
            }),
        }
    }

    out
}

/// Close prices as `f64` for indicator math.
pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close.to_f64().unwrap_or_default()).collect()
}

/// High prices as `f64`.
pub fn highs(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.high.to_f64().unwrap_or_default()).collect()
}

/// Low prices as `f64`.
pub fn lows(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.low.to_f64().unwrap_or_default()).collect()
}
