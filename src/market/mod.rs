//! Market data: timeframes, candles and rolling history.

pub mod candle;
pub mod timeframe;

pub use candle::{closes, highs, lows, resample, Candle, CandleSeries};
pub use timeframe::Timeframe;
