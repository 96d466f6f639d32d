//! Moving-average market regime.

use strum::Display;

use crate::indicators::sma;

/// Closes required before a regime can be classified.
pub const MIN_REGIME_CLOSES: usize = 210;

/// Trend regime of a close series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Regime {
    /// Close and SMA50 above SMA200.
    Bull,
    /// Close and SMA50 below SMA200.
    Bear,
    /// Mixed.
    Neutral,
    /// Not enough history.
    Unknown,
}

impl Regime {
    /// Whether a long entry is allowed in this regime.
    pub fn allows_long(self, allow_neutral: bool) -> bool {
        match self {
            Regime::Bull => true,
            Regime::Neutral => allow_neutral,
            Regime::Bear | Regime::Unknown => false,
        }
    }
}

/// Classify closes with SMA50/SMA200.
pub fn classify_regime(closes: &[f64]) -> Regime {
    if closes.len() < MIN_REGIME_CLOSES {
        return Regime::Unknown;
    }

    let (Some(ma50), Some(ma200), Some(&last)) = (sma(closes, 50), sma(closes, 200), closes.last()) else {
        return Regime::Unknown;
    };

    if last > ma200 && ma50 > ma200 {
        Regime::Bull
    } else if last < ma200 && ma50 < ma200 {
        Regime::Bear
    } else {
        Regime::Neutral
    }
}
