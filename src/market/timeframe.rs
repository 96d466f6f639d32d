//! Candle timeframes.

use std::fmt;
use std::str::FromStr;

use crate::error::MarketDataError;

/// Candle interval understood by both venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    /// 1 minute.
    M1,
    /// 3 minutes.
    M3,
    /// 5 minutes.
    M5,
    /// 15 minutes.
    M15,
    /// 30 minutes.
    M30,
    /// 1 hour.
    H1,
    /// 2 hours.
    H2,
    /// 4 hours.
    H4,
    /// 1 day.
    D1,
}

impl Timeframe {
    /// Length in minutes.
    pub fn minutes(self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M3 => 3,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H2 => 120,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }

    /// Length in milliseconds.
    pub fn millis(self) -> i64 {
        self.minutes() * 60_000
    }

    /// Binance interval string ("15m", "1h", ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Bybit v5 interval code: minutes for intraday, "D" for daily.
    pub fn bybit_interval(self) -> String {
        match self {
            Timeframe::D1 => "D".to_string(),
            other => other.minutes().to_string(),
        }
    }

    /// Number of primary candles per year, used to annualise Sharpe ratios.
    pub fn periods_per_year(self) -> f64 {
        365.0 * 24.0 * 60.0 / self.minutes() as f64
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" => Ok(Timeframe::M1),
            "3m" => Ok(Timeframe::M3),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" | "60m" => Ok(Timeframe::H1),
            "2h" => Ok(Timeframe::H2),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(MarketDataError::UnsupportedTimeframe(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exchange_strings() {
        assert_eq!("15m".parse::<Timeframe>().unwrap(), Timeframe::M15);
        assert_eq!("1h".parse::<Timeframe>().unwrap(), Timeframe::H1);
        assert!("7m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn bybit_interval_codes() {
        assert_eq!(Timeframe::M15.bybit_interval(), "15");
        assert_eq!(Timeframe::H1.bybit_interval(), "60");
        assert_eq!(Timeframe::H4.bybit_interval(), "240");
        assert_eq!(Timeframe::D1.bybit_interval(), "D");
    }

    #[test]
    fn fifteen_minute_bars_per_year() {
        assert_eq!(Timeframe::M15.periods_per_year(), 35_040.0);
    }
}
