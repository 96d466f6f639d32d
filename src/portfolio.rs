//! Open positions and per-symbol cooldowns.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Open long position in one symbol.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Position {
    /// Trading pair.
    pub symbol: String,
    /// Base quantity still held.
    pub qty: Decimal,
    /// Slipped entry price.
    pub entry_price: Decimal,
    /// Entry time.
    pub entry_time: DateTime<Utc>,
    /// ATR when the position was opened.
    pub atr_at_entry: Decimal,
    /// Fixed stop.
    pub stop_price: Decimal,
    /// Take-profit price.
    pub tp_price: Decimal,
    /// Highest close since entry.
    pub best_price: Decimal,
    /// Whether the trailing stop participates.
    pub trailing_enabled: bool,
    /// Current trailing stop.
    pub trailing_stop: Decimal,
    /// Journal row id.
    pub trade_id: i64,
    /// Partial take-profit already taken.
    pub partial_done: bool,
    /// P&L booked by partial exits, net of their fees.
    pub realized_pnl: Decimal,
    /// Exit fees paid by partial exits.
    pub realized_fee: Decimal,
}

impl Position {
    /// Effective stop: `min(stop, trailing)` with trailing enabled, else the fixed stop.
    pub fn stop_level(&self) -> Decimal {
        if self.trailing_enabled {
            self.stop_price.min(self.trailing_stop)
        } else {
            self.stop_price
        }
    }

    /// Unrealized P&L at `price`.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.qty
    }
}

/// At most one position per symbol, plus entry/exit cooldowns.
#[derive(Debug, Default)]
pub struct Portfolio {
    positions: HashMap<String, Position>,
    cooldown_until: HashMap<String, u64>,
}

impl Portfolio {
    /// Create an empty portfolio.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `symbol` has an open position.
    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    /// Get the open position for `symbol`.
    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Get the open position for `symbol` mutably.
    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.positions.get_mut(symbol)
    }

    /// Record a new position opened at candle `idx`. Replaces any existing one.
    pub fn open(&mut self, position: Position, idx: u64, cooldown_candles: u64) {
        self.cooldown_until
            .insert(position.symbol.clone(), idx + cooldown_candles);
        self.positions.insert(position.symbol.clone(), position);
    }

    /// Flatten `symbol` at candle `idx`, starting a new cooldown.
    pub fn close(&mut self, symbol: &str, idx: u64, cooldown_candles: u64) -> Option<Position> {
        self.cooldown_until
            .insert(symbol.to_string(), idx + cooldown_candles);
        self.positions.remove(symbol)
    }

    /// Whether entries on `symbol` are blocked at candle `idx`.
    pub fn in_cooldown(&self, symbol: &str, idx: u64) -> bool {
        self.cooldown_until
            .get(symbol)
            .is_some_and(|&until| idx < until)
    }

    /// Iterate over open positions.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Number of open positions.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether no position is open.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(symbol: &str) -> Position {
        Position {
            symbol: symbol.to_string(),
            qty: dec!(1),
            entry_price: dec!(100),
            entry_time: Utc::now(),
            atr_at_entry: dec!(2),
            stop_price: dec!(97),
            tp_price: dec!(106),
            best_price: dec!(100),
            trailing_enabled: true,
            trailing_stop: dec!(97),
            trade_id: 1,
            partial_done: false,
            realized_pnl: Decimal::ZERO,
            realized_fee: Decimal::ZERO,
        }
    }

    #[test]
    fn stop_level_respects_trailing_flag() {
        let mut pos = position("BTCUSDT");
        pos.trailing_stop = dec!(99);
        assert_eq!(pos.stop_level(), dec!(97));
        pos.trailing_stop = dec!(95);
        assert_eq!(pos.stop_level(), dec!(95));
        pos.trailing_enabled = false;
        assert_eq!(pos.stop_level(), dec!(97));
        assert_eq!(pos.unrealized_pnl(dec!(110)), dec!(10));
    }

    #[test]
    fn open_and_close_track_cooldown() {
        let mut portfolio = Portfolio::new();
        portfolio.open(position("BTCUSDT"), 10, 3);
        assert!(portfolio.has_position("BTCUSDT"));
        assert!(portfolio.in_cooldown("BTCUSDT", 12));
        assert!(!portfolio.in_cooldown("BTCUSDT", 13));

        let closed = portfolio.close("BTCUSDT", 20, 3);
        assert!(closed.is_some());
        assert!(portfolio.is_empty());
        assert!(portfolio.in_cooldown("BTCUSDT", 22));
        assert!(!portfolio.in_cooldown("BTCUSDT", 23));
        assert!(!portfolio.in_cooldown("ETHUSDT", 0));
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut portfolio = Portfolio::new();
        portfolio.open(position("ETHUSDT"), 0, 0);
        if let Some(pos) = portfolio.get_mut("ETHUSDT") {
            pos.partial_done = true;
        }
        assert!(portfolio.get("ETHUSDT").is_some_and(|p| p.partial_done));
        assert_eq!(portfolio.len(), 1);
    }
}
