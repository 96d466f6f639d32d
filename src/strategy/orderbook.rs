//! Order book snapshot and bid/ask imbalance.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Levels counted on each side by [`orderbook_signal`].
pub const IMBALANCE_DEPTH: usize = 10;

/// Single price level in an order book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceLevel {
    /// Price at this level.
    pub price: Decimal,
    /// Total size available at this price.
    pub size: Decimal,
}

impl PriceLevel {
    /// Create a new price level.
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// L2 order book snapshot for one symbol.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    /// Bid levels sorted by price descending.
    pub bids: Vec<PriceLevel>,
    /// Ask levels sorted by price ascending.
    pub asks: Vec<PriceLevel>,
}

impl OrderBook {
    /// Build a book, sorting both sides and dropping empty levels.
    pub fn new(mut bids: Vec<PriceLevel>, mut asks: Vec<PriceLevel>) -> Self {
        bids.retain(|l| l.size > Decimal::ZERO);
        asks.retain(|l| l.size > Decimal::ZERO);
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        Self { bids, asks }
    }

    /// Get the best bid price.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Get the best ask price.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Get the spread between best bid and ask.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }
}

/// Compare top-of-book depth: `(bid_vol / ask_vol > threshold, bid_vol / ask_vol)`.
///
/// An empty ask side yields `(false, 0.0)`.
pub fn orderbook_signal(book: &OrderBook, threshold: f64) -> (bool, f64) {
    let depth = |levels: &[PriceLevel]| -> Decimal {
        levels.iter().take(IMBALANCE_DEPTH).map(|l| l.size).sum()
    };

    let bid_vol = depth(&book.bids);
    let ask_vol = depth(&book.asks);

    if ask_vol.is_zero() {
        return (false, 0.0);
    }

    let imbalance = (bid_vol / ask_vol).to_f64().unwrap_or_default();
    (imbalance > threshold, imbalance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn book_sorts_sides() {
        let book = OrderBook::new(
            vec![PriceLevel::new(dec!(99), dec!(1)), PriceLevel::new(dec!(100), dec!(2))],
            vec![PriceLevel::new(dec!(102), dec!(1)), PriceLevel::new(dec!(101), dec!(0))],
        );
        assert_eq!(book.best_bid(), Some(dec!(100)));
        assert_eq!(book.best_ask(), Some(dec!(102)));
        assert_eq!(book.spread(), Some(dec!(2)));
    }

    #[test]
    fn imbalance_counts_top_ten_levels() {
        let bids: Vec<PriceLevel> = (0..12).map(|i| PriceLevel::new(Decimal::from(100 - i), dec!(2))).collect();
        let asks: Vec<PriceLevel> = (0..10).map(|i| PriceLevel::new(Decimal::from(101 + i), dec!(1))).collect();
        let (ok, imbalance) = orderbook_signal(&OrderBook::new(bids, asks), 1.5);
        assert!(ok);
        assert!((imbalance - 2.0).abs() < 1e-12);
    }

    #[test]
    fn empty_ask_side_is_rejected() {
        let book = OrderBook::new(vec![PriceLevel::new(dec!(1), dec!(1))], vec![]);
        assert_eq!(orderbook_signal(&book, 0.0), (false, 0.0));
    }
}
