//! Mock exchange for unit and integration testing.
//!
//! Serves canned prices, candles and books, fills market orders at the
//! current price and records every order it receives.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{Exchange, OrderResult, Side};
use crate::error::ExchangeError;
use crate::market::{Candle, Timeframe};
use crate::strategy::OrderBook;

/// Configuration for mock exchange behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Whether market orders fail.
    pub fail_orders: bool,
    /// Whether limit orders fail.
    pub fail_limit_orders: bool,
    /// Whether candle requests fail.
    pub fail_ohlcv: bool,
}

#[derive(Debug, Default)]
struct MockState {
    price: Decimal,
    usdt: Decimal,
    base: Decimal,
    candles: HashMap<String, Vec<Candle>>,
    book: OrderBook,
    orders: Vec<OrderResult>,
    cancels: Vec<String>,
    next_id: u64,
}

/// In-memory [`Exchange`] for tests.
#[derive(Debug, Clone, Default)]
pub struct MockExchange {
    config: MockConfig,
    state: Arc<Mutex<MockState>>,
}

impl MockExchange {
    /// Create a new mock exchange with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock exchange with custom configuration.
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the last price.
    pub fn set_price(&self, price: Decimal) {
        self.state().price = price;
    }

    /// Set free USDT.
    pub fn set_usdt_balance(&self, usdt: Decimal) {
        self.state().usdt = usdt;
    }

    /// Set free base balance (for every symbol).
    pub fn set_base_balance(&self, base: Decimal) {
        self.state().base = base;
    }

    /// Set the candles returned for `symbol`.
    pub fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.state().candles.insert(symbol.to_string(), candles);
    }

    /// Set the order book returned for every symbol.
    pub fn set_order_book(&self, book: OrderBook) {
        self.state().book = book;
    }

    /// Every order received so far.
    pub fn orders(&self) -> Vec<OrderResult> {
        self.state().orders.clone()
    }

    /// Symbols passed to `cancel_all`.
    pub fn cancels(&self) -> Vec<String> {
        self.state().cancels.clone()
    }

    fn record(&self, symbol: &str, side: Side, status: &str, qty: Decimal, price: Decimal) -> OrderResult {
        let mut state = self.state();
        state.next_id += 1;
        let order = OrderResult {
            order_id: format!("mock-{}", state.next_id),
            symbol: symbol.to_string(),
            side,
            status: status.to_string(),
            executed_qty: qty,
            avg_price: price,
        };
        state.orders.push(order.clone());
        order
    }
}

#[async_trait]
impl Exchange for MockExchange {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        Ok(self.state().price)
    }

    async fn fetch_ohlcv(&self, symbol: &str, _tf: Timeframe, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        if self.config.fail_ohlcv {
            return Err(ExchangeError::Status {
                status: 503,
                body: "mock outage".to_string(),
            });
        }
        let candles = self.state().candles.get(symbol).cloned().unwrap_or_default();
        let skip = candles.len().saturating_sub(limit);
        Ok(candles.into_iter().skip(skip).collect())
    }

    async fn fetch_usdt_balance(&self) -> Result<Decimal, ExchangeError> {
        Ok(self.state().usdt)
    }

    async fn fetch_base_free(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        Ok(self.state().base)
    }

    async fn fetch_order_book(&self, _symbol: &str, _depth: usize) -> Result<OrderBook, ExchangeError> {
        Ok(self.state().book.clone())
    }

    async fn market_buy_quote(&self, symbol: &str, quote_usdt: Decimal) -> Result<OrderResult, ExchangeError> {
        if self.config.fail_orders {
            return Err(ExchangeError::Rejected("mock order failure".to_string()));
        }
        let price = self.state().price;
        if price.is_zero() {
            return Err(ExchangeError::Rejected("mock price not set".to_string()));
        }
        Ok(self.record(symbol, Side::Buy, "FILLED", quote_usdt / price, price))
    }

    async fn market_sell_base(&self, symbol: &str, qty: Decimal) -> Result<OrderResult, ExchangeError> {
        if self.config.fail_orders {
            return Err(ExchangeError::Rejected("mock order failure".to_string()));
        }
        let price = self.state().price;
        Ok(self.record(symbol, Side::Sell, "FILLED", qty, price))
    }

    async fn limit_sell_base(&self, symbol: &str, _qty: Decimal, price: Decimal) -> Result<OrderResult, ExchangeError> {
        if self.config.fail_limit_orders {
            return Err(ExchangeError::Rejected("mock limit failure".to_string()));
        }
        Ok(self.record(symbol, Side::Sell, "NEW", Decimal::ZERO, price))
    }

    async fn cancel_all(&self, symbol: &str) -> Result<(), ExchangeError> {
        self.state().cancels.push(symbol.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::PriceLevel;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn market_orders_fill_at_price() {
        let mock = MockExchange::new();
        mock.set_price(dec!(50));
        let buy = mock.market_buy_quote("BTCUSDT", dec!(100)).await.unwrap();
        assert_eq!(buy.executed_qty, dec!(2));
        let sell = mock.market_sell_base("BTCUSDT", dec!(1)).await.unwrap();
        assert_eq!(sell.avg_price, dec!(50));
        assert_eq!(mock.orders().len(), 2);
    }

    #[tokio::test]
    async fn failure_flags_are_honoured() {
        let mock = MockExchange::with_config(MockConfig {
            fail_orders: true,
            fail_limit_orders: true,
            fail_ohlcv: true,
        });
        mock.set_price(dec!(1));
        assert!(mock.market_buy_quote("BTCUSDT", dec!(10)).await.is_err());
        assert!(mock.limit_sell_base("BTCUSDT", dec!(1), dec!(2)).await.is_err());
        assert!(mock.fetch_ohlcv("BTCUSDT", Timeframe::M15, 10).await.is_err());
        assert!(mock.orders().is_empty());
    }

    #[tokio::test]
    async fn ohlcv_returns_latest_limit() {
        let mock = MockExchange::new();
        let candles: Vec<Candle> = (1..=5)
            .map(|i| Candle {
                close_time_ms: i,
                open: dec!(1),
                high: dec!(1),
                low: dec!(1),
                close: Decimal::from(i),
                volume: dec!(1),
            })
            .collect();
        mock.set_candles("BTCUSDT", candles);
        let got = mock.fetch_ohlcv("BTCUSDT", Timeframe::M15, 2).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[1].close, dec!(5));
    }

    #[tokio::test]
    async fn balances_and_book_are_configurable() {
        let mock = MockExchange::new();
        mock.set_usdt_balance(dec!(500));
        mock.set_base_balance(dec!(0.25));
        mock.set_order_book(OrderBook::new(
            vec![PriceLevel::new(dec!(99), dec!(3))],
            vec![PriceLevel::new(dec!(101), dec!(1))],
        ));

        assert_eq!(mock.fetch_usdt_balance().await.unwrap(), dec!(500));
        assert_eq!(mock.fetch_base_free("SOLUSDT").await.unwrap(), dec!(0.25));
        let book = mock.fetch_order_book("SOLUSDT", 10).await.unwrap();
        assert_eq!(book.best_bid(), Some(dec!(99)));
        assert_eq!(book.best_ask(), Some(dec!(101)));
    }
}
