//! Dry-run wallet: real market data, simulated fills.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::Mutex;
use tracing::info;

use super::{base_asset, Exchange, OrderResult, Side};
use crate::error::ExchangeError;
use crate::market::{Candle, Timeframe};
use crate::strategy::OrderBook;

#[derive(Debug, Default)]
struct Wallet {
    usdt: Decimal,
    base: HashMap<String, Decimal>,
    open_orders: HashMap<String, Vec<OrderResult>>,
    next_id: u64,
}

impl Wallet {
    fn next_order_id(&mut self) -> String {
        self.next_id += 1;
        format!("paper-{}", self.next_id)
    }
}

/// Wraps a venue and fills orders instantly at the last price against a simulated wallet.
pub struct PaperExchange {
    inner: Arc<dyn Exchange>,
    wallet: Mutex<Wallet>,
}

impl PaperExchange {
    /// Create a paper wallet holding `usdt`.
    pub fn new(inner: Arc<dyn Exchange>, usdt: Decimal) -> Self {
        Self {
            inner,
            wallet: Mutex::new(Wallet {
                usdt,
                ..Wallet::default()
            }),
        }
    }

    /// Resting limit orders for `symbol`.
    pub async fn open_orders(&self, symbol: &str) -> Vec<OrderResult> {
        self.wallet
            .lock()
            .await
            .open_orders
            .get(symbol)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.inner.fetch_price(symbol).await
    }

    async fn fetch_ohlcv(&self, symbol: &str, tf: Timeframe, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        self.inner.fetch_ohlcv(symbol, tf, limit).await
    }

    async fn fetch_usdt_balance(&self) -> Result<Decimal, ExchangeError> {
        Ok(self.wallet.lock().await.usdt)
    }

    async fn fetch_base_free(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        Ok(self
            .wallet
            .lock()
            .await
            .base
            .get(base_asset(symbol))
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook, ExchangeError> {
        self.inner.fetch_order_book(symbol, depth).await
    }

    async fn market_buy_quote(&self, symbol: &str, quote_usdt: Decimal) -> Result<OrderResult, ExchangeError> {
        let price = self.inner.fetch_price(symbol).await?;
        if price <= Decimal::ZERO {
            return Err(ExchangeError::Rejected(format!("no price for {symbol}")));
        }

        let mut wallet = self.wallet.lock().await;
        if quote_usdt > wallet.usdt {
            return Err(ExchangeError::Rejected(format!(
                "paper balance {} below order {}",
                wallet.usdt, quote_usdt
            )));
        }

        let qty = (quote_usdt / price).round_dp_with_strategy(8, RoundingStrategy::ToZero);
        wallet.usdt -= quote_usdt;
        *wallet.base.entry(base_asset(symbol).to_string()).or_default() += qty;
        let order_id = wallet.next_order_id();

        info!(symbol, %qty, %price, "[DRY RUN] Market buy filled");

        Ok(OrderResult {
            order_id,
            symbol: symbol.to_string(),
            side: Side::Buy,
            status: "FILLED".to_string(),
            executed_qty: qty,
            avg_price: price,
        })
    }

    async fn market_sell_base(&self, symbol: &str, qty: Decimal) -> Result<OrderResult, ExchangeError> {
        let price = self.inner.fetch_price(symbol).await?;

        let mut wallet = self.wallet.lock().await;
        let held = wallet.base.get(base_asset(symbol)).copied().unwrap_or(Decimal::ZERO);
        if qty > held {
            return Err(ExchangeError::Rejected(format!(
                "paper {} balance {} below sell {}",
                base_asset(symbol),
                held,
                qty
            )));
        }

        wallet.base.insert(base_asset(symbol).to_string(), held - qty);
        wallet.usdt += qty * price;
        let order_id = wallet.next_order_id();

        info!(symbol, %qty, %price, "[DRY RUN] Market sell filled");

        Ok(OrderResult {
            order_id,
            symbol: symbol.to_string(),
            side: Side::Sell,
            status: "FILLED".to_string(),
            executed_qty: qty,
            avg_price: price,
        })
    }

    async fn limit_sell_base(&self, symbol: &str, qty: Decimal, price: Decimal) -> Result<OrderResult, ExchangeError> {
        let mut wallet = self.wallet.lock().await;
        let order = OrderResult {
            order_id: wallet.next_order_id(),
            symbol: symbol.to_string(),
            side: Side::Sell,
            status: "NEW".to_string(),
            executed_qty: Decimal::ZERO,
            avg_price: price,
        };
        wallet
            .open_orders
            .entry(symbol.to_string())
            .or_default()
            .push(order.clone());

        info!(symbol, %qty, %price, "[DRY RUN] Limit sell recorded");
        Ok(order)
    }

    async fn cancel_all(&self, symbol: &str) -> Result<(), ExchangeError> {
        let removed = self.wallet.lock().await.open_orders.remove(symbol);
        info!(symbol, cancelled = removed.map(|o| o.len()).unwrap_or(0), "[DRY RUN] Cancelled open orders");
        Ok(())
    }
}
