//! Order routing with per-call logging and metrics.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::error::TradingError;
use crate::exchange::{Exchange, OrderResult};
use crate::metrics;

/// Sends entry and exit orders to one venue.
#[derive(Clone)]
pub struct SmartRouter {
    exchange: Arc<dyn Exchange>,
}

impl SmartRouter {
    /// Create a router for `exchange`.
    pub fn new(exchange: Arc<dyn Exchange>) -> Self {
        Self { exchange }
    }

    /// The routed venue.
    pub fn exchange(&self) -> &Arc<dyn Exchange> {
        &self.exchange
    }

    /// Market buy spending `quote_usdt`.
    #[instrument(skip(self, quote_usdt), fields(exchange = %self.exchange.name(), quote = %quote_usdt))]
    pub async fn open_long(&self, symbol: &str, quote_usdt: Decimal) -> Result<OrderResult, TradingError> {
        if quote_usdt <= Decimal::ZERO {
            return Err(TradingError::InvalidParams(format!("quote amount {quote_usdt} must be positive")));
        }

        info!(symbol, "Open long requested");
        metrics::inc_orders_submitted();
        let _timer = metrics::timer_order_submit();

        match self.exchange.market_buy_quote(symbol, quote_usdt).await {
            Ok(result) => {
                metrics::inc_orders_filled();
                info!(
                    symbol,
                    qty = %result.executed_qty,
                    avg = %result.avg_price,
                    status = %result.status,
                    "Open long done"
                );
                Ok(result)
            }
            Err(e) => {
                metrics::inc_orders_failed();
                Err(e.into())
            }
        }
    }

    /// Market sell `qty`.
    #[instrument(skip(self, qty), fields(exchange = %self.exchange.name(), qty = %qty))]
    pub async fn close_long_market(&self, symbol: &str, qty: Decimal) -> Result<OrderResult, TradingError> {
        if qty <= Decimal::ZERO {
            return Err(TradingError::InvalidParams(format!("sell quantity {qty} must be positive")));
        }

        info!(symbol, "Close long requested");
        metrics::inc_orders_submitted();
        let _timer = metrics::timer_order_submit();

        match self.exchange.market_sell_base(symbol, qty).await {
            Ok(result) => {
                metrics::inc_orders_filled();
                info!(
                    symbol,
                    qty = %result.executed_qty,
                    avg = %result.avg_price,
                    status = %result.status,
                    "Close long done"
                );
                Ok(result)
            }
            Err(e) => {
                metrics::inc_orders_failed();
                Err(e.into())
            }
        }
    }

    /// Resting take-profit. Failures are logged and yield `None`.
    pub async fn place_partial_tp_limit(&self, symbol: &str, qty: Decimal, tp_price: Decimal) -> Option<OrderResult> {
        match self.exchange.limit_sell_base(symbol, qty, tp_price).await {
            Ok(order) => {
                info!(
                    exchange = %self.exchange.name(),
                    symbol,
                    %qty,
                    tp = %tp_price,
                    order_id = %order.order_id,
                    "Partial TP limit placed"
                );
                Some(order)
            }
            Err(e) => {
                warn!(exchange = %self.exchange.name(), symbol, error = %e, "Partial TP limit failed");
                None
            }
        }
    }

    /// Cancel every open order on `symbol`. Failures are logged only.
    pub async fn cancel_all(&self, symbol: &str) {
        match self.exchange.cancel_all(symbol).await {
            Ok(()) => info!(exchange = %self.exchange.name(), symbol, "Cancelled open orders"),
            Err(e) => warn!(exchange = %self.exchange.name(), symbol, error = %e, "Cancel all failed"),
        }
    }
}
