//! Exchange connectivity.
//!
//! This module handles:
//! - The venue-neutral [`Exchange`] trait
//! - Rate-limited, retrying REST transport
//! - Binance spot and Bybit v5 spot adapters
//! - Dry-run paper wallet
//! - Closed-kline WebSocket streams

pub mod binance;
pub mod bybit;
pub mod mock;
pub mod paper;
pub mod rate_limit;
pub mod rest;
pub mod ws;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::config::{Config, ExchangeKind};
use crate::error::ExchangeError;
use crate::market::{Candle, Timeframe};
use crate::strategy::OrderBook;

pub use binance::BinanceSpot;
pub use bybit::BybitSpot;
pub use mock::MockExchange;
pub use paper::PaperExchange;
pub use rate_limit::TokenBucket;
pub use rest::{RestClient, RestRequest, RetryPolicy};

/// Quote currency every traded symbol is priced in.
pub const QUOTE_ASSET: &str = "USDT";

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

/// Outcome of an order submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderResult {
    /// Venue order id.
    pub order_id: String,
    /// Trading pair.
    pub symbol: String,
    /// Order side.
    pub side: Side,
    /// Venue status string (e.g. `FILLED`, `NEW`).
    pub status: String,
    /// Base quantity executed.
    pub executed_qty: Decimal,
    /// Average fill price, or the limit price for resting orders.
    pub avg_price: Decimal,
}

/// Spot venue used by the engine and the CLI.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Venue name, lowercase.
    fn name(&self) -> &str;

    /// Last traded price.
    async fn fetch_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// Most recent `limit` candles, oldest first.
    async fn fetch_ohlcv(&self, symbol: &str, tf: Timeframe, limit: usize) -> Result<Vec<Candle>, ExchangeError>;

    /// Free USDT.
    async fn fetch_usdt_balance(&self) -> Result<Decimal, ExchangeError>;

    /// Free balance of the symbol's base asset.
    async fn fetch_base_free(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// Order book snapshot with up to `depth` levels per side.
    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook, ExchangeError>;

    /// Market buy spending `quote_usdt`.
    async fn market_buy_quote(&self, symbol: &str, quote_usdt: Decimal) -> Result<OrderResult, ExchangeError>;

    /// Market sell `qty` of the base asset.
    async fn market_sell_base(&self, symbol: &str, qty: Decimal) -> Result<OrderResult, ExchangeError>;

    /// Resting GTC limit sell.
    async fn limit_sell_base(&self, symbol: &str, qty: Decimal, price: Decimal) -> Result<OrderResult, ExchangeError>;

    /// Cancel every open order on `symbol`.
    async fn cancel_all(&self, symbol: &str) -> Result<(), ExchangeError>;
}

/// Base asset of a USDT pair (`BTCUSDT` -> `BTC`).
pub fn base_asset(symbol: &str) -> &str {
    symbol.strip_suffix(QUOTE_ASSET).unwrap_or(symbol)
}

/// Decimal from a JSON string or number.
pub(crate) fn json_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

/// Decimal field of a JSON object, zero when absent or malformed.
pub(crate) fn json_decimal_or_zero(value: &serde_json::Value, key: &str) -> Decimal {
    value.get(key).and_then(json_decimal).unwrap_or(Decimal::ZERO)
}

/// Order book side as `[[price, size], ...]`.
pub(crate) fn json_levels(value: Option<&serde_json::Value>) -> Vec<crate::strategy::PriceLevel> {
    value
        .and_then(|v| v.as_array())
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let price = json_decimal(row.get(0)?)?;
                    let size = json_decimal(row.get(1)?)?;
                    Some(crate::strategy::PriceLevel::new(price, size))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Largest kline page either venue serves per request.
pub(crate) const MAX_KLINES_PER_REQUEST: usize = 1000;

/// Collect the newest `limit` candles by walking pages backwards in time.
///
/// `page(n, end_ms)` returns up to `n` ascending candles that open at or
/// before `end_ms` (the latest candles when `None`). Paging stops on a short
/// page.
pub(crate) async fn fetch_klines_paged<F, Fut>(tf: Timeframe, limit: usize, mut page: F) -> Result<Vec<Candle>, ExchangeError>
where
    F: FnMut(usize, Option<i64>) -> Fut,
    Fut: Future<Output = Result<Vec<Candle>, ExchangeError>>,
{
    let mut candles: Vec<Candle> = Vec::with_capacity(limit);
    let mut end_ms = None;

    while candles.len() < limit {
        let want = (limit - candles.len()).min(MAX_KLINES_PER_REQUEST);
        let mut older = page(want, end_ms).await?;
        let got = older.len();
        let Some(oldest) = older.first() else {
            break;
        };
        // One millisecond before the oldest candle opens.
        end_ms = Some(oldest.close_time_ms - tf.millis());

        older.append(&mut candles);
        candles = older;
        if got < want {
            break;
        }
    }

    Ok(candles)
}

/// Build the venue adapter for `kind`, wrapped in a paper wallet when `DRY_RUN` is set.
pub fn build_exchange(config: &Config, kind: ExchangeKind) -> Result<Arc<dyn Exchange>, ExchangeError> {
    let settings = config.exchange_settings(kind);
    let limiter = Arc::new(TokenBucket::new(config.rest_rate_per_sec, config.rest_burst));
    let rest = RestClient::new(limiter, RetryPolicy::default())?;

    let venue: Arc<dyn Exchange> = match kind {
        ExchangeKind::Binance => Arc::new(BinanceSpot::new(&settings, rest)),
        ExchangeKind::Bybit => Arc::new(BybitSpot::new(&settings, rest)),
    };

    if config.dry_run {
        Ok(Arc::new(PaperExchange::new(venue, config.sim_balance)))
    } else {
        Ok(venue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn base_asset_strips_quote_suffix() {
        assert_eq!(base_asset("BTCUSDT"), "BTC");
        assert_eq!(base_asset("ETHUSDT"), "ETH");
        assert_eq!(base_asset("ETHBTC"), "ETHBTC");
    }

    #[test]
    fn side_displays_uppercase() {
        assert_eq!(Side::Buy.to_string(), "BUY");
        assert_eq!(Side::Sell.to_string(), "SELL");
    }

    /// Venue holding candles `1..=total`; candle `k` opens at `(k - 1) * step`.
    fn venue_page(total: i64, n: usize, end_ms: Option<i64>) -> Vec<Candle> {
        let step = Timeframe::M15.millis();
        let newest = end_ms.map_or(total, |end| (end + 1) / step).min(total);
        let oldest = (newest - n as i64 + 1).max(1);
        (oldest..=newest)
            .map(|k| Candle {
                close_time_ms: k * step - 1,
                open: Decimal::from(k),
                high: Decimal::from(k),
                low: Decimal::from(k),
                close: Decimal::from(k),
                volume: Decimal::ONE,
            })
            .collect()
    }

    #[tokio::test]
    async fn paged_klines_walk_backwards_until_limit() {
        let mut calls = Vec::new();
        let candles = fetch_klines_paged(Timeframe::M15, 2300, |n, end| {
            calls.push((n, end.is_some()));
            let page = venue_page(2500, n, end);
            async move { Ok(page) }
        })
        .await
        .unwrap();

        assert_eq!(calls, vec![(1000, false), (1000, true), (300, true)]);
        assert_eq!(candles.len(), 2300);
        assert_eq!(candles[0].close, dec!(201));
        assert_eq!(candles[2299].close, dec!(2500));
        assert!(candles.windows(2).all(|w| w[1].close_time_ms - w[0].close_time_ms == Timeframe::M15.millis()));
    }

    #[tokio::test]
    async fn paged_klines_stop_on_short_page() {
        let mut pages = 0;
        let candles = fetch_klines_paged(Timeframe::M15, 2000, |n, end| {
            pages += 1;
            let page = venue_page(1200, n, end);
            async move { Ok(page) }
        })
        .await
        .unwrap();

        assert_eq!(pages, 2);
        assert_eq!(candles.len(), 1200);
        assert_eq!(candles[0].close, dec!(1));
    }

    #[test]
    fn dry_run_builds_paper_wallet() {
        let config = Config {
            sim_balance: dec!(250),
            ..Config::default()
        };
        let exchange = build_exchange(&config, ExchangeKind::Bybit).unwrap();
        assert_eq!(exchange.name(), "bybit");
    }
}
