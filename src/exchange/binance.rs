//! Binance spot REST adapter.

use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, instrument};

use super::rest::{RestClient, RestRequest};
use super::{base_asset, fetch_klines_paged, json_decimal, json_decimal_or_zero, json_levels, Exchange, OrderResult, Side};
use crate::config::ExchangeSettings;
use crate::error::ExchangeError;
use crate::market::{Candle, Timeframe};
use crate::signing;
use crate::strategy::OrderBook;

/// Binance spot client.
#[derive(Debug, Clone)]
pub struct BinanceSpot {
    base_url: String,
    api_key: String,
    api_secret: String,
    rest: RestClient,
}

impl BinanceSpot {
    /// Create a client for the given settings.
    pub fn new(settings: &ExchangeSettings, rest: RestClient) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
            rest,
        }
    }

    fn public(&self, path: &str, query: &[(&str, String)]) -> RestRequest {
        let qs = query
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        RestRequest::get(format!("{}{}?{}", self.base_url, path, qs))
    }

    fn signed(&self, method: Method, path: &str, params: &[(&str, String)]) -> Result<RestRequest, ExchangeError> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(ExchangeError::MissingCredentials("binance"));
        }
        let query = signing::binance_signed_query(&self.api_secret, params, signing::timestamp_ms())?;
        Ok(RestRequest::new(method, format!("{}{}?{}", self.base_url, path, query))
            .with_headers(vec![("X-MBX-APIKEY", self.api_key.clone())]))
    }

    async fn free_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        let data = self
            .rest
            .send("/api/v3/account", || self.signed(Method::GET, "/api/v3/account", &[]))
            .await?;

        let free = data
            .get("balances")
            .and_then(Value::as_array)
            .and_then(|balances| {
                balances
                    .iter()
                    .find(|b| b.get("asset").and_then(Value::as_str) == Some(asset))
            })
            .map(|b| json_decimal_or_zero(b, "free"))
            .unwrap_or(Decimal::ZERO);

        Ok(free)
    }

    async fn kline_page(&self, symbol: &str, tf: Timeframe, limit: usize, end_ms: Option<i64>) -> Result<Vec<Candle>, ExchangeError> {
        let mut query = vec![
            ("symbol", symbol.to_string()),
            ("interval", tf.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(end) = end_ms {
            query.push(("endTime", end.to_string()));
        }
        let data = self
            .rest
            .send("/api/v3/klines", || Ok(self.public("/api/v3/klines", &query)))
            .await?;

        let rows = data
            .as_array()
            .ok_or_else(|| ExchangeError::Parse("klines response is not an array".to_string()))?;
        Ok(rows.iter().filter_map(parse_kline).collect())
    }

    async fn place_order(&self, params: Vec<(&str, String)>) -> Result<Value, ExchangeError> {
        self.rest
            .send_order("/api/v3/order", || self.signed(Method::POST, "/api/v3/order", &params))
            .await
    }
}

/// Average fill price: fills VWAP, else cumulative quote over executed quantity.
fn average_fill_price(data: &Value, executed_qty: Decimal) -> Decimal {
    if executed_qty.is_zero() {
        return Decimal::ZERO;
    }

    if let Some(fills) = data.get("fills").and_then(Value::as_array).filter(|f| !f.is_empty()) {
        let cost: Decimal = fills
            .iter()
            .map(|f| json_decimal_or_zero(f, "price") * json_decimal_or_zero(f, "qty"))
            .sum();
        return cost / executed_qty;
    }

    json_decimal_or_zero(data, "cummulativeQuoteQty") / executed_qty
}

fn order_result(data: &Value, symbol: &str, side: Side, avg_price: Decimal) -> OrderResult {
    let order_id = match data.get("orderId") {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => String::new(),
    };
    OrderResult {
        order_id,
        symbol: symbol.to_string(),
        side,
        status: data
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        executed_qty: json_decimal_or_zero(data, "executedQty"),
        avg_price,
    }
}

fn parse_kline(row: &Value) -> Option<Candle> {
    Some(Candle {
        close_time_ms: row.get(6)?.as_i64()?,
        open: json_decimal(row.get(1)?)?,
        high: json_decimal(row.get(2)?)?,
        low: json_decimal(row.get(3)?)?,
        close: json_decimal(row.get(4)?)?,
        volume: json_decimal(row.get(5)?)?,
    })
}

#[async_trait]
impl Exchange for BinanceSpot {
    fn name(&self) -> &str {
        "binance"
    }

    #[instrument(skip(self))]
    async fn fetch_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let query = [("symbol", symbol.to_string())];
        let data = self
            .rest
            .send("/api/v3/ticker/price", || Ok(self.public("/api/v3/ticker/price", &query)))
            .await?;

        data.get("price")
            .and_then(json_decimal)
            .ok_or_else(|| ExchangeError::Parse(format!("ticker price missing for {symbol}")))
    }

    #[instrument(skip(self, tf), fields(tf = %tf))]
    async fn fetch_ohlcv(&self, symbol: &str, tf: Timeframe, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        let candles = fetch_klines_paged(tf, limit, |n, end| self.kline_page(symbol, tf, n, end)).await?;
        debug!(symbol, count = candles.len(), "Fetched klines");
        Ok(candles)
    }

    #[instrument(skip(self))]
    async fn fetch_usdt_balance(&self) -> Result<Decimal, ExchangeError> {
        self.free_balance(super::QUOTE_ASSET).await
    }

    #[instrument(skip(self))]
    async fn fetch_base_free(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.free_balance(base_asset(symbol)).await
    }

    #[instrument(skip(self))]
    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook, ExchangeError> {
        let query = [("symbol", symbol.to_string()), ("limit", depth.to_string())];
        let data = self
            .rest
            .send("/api/v3/depth", || Ok(self.public("/api/v3/depth", &query)))
            .await?;

        Ok(OrderBook::new(json_levels(data.get("bids")), json_levels(data.get("asks"))))
    }

    #[instrument(skip(self, quote_usdt), fields(quote = %quote_usdt))]
    async fn market_buy_quote(&self, symbol: &str, quote_usdt: Decimal) -> Result<OrderResult, ExchangeError> {
        let data = self
            .place_order(vec![
                ("symbol", symbol.to_string()),
                ("side", "BUY".to_string()),
                ("type", "MARKET".to_string()),
                ("quoteOrderQty", format!("{:.6}", quote_usdt)),
            ])
            .await?;

        let executed_qty = json_decimal_or_zero(&data, "executedQty");
        let avg_price = average_fill_price(&data, executed_qty);
        Ok(order_result(&data, symbol, Side::Buy, avg_price))
    }

    #[instrument(skip(self, qty), fields(qty = %qty))]
    async fn market_sell_base(&self, symbol: &str, qty: Decimal) -> Result<OrderResult, ExchangeError> {
        let data = self
            .place_order(vec![
                ("symbol", symbol.to_string()),
                ("side", "SELL".to_string()),
                ("type", "MARKET".to_string()),
                ("quantity", format!("{:.8}", qty)),
            ])
            .await?;

        let executed_qty = json_decimal_or_zero(&data, "executedQty");
        let avg_price = if executed_qty.is_zero() {
            Decimal::ZERO
        } else {
            json_decimal_or_zero(&data, "cummulativeQuoteQty") / executed_qty
        };
        Ok(order_result(&data, symbol, Side::Sell, avg_price))
    }

    #[instrument(skip(self, qty, price), fields(qty = %qty, price = %price))]
    async fn limit_sell_base(&self, symbol: &str, qty: Decimal, price: Decimal) -> Result<OrderResult, ExchangeError> {
        let data = self
            .place_order(vec![
                ("symbol", symbol.to_string()),
                ("side", "SELL".to_string()),
                ("type", "LIMIT".to_string()),
                ("timeInForce", "GTC".to_string()),
                ("quantity", format!("{:.8}", qty)),
                ("price", format!("{:.2}", price)),
            ])
            .await?;

        let limit_price = data.get("price").and_then(json_decimal).unwrap_or(price);
        Ok(order_result(&data, symbol, Side::Sell, limit_price))
    }

    #[instrument(skip(self))]
    async fn cancel_all(&self, symbol: &str) -> Result<(), ExchangeError> {
        let params = [("symbol", symbol.to_string())];
        self.rest
            .send_order("/api/v3/openOrders", || {
                self.signed(Method::DELETE, "/api/v3/openOrders", &params)
            })
            .await?;
        Ok(())
    }
}
