//! Bybit v5 spot REST adapter.

use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::rest::{RestClient, RestRequest};
use super::{
    base_asset, fetch_klines_paged, json_decimal, json_decimal_or_zero, json_levels, Exchange, OrderResult, Side, QUOTE_ASSET,
};
use crate::config::ExchangeSettings;
use crate::error::ExchangeError;
use crate::market::{Candle, Timeframe};
use crate::signing;
use crate::strategy::OrderBook;

const WALLET_QUERY: &str = "accountType=UNIFIED";

/// Bybit spot client (v5 unified account).
#[derive(Debug, Clone)]
pub struct BybitSpot {
    base_url: String,
    api_key: String,
    api_secret: String,
    rest: RestClient,
}

/// Unwrap the v5 envelope: non-zero `retCode` becomes an API error.
fn result_of(data: Value) -> Result<Value, ExchangeError> {
    let code = data.get("retCode").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        return Err(ExchangeError::Api {
            code,
            message: data
                .get("retMsg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }
    Ok(data.get("result").cloned().unwrap_or(Value::Null))
}

fn parse_kline(row: &Value, interval_ms: i64) -> Option<Candle> {
    let start: i64 = match row.get(0)? {
        Value::String(s) => s.parse().ok()?,
        v => v.as_i64()?,
    };
    Some(Candle {
        close_time_ms: start + interval_ms - 1,
        open: json_decimal(row.get(1)?)?,
        high: json_decimal(row.get(2)?)?,
        low: json_decimal(row.get(3)?)?,
        close: json_decimal(row.get(4)?)?,
        volume: json_decimal(row.get(5)?)?,
    })
}

impl BybitSpot {
    /// Create a client for the given settings.
    pub fn new(settings: &ExchangeSettings, rest: RestClient) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
            rest,
        }
    }

    fn ensure_credentials(&self) -> Result<(), ExchangeError> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(ExchangeError::MissingCredentials("bybit"));
        }
        Ok(())
    }

    async fn public(&self, path: &str, query: String) -> Result<Value, ExchangeError> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        let data = self.rest.send(path, || Ok(RestRequest::get(url.clone()))).await?;
        result_of(data)
    }

    async fn kline_page(&self, symbol: &str, tf: Timeframe, limit: usize, end_ms: Option<i64>) -> Result<Vec<Candle>, ExchangeError> {
        let mut query = format!("category=spot&symbol={symbol}&interval={}&limit={limit}", tf.bybit_interval());
        if let Some(end) = end_ms {
            query.push_str(&format!("&end={end}"));
        }
        let result = self.public("/v5/market/kline", query).await?;

        let rows = result
            .get("list")
            .and_then(Value::as_array)
            .ok_or_else(|| ExchangeError::Parse("kline list missing".to_string()))?;

        // Newest first on the wire.
        Ok(rows
            .iter()
            .rev()
            .filter_map(|row| parse_kline(row, tf.millis()))
            .collect())
    }

    async fn signed_get(&self, path: &str, query: &str) -> Result<Value, ExchangeError> {
        self.ensure_credentials()?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        let data = self
            .rest
            .send(path, || {
                let headers = signing::bybit_auth_headers(&self.api_key, &self.api_secret, query, signing::timestamp_ms())?;
                Ok(RestRequest::get(url.clone()).with_headers(headers))
            })
            .await?;
        result_of(data)
    }

    async fn signed_post(&self, path: &str, body: Value) -> Result<Value, ExchangeError> {
        self.ensure_credentials()?;
        let url = format!("{}{}", self.base_url, path);
        let body = serde_json::to_string(&body).map_err(|e| ExchangeError::Parse(e.to_string()))?;
        let data = self
            .rest
            .send_order(path, || {
                let headers = signing::bybit_auth_headers(&self.api_key, &self.api_secret, &body, signing::timestamp_ms())?;
                Ok(RestRequest::new(Method::POST, url.clone())
                    .with_headers(headers)
                    .with_body(body.clone()))
            })
            .await?;
        result_of(data)
    }

    async fn coin_available(&self, coin: &str) -> Result<Decimal, ExchangeError> {
        let result = self.signed_get("/v5/account/wallet-balance", WALLET_QUERY).await?;

        let available = result
            .get("list")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|account| account.get("coin").and_then(Value::as_array))
            .flatten()
            .find(|c| c.get("coin").and_then(Value::as_str) == Some(coin))
            .map(|c| json_decimal_or_zero(c, "availableToWithdraw"))
            .unwrap_or(Decimal::ZERO);

        Ok(available)
    }

    async fn create_order(&self, body: Value) -> Result<String, ExchangeError> {
        let result = self.signed_post("/v5/order/create", body).await?;
        result
            .get("orderId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ExchangeError::Parse("orderId missing from order response".to_string()))
    }
}

#[async_trait]
impl Exchange for BybitSpot {
    fn name(&self) -> &str {
        "bybit"
    }

    #[instrument(skip(self))]
    async fn fetch_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let result = self
            .public("/v5/market/tickers", format!("category=spot&symbol={symbol}"))
            .await?;

        result
            .get("list")
            .and_then(|l| l.get(0))
            .and_then(|t| t.get("lastPrice"))
            .and_then(json_decimal)
            .ok_or_else(|| ExchangeError::Parse(format!("lastPrice missing for {symbol}")))
    }

    #[instrument(skip(self, tf), fields(tf = %tf))]
    async fn fetch_ohlcv(&self, symbol: &str, tf: Timeframe, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        let candles = fetch_klines_paged(tf, limit, |n, end| self.kline_page(symbol, tf, n, end)).await?;
        debug!(symbol, count = candles.len(), "Fetched klines");
        Ok(candles)
    }

    #[instrument(skip(self))]
    async fn fetch_usdt_balance(&self) -> Result<Decimal, ExchangeError> {
        self.coin_available(QUOTE_ASSET).await
    }

    #[instrument(skip(self))]
    async fn fetch_base_free(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.coin_available(base_asset(symbol)).await
    }

    #[instrument(skip(self))]
    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook, ExchangeError> {
        let result = self
            .public(
                "/v5/market/orderbook",
                format!("category=spot&symbol={symbol}&limit={depth}"),
            )
            .await?;

        Ok(OrderBook::new(json_levels(result.get("b")), json_levels(result.get("a"))))
    }

    #[instrument(skip(self, quote_usdt), fields(quote = %quote_usdt))]
    async fn market_buy_quote(&self, symbol: &str, quote_usdt: Decimal) -> Result<OrderResult, ExchangeError> {
        let price = self.fetch_price(symbol).await?;
        if price <= Decimal::ZERO {
            return Err(ExchangeError::Parse(format!("non-positive price for {symbol}")));
        }
        let qty = (quote_usdt / price).round_dp_with_strategy(8, RoundingStrategy::ToZero);

        let order_id = self
            .create_order(json!({
                "category": "spot",
                "symbol": symbol,
                "side": "Buy",
                "orderType": "Market",
                "qty": format!("{:.8}", qty),
            }))
            .await?;

        Ok(OrderResult {
            order_id,
            symbol: symbol.to_string(),
            side: Side::Buy,
            status: "NEW".to_string(),
            executed_qty: qty,
            avg_price: price,
        })
    }

    #[instrument(skip(self, qty), fields(qty = %qty))]
    async fn market_sell_base(&self, symbol: &str, qty: Decimal) -> Result<OrderResult, ExchangeError> {
        let price = self.fetch_price(symbol).await?;
        let order_id = self
            .create_order(json!({
                "category": "spot",
                "symbol": symbol,
                "side": "Sell",
                "orderType": "Market",
                "qty": format!("{:.8}", qty),
            }))
            .await?;

        Ok(OrderResult {
            order_id,
            symbol: symbol.to_string(),
            side: Side::Sell,
            status: "NEW".to_string(),
            executed_qty: qty,
            avg_price: price,
        })
    }

    #[instrument(skip(self, qty, price), fields(qty = %qty, price = %price))]
    async fn limit_sell_base(&self, symbol: &str, qty: Decimal, price: Decimal) -> Result<OrderResult, ExchangeError> {
        let order_id = self
            .create_order(json!({
                "category": "spot",
                "symbol": symbol,
                "side": "Sell",
                "orderType": "Limit",
                "qty": format!("{:.8}", qty),
                "price": format!("{:.6}", price),
                "timeInForce": "GTC",
            }))
            .await?;

        Ok(OrderResult {
            order_id,
            symbol: symbol.to_string(),
            side: Side::Sell,
            status: "NEW".to_string(),
            executed_qty: Decimal::ZERO,
            avg_price: price,
        })
    }

    #[instrument(skip(self))]
    async fn cancel_all(&self, symbol: &str) -> Result<(), ExchangeError> {
        self.signed_post("/v5/order/cancel-all", json!({"category": "spot", "symbol": symbol}))
            .await?;
        Ok(())
    }
}
