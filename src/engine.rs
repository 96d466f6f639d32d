//! Live trading engine.
//!
//! Consumes closed primary candles, manages the open position of each symbol
//! and opens new longs when the multi-timeframe signal and every entry gate
//! agree. One engine task owns all mutable state; the HTTP API reads a
//! published [`EngineStatus`] snapshot.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::error::{BotError, MarketDataError, TradingError};
use crate::exchange::ws::KlineMsg;
use crate::exchange::Exchange;
use crate::market::{closes, Candle, CandleSeries, Timeframe};
use crate::metrics;
use crate::portfolio::{Portfolio, Position};
use crate::risk::{FillSide, RiskManager};
use crate::router::SmartRouter;
use crate::store::{TradeStore, TradeSummary};
use crate::strategy::{
    classify_regime, compute_long_signal, orderbook_signal, MlSignalFilter, SignalParams,
    IMBALANCE_DEPTH,
};

/// Snapshot of the engine for the status endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatus {
    /// Venue name.
    pub exchange: String,
    /// `dry_run` or `live`.
    pub mode: String,
    /// Traded symbols.
    pub symbols: Vec<String>,
    /// Entries disabled.
    pub kill_switch: bool,
    /// Closed candles processed per symbol since start.
    pub candles_seen: BTreeMap<String, u64>,
    /// Last close per symbol.
    pub last_close: BTreeMap<String, Decimal>,
    /// Open positions.
    pub positions: Vec<Position>,
    /// Journal aggregate.
    pub trades: TradeSummary,
}

/// Why a position was (partly) closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
enum ExitReason {
    PartialTp,
    Stop,
    TakeProfit,
}

/// Result of one market exit leg.
struct ExitFill {
    price: Decimal,
    pnl: Decimal,
    fee: Decimal,
}

/// Candle-driven long-only trading engine.
pub struct Engine {
    config: Config,
    router: SmartRouter,
    risk: RiskManager,
    portfolio: Portfolio,
    ml: MlSignalFilter,
    params: SignalParams,
    store: TradeStore,
    primary_tf: Timeframe,
    secondary_tf: Timeframe,
    confirm_tf: Timeframe,
    series: HashMap<String, CandleSeries>,
    idx: HashMap<String, u64>,
    ready: Arc<AtomicBool>,
    status: Arc<RwLock<EngineStatus>>,
}

fn higher_timeframe(key: &'static str, raw: &str) -> Result<Timeframe, BotError> {
    let tf = Timeframe::from_str(raw)?;
    match tf {
        Timeframe::M30 | Timeframe::H1 => Ok(tf),
        other => {
            warn!(key, tf = %other, "Only 30m and 1h higher timeframes are supported");
            Err(MarketDataError::UnsupportedResample(other.to_string()).into())
        }
    }
}

impl Engine {
    /// Create an engine trading `config.symbols` on `exchange`, journaling to `store`.
    pub fn new(config: Config, exchange: Arc<dyn Exchange>, store: TradeStore) -> Result<Self, BotError> {
        let primary_tf = config.primary_timeframe()?;
        let secondary_tf = higher_timeframe("SECONDARY_TF", &config.secondary_tf)?;
        let confirm_tf = higher_timeframe("CONFIRM_TF", &config.confirm_tf)?;

        let symbols = config.symbol_list();
        let status = EngineStatus {
            exchange: exchange.name().to_string(),
            mode: if config.dry_run { "dry_run" } else { "live" }.to_string(),
            symbols: symbols.clone(),
            kill_switch: config.kill_switch,
            ..EngineStatus::default()
        };

        Ok(Self {
            risk: RiskManager::from_config(&config),
            ml: MlSignalFilter::new(config.ml_enabled, config.ml_min_proba),
            params: SignalParams::from_config(&config),
            router: SmartRouter::new(exchange),
            portfolio: Portfolio::new(),
            store,
            primary_tf,
            secondary_tf,
            confirm_tf,
            series: HashMap::new(),
            idx: symbols.into_iter().map(|s| (s, 0)).collect(),
            ready: Arc::new(AtomicBool::new(false)),
            status: Arc::new(RwLock::new(status)),
            config,
        })
    }

    /// Replace the ML filter, e.g. with a fitted model.
    pub fn with_ml_filter(mut self, ml: MlSignalFilter) -> Self {
        self.ml = ml;
        self
    }

    /// Set once every symbol is seeded and live candles are flowing.
    pub fn ready_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ready)
    }

    /// Shared snapshot refreshed after every processed candle.
    pub fn status_handle(&self) -> Arc<RwLock<EngineStatus>> {
        Arc::clone(&self.status)
    }

    /// Open positions and cooldowns.
    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    /// The journal.
    pub fn store(&self) -> &TradeStore {
        &self.store
    }

    /// Primary history of `symbol`.
    pub fn series(&self, symbol: &str) -> Option<&CandleSeries> {
        self.series.get(symbol)
    }

    /// Closed candles processed for `symbol`.
    pub fn candle_index(&self, symbol: &str) -> u64 {
        self.idx.get(symbol).copied().unwrap_or(0)
    }

    /// Load the primary history for `symbol` from REST.
    #[instrument(skip(self))]
    pub async fn seed_history(&mut self, symbol: &str) -> Result<(), BotError> {
        let candles = self
            .router
            .exchange()
            .fetch_ohlcv(symbol, self.primary_tf, self.config.seed_candles)
            .await?;
        let series = CandleSeries::from_candles(candles, self.config.max_history);
        info!(rows = series.len(), "Seeded history");

        self.series.insert(symbol.to_string(), series);
        self.idx.entry(symbol.to_string()).or_insert(0);
        Ok(())
    }

    /// Process one closed primary candle: record it, manage the open position, then look for an entry.
    pub async fn on_closed_candle(&mut self, symbol: &str, candle: Candle) -> Result<(), BotError> {
        let series = self
            .series
            .get_mut(symbol)
            .ok_or_else(|| MarketDataError::NoHistory(symbol.to_string()))?;
        series.upsert(candle);

        let idx = {
            let counter = self.idx.entry(symbol.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        debug!(symbol, idx, close = %candle.close, "Closed candle");

        self.manage_open_position(symbol, candle.close, idx).await?;
        self.maybe_open_position(symbol, idx).await
    }

    /// Evaluate the entry pipeline for `symbol` at candle `idx`.
    pub async fn maybe_open_position(&mut self, symbol: &str, idx: u64) -> Result<(), BotError> {
        if self.portfolio.has_position(symbol) || self.portfolio.in_cooldown(symbol, idx) {
            return Ok(());
        }
        if self.config.kill_switch {
            debug!(symbol, "Kill switch on, entries disabled");
            return Ok(());
        }

        let series = self
            .series
            .get(symbol)
            .ok_or_else(|| MarketDataError::NoHistory(symbol.to_string()))?;
        let primary = series.candles();
        let secondary = series.resample(self.secondary_tf)?;
        let confirm = series.resample(self.confirm_tf)?;
        let last_close = series.last().map(|c| c.close).unwrap_or(Decimal::ZERO);

        let Some(signal) = compute_long_signal(primary, &secondary, &confirm, &self.params) else {
            debug!(symbol, rows = primary.len(), "Not enough history for a signal");
            metrics::inc_signals("NO_SIGNAL");
            return Ok(());
        };
        metrics::inc_signals(&signal.action.to_string());
        if !signal.is_buy() {
            info!(symbol, reason = %signal.reason, "Signal hold");
            return Ok(());
        }

        if self.config.use_regime_filter {
            let regime = classify_regime(&closes(primary));
            if !regime.allows_long(self.config.allow_neutral_regime) {
                info!(symbol, %regime, "Regime blocks entry");
                return Ok(());
            }
        }

        if self.config.orderbook_imbalance_min > 0.0 {
            let book = self
                .router
                .exchange()
                .fetch_order_book(symbol, IMBALANCE_DEPTH)
                .await?;
            let (ok, imbalance) = orderbook_signal(&book, self.config.orderbook_imbalance_min);
            if !ok {
                info!(symbol, imbalance, min = self.config.orderbook_imbalance_min, "Order book blocks entry");
                return Ok(());
            }
        }

        if self.config.ml_enabled && !self.ml.allow(&signal.features) {
            info!(
                symbol,
                proba = self.ml.predict_proba(&signal.features),
                min = self.config.ml_min_proba,
                "ML filter rejects entry"
            );
            return Ok(());
        }

        let free_usdt = self.router.exchange().fetch_usdt_balance().await?;
        let notional = self.risk.order_notional_usdt(free_usdt);
        if notional < self.config.min_notional_usdt {
            warn!(symbol, %free_usdt, %notional, min = %self.config.min_notional_usdt, "Notional too small");
            return Ok(());
        }

        let buy = self.router.open_long(symbol, notional).await?;
        if buy.executed_qty <= Decimal::ZERO {
            return Err(TradingError::OrderRejected {
                reason: format!("buy {} on {symbol} filled nothing", buy.order_id),
            }
            .into());
        }

        let fill = if buy.avg_price > Decimal::ZERO { buy.avg_price } else { last_close };
        let entry = self.risk.apply_slippage(fill, FillSide::Entry);
        let qty = buy.executed_qty;
        let atr = signal.atr_decimal();
        let (stop, tp) = self.risk.stops_from_atr(entry, atr);
        let fee = self.risk.fee_usd(notional, true);

        let meta = json!({
            "reason": signal.reason.to_string(),
            "atr": signal.atr_value,
            "order_id": buy.order_id,
        });
        let trade_id = self
            .store
            .insert_entry(self.router.exchange().name(), symbol, qty, entry, fee, &meta)
            .await?;

        self.portfolio.open(
            Position {
                symbol: symbol.to_string(),
                qty,
                entry_price: entry,
                entry_time: Utc::now(),
                atr_at_entry: atr,
                stop_price: stop,
                tp_price: tp,
                best_price: entry,
                trailing_enabled: self.config.trailing_enabled,
                trailing_stop: stop,
                trade_id,
                partial_done: false,
                realized_pnl: Decimal::ZERO,
                realized_fee: Decimal::ZERO,
            },
            idx,
            self.config.cooldown_candles,
        );
        metrics::inc_entries(symbol);
        metrics::set_open_positions(self.portfolio.len());
        info!(symbol, %qty, %entry, %stop, %tp, trade_id, "Entered long");

        let part = self.risk.partial_qty(qty);
        if part > Decimal::ZERO {
            self.router.place_partial_tp_limit(symbol, part, tp).await;
        }
        Ok(())
    }

    /// Apply trailing, partial take-profit, stop and final take-profit rules to the open position.
    pub async fn manage_open_position(&mut self, symbol: &str, last_close: Decimal, idx: u64) -> Result<(), BotError> {
        let Some(mut pos) = self.portfolio.get(symbol).cloned() else {
            return Ok(());
        };

        if last_close > pos.best_price {
            pos.best_price = last_close;
            if pos.trailing_enabled {
                pos.trailing_stop = self.risk.trailing_stop(pos.best_price, pos.atr_at_entry);
            }
            self.replace_position(&pos);
        }
        let stop_level = pos.stop_level();

        if !pos.partial_done && last_close >= pos.tp_price {
            let part = self.risk.partial_qty(pos.qty);
            if part > Decimal::ZERO {
                // The resting TP limit must not fill on top of the market sell.
                self.router.cancel_all(symbol).await;
                let fill = self.sell(&pos, part, last_close, ExitReason::PartialTp).await?;
                pos.qty -= part;
                pos.realized_pnl += fill.pnl;
                pos.realized_fee += fill.fee;
                info!(symbol, qty = %part, exit = %fill.price, pnl = %fill.pnl, "Partial take-profit");
                pos.partial_done = true;
                self.replace_position(&pos);
            }
        }

        if last_close <= stop_level {
            self.exit_remaining(pos, last_close, idx, ExitReason::Stop).await?;
            info!(symbol, stop = %stop_level, "Stop exit");
            return Ok(());
        }

        // With no partial configured the whole position leaves at take-profit.
        let partial_settled = pos.partial_done || self.risk.partial_qty(pos.qty) <= Decimal::ZERO;
        if partial_settled && last_close >= pos.tp_price {
            self.exit_remaining(pos, last_close, idx, ExitReason::TakeProfit).await?;
            info!(symbol, tp = %last_close, "Take-profit exit");
        }
        Ok(())
    }

    async fn sell(&self, pos: &Position, qty: Decimal, last_close: Decimal, reason: ExitReason) -> Result<ExitFill, BotError> {
        let sell = self.router.close_long_market(&pos.symbol, qty).await?;
        let fill = if sell.avg_price > Decimal::ZERO { sell.avg_price } else { last_close };
        let price = self.risk.apply_slippage(fill, FillSide::Exit);
        let fee = self.risk.fee_usd(qty * price, true);
        let pnl = (price - pos.entry_price) * qty - fee;
        metrics::inc_exits(&reason.to_string());
        Ok(ExitFill { price, pnl, fee })
    }

    async fn exit_remaining(&mut self, pos: Position, last_close: Decimal, idx: u64, reason: ExitReason) -> Result<(), BotError> {
        if pos.qty > Decimal::ZERO {
            let fill = self.sell(&pos, pos.qty, last_close, reason).await?;
            let pnl = pos.realized_pnl + fill.pnl;
            self.store
                .close_trade(pos.trade_id, fill.price, pnl, pos.realized_fee + fill.fee)
                .await?;
            info!(
                symbol = %pos.symbol,
                qty = %pos.qty,
                exit = %fill.price,
                %pnl,
                %reason,
                trade_id = pos.trade_id,
                "Position closed"
            );
        }

        self.router.cancel_all(&pos.symbol).await;
        self.portfolio.close(&pos.symbol, idx, self.config.cooldown_candles);
        metrics::set_open_positions(self.portfolio.len());
        Ok(())
    }

    fn replace_position(&mut self, pos: &Position) {
        if let Some(slot) = self.portfolio.get_mut(&pos.symbol) {
            *slot = pos.clone();
        }
    }

    /// Snapshot of positions, counters and the journal summary.
    pub async fn status(&self) -> Result<EngineStatus, BotError> {
        let mut snapshot = self.status.read().await.clone();
        snapshot.candles_seen = self.idx.iter().map(|(s, i)| (s.clone(), *i)).collect();
        snapshot.last_close = self
            .series
            .iter()
            .filter_map(|(s, series)| series.last().map(|c| (s.clone(), c.close)))
            .collect();
        snapshot.positions = self.portfolio.positions().cloned().collect();
        snapshot.positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        snapshot.trades = self.store.summary().await?;
        Ok(snapshot)
    }

    async fn publish_status(&self) {
        match self.status().await {
            Ok(snapshot) => *self.status.write().await = snapshot,
            Err(e) => warn!(error = %e, "Failed to refresh status"),
        }
    }

    /// Initialise the journal, seed every symbol, then trade closed klines until
    /// the stream ends or `shutdown` resolves.
    pub async fn run_live<S>(&mut self, mut klines: mpsc::Receiver<KlineMsg>, shutdown: S) -> Result<(), BotError>
    where
        S: Future<Output = ()>,
    {
        self.store.init().await?;
        for symbol in self.config.symbol_list() {
            self.seed_history(&symbol).await?;
        }
        self.publish_status().await;
        self.ready.store(true, Ordering::SeqCst);

        info!(
            exchange = %self.router.exchange().name(),
            symbols = ?self.config.symbol_list(),
            tf = %self.primary_tf,
            "Live trading started"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping engine");
                    break;
                }
                msg = klines.recv() => {
                    let Some(kline) = msg else {
                        warn!("Kline stream ended");
                        break;
                    };
                    if !kline.is_closed || !self.series.contains_key(&kline.symbol) {
                        continue;
                    }
                    if let Err(e) = self.on_closed_candle(&kline.symbol, kline.to_candle()).await {
                        error!(symbol = %kline.symbol, error = %e, "Candle processing failed");
                    }
                    self.publish_status().await;
                }
            }
        }

        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::{MockConfig, MockExchange};
    use crate::strategy::{LogisticModel, OrderBook, PriceLevel, Regime};
    use rust_decimal_macros::dec;

    const M15: i64 = 15 * 60_000;
    const SYMBOL: &str = "BTCUSDT";

    fn config() -> Config {
        Config {
            symbols: SYMBOL.to_string(),
            ema_fast: 5,
            ema_slow: 20,
            rsi_period: 5,
            atr_period: 5,
            ..Config::default()
        }
    }

    /// Rising closes with a half-step pullback every third bar; ends at 160.
    fn trending(n: i64) -> Vec<Candle> {
        let mut price = dec!(100);
        (1..=n)
            .map(|i| {
                price += if i % 3 == 0 { dec!(-0.5) } else { dec!(1) };
                candle(i, price)
            })
            .collect()
    }

    fn candle(i: i64, close: Decimal) -> Candle {
        Candle {
            close_time_ms: i * M15 - 1,
            open: close,
            high: close + dec!(0.5),
            low: close - dec!(0.5),
            close,
            volume: dec!(1),
        }
    }

    /// Straight decline from 399 to 150 over 250 bars, then a `trending` recovery leg.
    fn bear_rally(rally: i64) -> Vec<Candle> {
        let mut candles: Vec<Candle> = (1..=250).map(|i| candle(i, Decimal::from(400 - i))).collect();
        let mut price = dec!(150);
        for i in 251..=250 + rally {
            price += if i % 3 == 0 { dec!(-0.5) } else { dec!(1) };
            candles.push(candle(i, price));
        }
        candles
    }

    /// Closed candle one step above the end of `history`.
    fn breakout(history: &[Candle]) -> Candle {
        let last = history.last().unwrap();
        candle(history.len() as i64 + 1, last.close + dec!(1))
    }

    async fn engine_on(mock: &MockExchange, config: Config, history: Vec<Candle>) -> Engine {
        mock.set_candles(SYMBOL, history);
        mock.set_usdt_balance(dec!(10000));
        // 300 USDT notional buys exactly 2 units.
        mock.set_price(dec!(150));

        let store = TradeStore::connect(":memory:").await.unwrap();
        store.init().await.unwrap();
        let mut engine = Engine::new(config, Arc::new(mock.clone()), store).unwrap();
        engine.seed_history(SYMBOL).await.unwrap();
        engine
    }

    async fn engine_with(mock: &MockExchange, config: Config) -> Engine {
        engine_on(mock, config, trending(120)).await
    }

    async fn entered(mock: &MockExchange) -> Engine {
        let mut engine = engine_with(mock, config()).await;
        engine.on_closed_candle(SYMBOL, candle(121, dec!(161))).await.unwrap();
        assert!(engine.portfolio().has_position(SYMBOL));
        engine
    }

    #[tokio::test]
    async fn uptrend_candle_opens_long_with_partial_tp() {
        let mock = MockExchange::new();
        let engine = entered(&mock).await;

        let pos = engine.portfolio().get(SYMBOL).unwrap();
        assert_eq!(pos.qty, dec!(2));
        assert_eq!(pos.entry_price, dec!(150.075));
        assert!(pos.stop_price < pos.entry_price && pos.tp_price > pos.entry_price);
        assert_eq!(pos.trailing_stop, pos.stop_price);

        let orders = mock.orders();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].status, "FILLED");
        assert_eq!(orders[1].status, "NEW");
        assert_eq!(orders[1].avg_price, pos.tp_price);

        let row = engine.store().get(pos.trade_id).await.unwrap().unwrap();
        assert!(!row.is_closed());
        assert_eq!(row.fee_usd, dec!(300) * dec!(0.001));
        assert_eq!(row.meta["reason"], "LONG_SETUP");
    }

    #[tokio::test]
    async fn stop_exit_closes_journal_and_starts_cooldown() {
        let mock = MockExchange::new();
        let mut engine = entered(&mock).await;
        let trade_id = engine.portfolio().get(SYMBOL).unwrap().trade_id;

        mock.set_price(dec!(100));
        engine.on_closed_candle(SYMBOL, candle(122, dec!(100))).await.unwrap();

        assert!(!engine.portfolio().has_position(SYMBOL));
        assert!(engine.portfolio().in_cooldown(SYMBOL, engine.candle_index(SYMBOL)));
        assert_eq!(mock.cancels(), vec![SYMBOL.to_string()]);

        let row = engine.store().get(trade_id).await.unwrap().unwrap();
        assert!(row.is_closed());
        assert_eq!(row.exit_price, Some(dec!(100) * dec!(0.9995)));
        assert!(row.pnl_usd.unwrap() < Decimal::ZERO);
    }

    #[tokio::test]
    async fn take_profit_sells_partial_then_remainder() {
        let mock = MockExchange::new();
        let mut engine = entered(&mock).await;
        let pos = engine.portfolio().get(SYMBOL).unwrap().clone();

        mock.set_price(dec!(200));
        engine.on_closed_candle(SYMBOL, candle(122, dec!(200))).await.unwrap();

        assert!(engine.portfolio().is_empty());
        let sells: Vec<Decimal> = mock.orders().iter().skip(2).map(|o| o.executed_qty).collect();
        assert_eq!(sells, vec![dec!(1), dec!(1)]);

        let exit = dec!(200) * dec!(0.9995);
        let gross = (exit - pos.entry_price) * pos.qty;
        let fees = exit * pos.qty * dec!(0.001);
        let row = engine.store().get(pos.trade_id).await.unwrap().unwrap();
        assert_eq!(row.pnl_usd, Some(gross - fees));
        assert_eq!(row.fee_usd, dec!(0.3) + fees);
    }

    #[tokio::test]
    async fn without_partial_take_profit_exits_whole_position() {
        let mock = MockExchange::new();
        let config = Config {
            partial_tp_pct: Decimal::ZERO,
            ..config()
        };
        let mut engine = engine_with(&mock, config).await;
        engine.on_closed_candle(SYMBOL, candle(121, dec!(161))).await.unwrap();
        let pos = engine.portfolio().get(SYMBOL).unwrap().clone();
        assert!(!pos.partial_done);
        // Entry only, no resting take-profit.
        assert_eq!(mock.orders().len(), 1);

        mock.set_price(dec!(200));
        engine.on_closed_candle(SYMBOL, candle(122, dec!(200))).await.unwrap();

        assert!(engine.portfolio().is_empty());
        let sells: Vec<Decimal> = mock.orders().iter().skip(1).map(|o| o.executed_qty).collect();
        assert_eq!(sells, vec![dec!(2)]);
        let row = engine.store().get(pos.trade_id).await.unwrap().unwrap();
        assert!(row.is_closed());
    }

    #[tokio::test]
    async fn rising_close_lifts_trailing_stop() {
        let mock = MockExchange::new();
        let mut engine = entered(&mock).await;
        let before = engine.portfolio().get(SYMBOL).unwrap().clone();

        let higher = before.best_price + dec!(0.5);
        engine.on_closed_candle(SYMBOL, candle(122, higher)).await.unwrap();

        let after = engine.portfolio().get(SYMBOL).unwrap();
        assert_eq!(after.best_price, higher);
        assert!(after.trailing_stop > before.trailing_stop);
        assert_eq!(mock.orders().len(), 2);
    }

    #[tokio::test]
    async fn kill_switch_blocks_entries() {
        let mock = MockExchange::new();
        let config = Config {
            kill_switch: true,
            ..config()
        };
        let mut engine = engine_with(&mock, config).await;
        engine.on_closed_candle(SYMBOL, candle(121, dec!(161))).await.unwrap();
        assert!(engine.portfolio().is_empty());
        assert!(mock.orders().is_empty());
    }

    #[tokio::test]
    async fn regime_filter_needs_long_history() {
        let mock = MockExchange::new();
        let config = Config {
            use_regime_filter: true,
            ..config()
        };
        let mut engine = engine_with(&mock, config).await;
        engine.on_closed_candle(SYMBOL, candle(121, dec!(161))).await.unwrap();
        assert!(engine.portfolio().is_empty());
        assert!(mock.orders().is_empty());
    }

    #[tokio::test]
    async fn bear_regime_blocks_rally_entry() {
        let history = bear_rally(60);
        let entry = breakout(&history);
        let mut seen = history.clone();
        seen.push(entry);
        assert_eq!(classify_regime(&closes(&seen)), Regime::Bear);

        // Without the filter the same rally is a long setup.
        let mock = MockExchange::new();
        let mut engine = engine_on(&mock, config(), history.clone()).await;
        engine.on_closed_candle(SYMBOL, entry).await.unwrap();
        assert!(engine.portfolio().has_position(SYMBOL));

        let mock = MockExchange::new();
        let config = Config {
            use_regime_filter: true,
            allow_neutral_regime: true,
            ..config()
        };
        let mut engine = engine_on(&mock, config, history).await;
        engine.on_closed_candle(SYMBOL, entry).await.unwrap();
        assert!(engine.portfolio().is_empty());
        assert!(mock.orders().is_empty());
    }

    #[tokio::test]
    async fn bull_regime_allows_entry() {
        let history = trending(250);
        let entry = breakout(&history);
        let mock = MockExchange::new();
        let config = Config {
            use_regime_filter: true,
            allow_neutral_regime: false,
            ..config()
        };
        let mut engine = engine_on(&mock, config, history).await;
        engine.on_closed_candle(SYMBOL, entry).await.unwrap();
        assert!(engine.portfolio().has_position(SYMBOL));
    }

    #[tokio::test]
    async fn small_balance_skips_entry() {
        let mock = MockExchange::new();
        let mut engine = engine_with(&mock, config()).await;
        mock.set_usdt_balance(dec!(100));
        engine.on_closed_candle(SYMBOL, candle(121, dec!(161))).await.unwrap();
        assert!(mock.orders().is_empty());
    }

    #[tokio::test]
    async fn strict_ml_threshold_rejects_untrained_model() {
        let mock = MockExchange::new();
        let config = Config {
            ml_min_proba: 0.9,
            ..config()
        };
        let mut engine = engine_with(&mock, config).await;
        engine.on_closed_candle(SYMBOL, candle(121, dec!(161))).await.unwrap();
        assert!(mock.orders().is_empty());
    }

    #[tokio::test]
    async fn fitted_model_can_veto_entry() {
        let mock = MockExchange::new();
        let ml = MlSignalFilter::new(true, 0.55).with_model(LogisticModel {
            weights: vec![0.0; 6],
            bias: -5.0,
        });
        let mut engine = engine_with(&mock, config()).await.with_ml_filter(ml);
        engine.on_closed_candle(SYMBOL, candle(121, dec!(161))).await.unwrap();
        assert!(mock.orders().is_empty());
    }

    #[tokio::test]
    async fn order_book_imbalance_gates_entry() {
        let thin_bids = OrderBook::new(
            vec![PriceLevel::new(dec!(149), dec!(1))],
            vec![PriceLevel::new(dec!(151), dec!(5))],
        );
        let config = Config {
            orderbook_imbalance_min: 1.5,
            ..config()
        };

        let mock = MockExchange::new();
        mock.set_order_book(thin_bids);
        let mut engine = engine_with(&mock, config.clone()).await;
        engine.on_closed_candle(SYMBOL, candle(121, dec!(161))).await.unwrap();
        assert!(engine.portfolio().is_empty());

        let mock = MockExchange::new();
        mock.set_order_book(OrderBook::new(
            vec![PriceLevel::new(dec!(149), dec!(5))],
            vec![PriceLevel::new(dec!(151), dec!(1))],
        ));
        let mut engine = engine_with(&mock, config).await;
        engine.on_closed_candle(SYMBOL, candle(121, dec!(161))).await.unwrap();
        assert!(engine.portfolio().has_position(SYMBOL));
    }

    #[tokio::test]
    async fn failed_buy_leaves_no_position() {
        let mock = MockExchange::with_config(MockConfig {
            fail_orders: true,
            ..MockConfig::default()
        });
        let mut engine = engine_with(&mock, config()).await;
        let result = engine.on_closed_candle(SYMBOL, candle(121, dec!(161))).await;
        assert!(result.is_err());
        assert!(engine.portfolio().is_empty());
        assert_eq!(engine.store().summary().await.unwrap().open, 0);
    }

    #[tokio::test]
    async fn unseeded_symbol_is_an_error() {
        let mock = MockExchange::new();
        let mut engine = engine_with(&mock, config()).await;
        let err = engine.on_closed_candle("ETHUSDT", candle(1, dec!(1))).await.unwrap_err();
        assert!(matches!(err, BotError::MarketData(MarketDataError::NoHistory(_))));
    }

    #[tokio::test]
    async fn status_reports_positions_and_counters() {
        let mock = MockExchange::new();
        let engine = entered(&mock).await;
        let status = engine.status().await.unwrap();
        assert_eq!(status.exchange, "mock");
        assert_eq!(status.mode, "dry_run");
        assert_eq!(status.positions.len(), 1);
        assert_eq!(status.candles_seen[SYMBOL], 1);
        assert_eq!(status.last_close[SYMBOL], dec!(161));
        assert_eq!(status.trades.open, 1);
    }

    #[tokio::test]
    async fn unsupported_higher_timeframe_is_rejected() {
        let store = TradeStore::connect(":memory:").await.unwrap();
        let config = Config {
            secondary_tf: "4h".to_string(),
            ..config()
        };
        assert!(Engine::new(config, Arc::new(MockExchange::new()), store).is_err());
    }
}
