//! Bar-by-bar replay of the long strategy over historical primary candles.
//!
//! Entries use the same signal as the live engine; exits use the same
//! trailing, partial take-profit, stop and final take-profit rules, filled at
//! the slipped bar close.

pub mod walk_forward;

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::market::{resample, Candle, Timeframe};
use crate::risk::{FillSide, RiskManager};
use crate::strategy::{compute_long_signal, SignalParams};

pub use walk_forward::{run_walk_forward, walk_forward_splits, WalkForwardConfig};

/// Bars skipped before the first evaluation.
pub const WARMUP_BARS: usize = 300;

/// Summary of one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestReport {
    /// Final equity minus starting balance.
    pub pnl: Decimal,
    /// Winning exit legs over all exit legs.
    pub win_rate: f64,
    /// Worst peak-to-trough equity drop, as a non-positive fraction.
    pub max_dd: f64,
    /// Annualised Sharpe ratio of bar returns.
    pub sharpe: f64,
    /// Exit legs (partial exits count separately).
    pub trades: u64,
}

/// Worst relative drop from the running peak. Bars with a zero peak are ignored.
pub fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst: Option<f64> = None;
    for &value in equity {
        peak = peak.max(value);
        if peak == 0.0 {
            continue;
        }
        let dd = (value - peak) / peak;
        worst = Some(worst.map_or(dd, |w| w.min(dd)));
    }
    worst.unwrap_or(0.0)
}

/// Annualised mean/std of `returns` (population std). Zero with fewer than 50
/// returns or no variance.
pub fn sharpe(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 50 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    if std == 0.0 || !std.is_finite() {
        return 0.0;
    }
    mean / std * periods_per_year.sqrt()
}

/// Simple bar returns; the first bar and bars after a zero equity return 0.
fn bar_returns(equity: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(equity.len());
    out.push(0.0);
    for pair in equity.windows(2) {
        let r = if pair[0] == 0.0 { 0.0 } else { pair[1] / pair[0] - 1.0 };
        out.push(r);
    }
    if equity.is_empty() {
        out.clear();
    }
    out
}

#[derive(Debug)]
struct OpenTrade {
    qty: Decimal,
    entry: Decimal,
    atr: Decimal,
    stop: Decimal,
    tp: Decimal,
    best: Decimal,
    trailing: Decimal,
    partial_done: bool,
}

struct Simulator<'a> {
    risk: &'a RiskManager,
    trailing_enabled: bool,
    cash: Decimal,
    trade: Option<OpenTrade>,
    wins: u64,
    exits: u64,
}

impl Simulator<'_> {
    fn sell(&mut self, qty: Decimal, price: Decimal, entry: Decimal) {
        let px = self.risk.apply_slippage(price, FillSide::Exit);
        let fee = self.risk.fee_usd(qty * px, true);
        self.cash += qty * px - fee;
        if px > entry {
            self.wins += 1;
        }
        self.exits += 1;
    }

    fn manage(&mut self, price: Decimal) {
        let Some(mut t) = self.trade.take() else {
            return;
        };

        if price > t.best {
            t.best = price;
            t.trailing = self.risk.trailing_stop(t.best, t.atr);
        }
        let stop_level = if self.trailing_enabled { t.stop.min(t.trailing) } else { t.stop };

        if !t.partial_done && price >= t.tp {
            let part = self.risk.partial_qty(t.qty);
            self.sell(part, price, t.entry);
            t.qty -= part;
            t.partial_done = true;
        }

        if price <= stop_level {
            self.sell(t.qty, price, t.entry);
            return;
        }

        if t.qty > Decimal::ZERO && t.partial_done && price >= t.tp {
            self.sell(t.qty, price, t.entry);
            return;
        }

        self.trade = Some(t);
    }

    fn enter(&mut self, price: Decimal, atr: Decimal, position_pct: Decimal) {
        let notional = self.cash * position_pct;
        let px = self.risk.apply_slippage(price, FillSide::Entry);
        if px <= Decimal::ZERO || notional <= Decimal::ZERO {
            return;
        }
        let fee = self.risk.fee_usd(notional, true);
        self.cash -= notional + fee;

        let (stop, tp) = self.risk.stops_from_atr(px, atr);
        self.trade = Some(OpenTrade {
            qty: notional / px,
            entry: px,
            atr,
            stop,
            tp,
            best: px,
            trailing: stop,
            partial_done: false,
        });
    }

    fn equity(&self, price: Decimal) -> Decimal {
        self.cash + self.trade.as_ref().map_or(Decimal::ZERO, |t| t.qty * price)
    }
}

/// Replay `candles` (ascending primary candles) from bar [`WARMUP_BARS`].
pub fn run_backtest(candles: &[Candle], config: &Config, risk: &RiskManager, start_balance: Decimal) -> BacktestReport {
    run_backtest_from(candles, WARMUP_BARS, config, risk, start_balance)
}

/// Replay `candles` evaluating bars `start..`; earlier bars only feed the indicators.
pub fn run_backtest_from(
    candles: &[Candle],
    start: usize,
    config: &Config,
    risk: &RiskManager,
    start_balance: Decimal,
) -> BacktestReport {
    let params = SignalParams::from_config(config);
    let periods = config
        .primary_timeframe()
        .map(Timeframe::periods_per_year)
        .unwrap_or_else(|_| Timeframe::M15.periods_per_year());
    let secondary = Timeframe::from_str(&config.secondary_tf).unwrap_or(Timeframe::M30);
    let confirm = Timeframe::from_str(&config.confirm_tf).unwrap_or(Timeframe::H1);

    let mut sim = Simulator {
        risk,
        trailing_enabled: config.trailing_enabled,
        cash: start_balance,
        trade: None,
        wins: 0,
        exits: 0,
    };
    let mut equity = Vec::with_capacity(candles.len().saturating_sub(start));
    let mut last_equity = start_balance;

    for i in start..candles.len() {
        let window = &candles[..=i];
        let price = candles[i].close;

        sim.manage(price);

        if sim.trade.is_none() {
            let higher = resample(window, secondary);
            let top = resample(window, confirm);
            if let Some(signal) = compute_long_signal(window, &higher, &top, &params).filter(|s| s.is_buy()) {
                sim.enter(price, signal.atr_decimal(), config.position_pct);
                debug!(bar = i, %price, "Backtest entry");
            }
        }

        last_equity = sim.equity(price);
        equity.push(last_equity.to_f64().unwrap_or_default());
    }

    let returns = bar_returns(&equity);
    BacktestReport {
        pnl: if equity.is_empty() { Decimal::ZERO } else { last_equity - start_balance },
        win_rate: if sim.exits > 0 { sim.wins as f64 / sim.exits as f64 } else { 0.0 },
        max_dd: max_drawdown(&equity),
        sharpe: sharpe(&returns, periods),
        trades: sim.exits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const M15: i64 = 15 * 60_000;

    fn config() -> Config {
        Config {
            ema_fast: 5,
            ema_slow: 20,
            rsi_period: 5,
            atr_period: 5,
            ..Config::default()
        }
    }

    fn candles(closes: impl IntoIterator<Item = Decimal>) -> Vec<Candle> {
        closes
            .into_iter()
            .enumerate()
            .map(|(i, close)| Candle {
                close_time_ms: (i as i64 + 1) * M15 - 1,
                open: close,
                high: close + dec!(0.5),
                low: close - dec!(0.5),
                close,
                volume: dec!(1),
            })
            .collect()
    }

    #[test]
    fn drawdown_of_rising_curve_is_zero() {
        assert_eq!(max_drawdown(&[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn drawdown_tracks_worst_drop() {
        let dd = max_drawdown(&[100.0, 120.0, 90.0, 130.0, 117.0]);
        assert!((dd + 0.25).abs() < 1e-12);
    }

    #[test]
    fn sharpe_needs_enough_varied_returns() {
        assert_eq!(sharpe(&[0.01; 49], 35_040.0), 0.0);
        assert_eq!(sharpe(&[0.0; 60], 35_040.0), 0.0);

        let returns: Vec<f64> = (0..60).map(|i| if i % 2 == 0 { 0.02 } else { -0.01 }).collect();
        let expected = 0.005 / 0.015 * 35_040f64.sqrt();
        assert!((sharpe(&returns, 35_040.0) - expected).abs() < 1e-9);
    }

    #[test]
    fn short_history_produces_empty_report() {
        let risk = RiskManager::from_config(&config());
        let report = run_backtest(&candles((0..100).map(Decimal::from)), &config(), &risk, dec!(10000));
        assert_eq!(report.trades, 0);
        assert_eq!(report.pnl, Decimal::ZERO);
    }

    #[test]
    fn flat_market_never_trades() {
        let risk = RiskManager::from_config(&config());
        let report = run_backtest(&candles(std::iter::repeat(dec!(100)).take(400)), &config(), &risk, dec!(10000));
        assert_eq!(report.trades, 0);
        assert_eq!(report.pnl, Decimal::ZERO);
        assert_eq!(report.sharpe, 0.0);
    }

    #[test]
    fn rally_then_crash_books_exits() {
        // Steady uptrend, then a collapse that must stop out any open long.
        let mut closes: Vec<Decimal> = Vec::new();
        let mut price = dec!(100);
        for i in 1..=400 {
            price += if i % 3 == 0 { dec!(-0.5) } else { dec!(1) };
            closes.push(price);
        }
        closes.extend((1..=20).map(|i| price - Decimal::from(i * 5)));

        let risk = RiskManager::from_config(&config());
        let report = run_backtest(&candles(closes), &config(), &risk, dec!(10000));
        assert!(report.trades > 0);
        assert!((0.0..=1.0).contains(&report.win_rate));
        assert!(report.max_dd <= 0.0);
    }

    #[test]
    fn bar_returns_start_at_zero() {
        let r = bar_returns(&[100.0, 110.0, 99.0]);
        assert_eq!(r.len(), 3);
        assert_eq!(r[0], 0.0);
        assert!((r[1] - 0.1).abs() < 1e-12);
        assert!((r[2] + 0.1).abs() < 1e-12);
        assert!(bar_returns(&[]).is_empty());
    }
}
