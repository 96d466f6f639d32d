//! Rolling train/test splits for out-of-sample evaluation.

use std::ops::Range;

use rust_decimal::Decimal;
use tracing::info;

use super::{run_backtest_from, BacktestReport};
use crate::config::Config;
use crate::market::Candle;
use crate::risk::RiskManager;

/// Split proportions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalkForwardConfig {
    /// Share of the data in each training window.
    pub train_ratio: f64,
    /// Share of the data in each test window, also the roll step.
    pub step_ratio: f64,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            train_ratio: 0.6,
            step_ratio: 0.1,
        }
    }
}

/// `(train, test)` index ranges over `n` rows.
///
/// Each window trains on `floor(n * train_ratio)` rows and tests on the next
/// `max(1, floor(n * step_ratio))`, then rolls forward by the test length.
pub fn walk_forward_splits(n: usize, cfg: WalkForwardConfig) -> Vec<(Range<usize>, Range<usize>)> {
    let train_n = (n as f64 * cfg.train_ratio) as usize;
    let step_n = ((n as f64 * cfg.step_ratio) as usize).max(1);

    let mut splits = Vec::new();
    let mut start = 0;
    while start + train_n + step_n <= n {
        let test_start = start + train_n;
        splits.push((start..test_start, test_start..test_start + step_n));
        start += step_n;
    }
    splits
}

/// Backtest every test window, using its training window as indicator history.
pub fn run_walk_forward(
    candles: &[Candle],
    cfg: WalkForwardConfig,
    config: &Config,
    risk: &RiskManager,
    start_balance: Decimal,
) -> Vec<BacktestReport> {
    walk_forward_splits(candles.len(), cfg)
        .into_iter()
        .enumerate()
        .map(|(fold, (train, test))| {
            let report = run_backtest_from(&candles[train.start..test.end], train.len(), config, risk, start_balance);
            info!(
                fold,
                train = ?train,
                test = ?test,
                pnl = %report.pnl,
                trades = report.trades,
                "Walk-forward fold"
            );
            report
        })
        .collect()
}
