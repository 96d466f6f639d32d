//! Position sizing, stops, fees and slippage.
//!
//! All arithmetic is in [`Decimal`]; nothing here touches the network.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::Config;

const BPS: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);
const QTY_DP: u32 = 6;

/// Side of a fill when applying slippage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillSide {
    /// Buying: price moves against us upward.
    Entry,
    /// Selling: price moves against us downward.
    Exit,
}

/// Risk parameters applied to every trade.
#[derive(Debug, Clone)]
pub struct RiskManager {
    /// Share of free USDT committed per entry.
    pub position_pct: Decimal,
    /// Stop distance in ATRs.
    pub stop_atr_mult: Decimal,
    /// Take-profit distance in ATRs.
    pub tp_atr_mult: Decimal,
    /// Taker fee rate.
    pub taker_fee: Decimal,
    /// Maker fee rate.
    pub maker_fee: Decimal,
    /// Slippage in basis points.
    pub slippage_bps: Decimal,
    /// Share of the position sold at the first take-profit.
    pub partial_tp_pct: Decimal,
}

impl RiskManager {
    /// Take the risk settings from config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            position_pct: config.position_pct,
            stop_atr_mult: config.stop_atr_mult,
            tp_atr_mult: config.tp_atr_mult,
            taker_fee: config.taker_fee,
            maker_fee: config.maker_fee,
            slippage_bps: config.slippage_bps,
            partial_tp_pct: config.partial_tp_pct,
        }
    }

    /// Quote amount to spend on an entry.
    pub fn order_notional_usdt(&self, free_usdt: Decimal) -> Decimal {
        free_usdt * self.position_pct
    }

    /// Worsen `price` by the configured slippage.
    pub fn apply_slippage(&self, price: Decimal, side: FillSide) -> Decimal {
        let slip = self.slippage_bps / BPS;
        match side {
            FillSide::Entry => price * (Decimal::ONE + slip),
            FillSide::Exit => price * (Decimal::ONE - slip),
        }
    }

    /// `(stop, take_profit)` around `entry`.
    pub fn stops_from_atr(&self, entry: Decimal, atr: Decimal) -> (Decimal, Decimal) {
        (entry - self.stop_atr_mult * atr, entry + self.tp_atr_mult * atr)
    }

    /// Trailing stop below the best price seen.
    pub fn trailing_stop(&self, best_price: Decimal, atr: Decimal) -> Decimal {
        best_price - self.stop_atr_mult * atr
    }

    /// Fee on a fill of `notional`.
    pub fn fee_usd(&self, notional: Decimal, taker: bool) -> Decimal {
        let rate = if taker { self.taker_fee } else { self.maker_fee };
        notional * rate
    }

    /// Quantity sold at the partial take-profit.
    pub fn partial_qty(&self, qty: Decimal) -> Decimal {
        qty * self.partial_tp_pct
    }

    /// Units affordable when risking `risk_per_trade` of `balance`, rounded to 6 dp.
    pub fn position_size(&self, balance: Decimal, price: Decimal, risk_per_trade: Decimal) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        round_qty(balance * risk_per_trade / price)
    }

    /// Split `qty` by the given fractions, each rounded to 6 dp.
    pub fn partial_tp_sizes(&self, qty: Decimal, splits: &[Decimal]) -> Vec<Decimal> {
        splits.iter().map(|s| round_qty(qty * s)).collect()
    }
}

fn round_qty(qty: Decimal) -> Decimal {
    qty.round_dp_with_strategy(QTY_DP, RoundingStrategy::MidpointNearestEven)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn risk() -> RiskManager {
        RiskManager {
            position_pct: dec!(0.03),
            stop_atr_mult: dec!(1.5),
            tp_atr_mult: dec!(3),
            taker_fee: dec!(0.001),
            maker_fee: dec!(0.0005),
            slippage_bps: dec!(5),
            partial_tp_pct: dec!(0.5),
        }
    }

    #[test]
    fn notional_is_share_of_free_balance() {
        assert_eq!(risk().order_notional_usdt(dec!(1000)), dec!(30));
    }

    #[test]
    fn slippage_moves_against_the_trade() {
        let r = risk();
        assert_eq!(r.apply_slippage(dec!(100), FillSide::Entry), dec!(100.05));
        assert_eq!(r.apply_slippage(dec!(100), FillSide::Exit), dec!(99.95));
    }

    #[test]
    fn stops_and_trailing_use_atr_multiples() {
        let r = risk();
        assert_eq!(r.stops_from_atr(dec!(100), dec!(2)), (dec!(97), dec!(106)));
        assert_eq!(r.trailing_stop(dec!(110), dec!(2)), dec!(107));
    }

    #[test]
    fn fees_pick_taker_or_maker_rate() {
        let r = risk();
        assert_eq!(r.fee_usd(dec!(1000), true), dec!(1));
        assert_eq!(r.fee_usd(dec!(1000), false), dec!(0.5));
        assert_eq!(r.partial_qty(dec!(0.3)), dec!(0.15));
    }

    #[test]
    fn sizes_round_to_six_places() {
        let r = risk();
        assert_eq!(r.position_size(dec!(1000), dec!(3), dec!(0.01)), dec!(3.333333));
        assert_eq!(r.position_size(dec!(1000), dec!(0), dec!(0.01)), dec!(0));
        assert_eq!(
            r.partial_tp_sizes(dec!(1), &[dec!(0.3333333), dec!(0.5)]),
            vec![dec!(0.333333), dec!(0.5)]
        );
    }
}
