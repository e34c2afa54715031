//! NSE intraday equity transaction costs
//!
//! Charges for one round trip (buy leg + sell leg), computed in
//! `rust_decimal` so repeated evaluation never drifts:
//!
//! | Charge | Rate | Leg |
//! |---|---|---|
//! | Brokerage | 0.03 %, capped at ₹20 | each leg |
//! | STT | 0.025 %, rounded to the rupee | sell |
//! | Exchange transaction | 0.00325 % | both (turnover) |
//! | GST | 18 % of brokerage + transaction | - |
//! | SEBI turnover fee | ₹10 per crore | both (turnover) |
//! | Stamp duty | 0.003 % | buy |

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

fn to_decimal(value: f64) -> Decimal {
    Decimal::try_from(value)
        .or_else(|_| Decimal::from_f64_retain(value).ok_or(()))
        .unwrap_or(Decimal::ZERO)
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Rates for the cost model. Defaults are the standard discount-broker
/// intraday schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub brokerage_rate: Decimal,
    pub max_brokerage_per_leg: Decimal,
    pub stt_rate: Decimal,
    pub txn_charge_rate: Decimal,
    pub gst_rate: Decimal,
    pub sebi_rate: Decimal,
    pub stamp_duty_rate: Decimal,
    /// Signals whose net profit at target is at or below this percentage
    /// of the buy leg are dropped
    pub min_net_profit_pct: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            brokerage_rate: dec!(0.0003),
            max_brokerage_per_leg: dec!(20),
            stt_rate: dec!(0.00025),
            txn_charge_rate: dec!(0.0000325),
            gst_rate: dec!(0.18),
            sebi_rate: dec!(0.000001),
            stamp_duty_rate: dec!(0.00003),
            min_net_profit_pct: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub total_brokerage: f64,
    /// STT, transaction, GST, SEBI and stamp duty
    pub total_tax: f64,
    pub total_charges: f64,
    /// Gross P&L minus all charges
    pub net_pnl: f64,
    /// `net_pnl` as a percentage of the buy leg value
    pub net_profit_pct: f64,
    /// Price move per share needed to cover charges
    pub points_to_breakeven: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CostModel {
    config: CostConfig,
}

impl CostModel {
    pub fn new(config: CostConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CostConfig {
        &self.config
    }

    /// Charges and net result of buying `quantity` at `buy_price` and
    /// selling at `sell_price`. Shorts pass their cover price as the buy.
    pub fn calculate(&self, buy_price: f64, sell_price: f64, quantity: u64) -> CostBreakdown {
        let c = &self.config;
        let qty = Decimal::from(quantity);
        let buy_value = to_decimal(buy_price) * qty;
        let sell_value = to_decimal(sell_price) * qty;
        let turnover = buy_value + sell_value;

        let buy_brokerage = (buy_value * c.brokerage_rate).min(c.max_brokerage_per_leg);
        let sell_brokerage = (sell_value * c.brokerage_rate).min(c.max_brokerage_per_leg);
        let total_brokerage = buy_brokerage + sell_brokerage;

        let stt = (sell_value * c.stt_rate).round();
        let txn_charges = turnover * c.txn_charge_rate;
        let gst = (total_brokerage + txn_charges) * c.gst_rate;
        let sebi = turnover * c.sebi_rate;
        let stamp_duty = buy_value * c.stamp_duty_rate;

        let total_tax = stt + txn_charges + gst + sebi + stamp_duty;
        let total_charges = total_brokerage + total_tax;
        let net_pnl = sell_value - buy_value - total_charges;

        let net_profit_pct = if buy_value.is_zero() {
            Decimal::ZERO
        } else {
            net_pnl / buy_value * dec!(100)
        };
        let points_to_breakeven = if qty.is_zero() {
            Decimal::ZERO
        } else {
            total_charges / qty
        };

        CostBreakdown {
            total_brokerage: to_f64(total_brokerage),
            total_tax: to_f64(total_tax),
            total_charges: to_f64(total_charges),
            net_pnl: to_f64(net_pnl),
            net_profit_pct: to_f64(net_profit_pct),
            points_to_breakeven: to_f64(points_to_breakeven),
        }
    }

    /// True when a trade from `entry` to `target` clears the minimum net
    /// profit. Longs buy at entry; shorts sell at entry and buy at target.
    pub fn is_worth_taking(&self, long: bool, entry: f64, target: f64, quantity: u64) -> (bool, CostBreakdown) {
        let costs = if long {
            self.calculate(entry, target, quantity)
        } else {
            self.calculate(target, entry, quantity)
        };
        (costs.net_profit_pct > self.config.min_net_profit_pct, costs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_net_pnl_is_gross_minus_charges() {
        let model = CostModel::default();
        let c = model.calculate(25_000.0, 25_050.0, 100);
        assert_relative_eq!(c.total_charges, c.total_brokerage + c.total_tax, epsilon = 1e-6);
        assert_relative_eq!(c.net_pnl, 5_000.0 - c.total_charges, epsilon = 1e-6);
        // Both legs hit the ₹20 cap
        assert_relative_eq!(c.total_brokerage, 40.0, epsilon = 1e-9);
        assert!(c.net_pnl > 0.0);
    }

    #[test]
    fn test_known_charges() {
        let c = CostModel::default().calculate(100.0, 101.0, 100);
        // buy 10,000 / sell 10,100 / turnover 20,100
        // brokerage 3.00 + 3.03, STT round(2.525) = 3, txn 0.65325
        let brokerage = 6.03;
        let txn = 0.65325;
        let gst = (brokerage + txn) * 0.18;
        let sebi = 0.0201;
        let stamp = 0.3;
        let expected_tax = 3.0 + txn + gst + sebi + stamp;
        assert_relative_eq!(c.total_brokerage, brokerage, epsilon = 1e-9);
        assert_relative_eq!(c.total_tax, expected_tax, epsilon = 1e-9);
        assert_relative_eq!(c.points_to_breakeven, (brokerage + expected_tax) / 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_tiny_target_fails_cost_filter() {
        let model = CostModel::default();
        let (ok, costs) = model.is_worth_taking(true, 100.0, 100.01, 10);
        assert!(!ok);
        assert!(costs.net_pnl < 0.0);

        let (ok, _) = model.is_worth_taking(false, 102.0, 100.8, 200);
        assert!(ok);
    }

    #[test]
    fn test_zero_quantity_is_harmless() {
        let c = CostModel::default().calculate(100.0, 101.0, 0);
        assert_eq!(c.net_profit_pct, 0.0);
        assert_eq!(c.points_to_breakeven, 0.0);
    }
}
