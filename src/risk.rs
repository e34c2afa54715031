//! Session risk management
//!
//! A one-way circuit breaker scoped to the trading session. Trading is
//! allowed while the breaker is `Active`; it latches to `Halted` the moment
//! any limit is reached and stays there until `reset_session()`:
//!
//! ```text
//! Active --(max trades | max drawdown | loss streak | kill switch)--> Halted
//! Halted --(reset_session)--> Active
//! ```
//!
//! All P&L figures are percentages of session capital, so limits read the
//! same whatever the account size.

use serde::{Deserialize, Serialize};

/// Configuration for RiskManager using builder pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskManagerConfig {
    /// Recorded trades allowed per session
    pub max_trades: usize,
    /// Worst realized session loss, in percent, before halting
    pub max_drawdown_pct: f64,
    /// Losing trades in a row before halting
    pub max_consecutive_losses: usize,
    /// Capital risked per trade in percent (stop distance based sizing)
    pub per_trade_risk_pct: f64,
}

impl Default for RiskManagerConfig {
    fn default() -> Self {
        Self {
            max_trades: 3,
            max_drawdown_pct: 1.5,
            max_consecutive_losses: 2,
            per_trade_risk_pct: 0.5,
        }
    }
}

impl RiskManagerConfig {
    pub fn with_max_trades(mut self, max: usize) -> Self {
        self.max_trades = max;
        self
    }

    /// Set maximum drawdown threshold for halting, in percent
    pub fn with_max_drawdown_pct(mut self, dd: f64) -> Self {
        self.max_drawdown_pct = dd;
        self
    }

    pub fn with_max_consecutive_losses(mut self, limit: usize) -> Self {
        self.max_consecutive_losses = limit;
        self
    }

    pub fn with_per_trade_risk_pct(mut self, risk: f64) -> Self {
        self.per_trade_risk_pct = risk;
        self
    }

    /// Build the RiskManager
    pub fn build(self) -> RiskManager {
        RiskManager::from_config(self)
    }
}

/// Why the session was halted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    KillSwitch,
    MaxTrades,
    MaxDrawdown,
    ConsecutiveLosses,
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HaltReason::KillSwitch => write!(f, "kill switch"),
            HaltReason::MaxTrades => write!(f, "max trades per session"),
            HaltReason::MaxDrawdown => write!(f, "max session drawdown"),
            HaltReason::ConsecutiveLosses => write!(f, "max consecutive losses"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskState {
    Active,
    Halted,
}

/// Realized outcome of one trade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub pnl_pct: f64,
    pub is_win: bool,
}

/// Session-scoped circuit breaker
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskManagerConfig,
    trades: Vec<TradeOutcome>,
    current_drawdown: f64,
    consecutive_losses: usize,
    daily_pnl: f64,
    kill_switch: bool,
    halt_reason: Option<HaltReason>,
}

impl RiskManager {
    /// Create new risk manager from config (preferred method)
    pub fn from_config(config: RiskManagerConfig) -> Self {
        RiskManager {
            config,
            trades: Vec::new(),
            current_drawdown: 0.0,
            consecutive_losses: 0,
            daily_pnl: 0.0,
            kill_switch: false,
            halt_reason: None,
        }
    }

    pub fn config(&self) -> &RiskManagerConfig {
        &self.config
    }

    /// Re-initialize to `Active` with an empty session
    pub fn reset_session(&mut self) {
        self.trades.clear();
        self.current_drawdown = 0.0;
        self.consecutive_losses = 0;
        self.daily_pnl = 0.0;
        self.kill_switch = false;
        self.halt_reason = None;
    }

    /// First limit currently breached, if any
    fn breached_limit(&self) -> Option<HaltReason> {
        if self.kill_switch {
            return Some(HaltReason::KillSwitch);
        }
        if self.trades.len() >= self.config.max_trades {
            return Some(HaltReason::MaxTrades);
        }
        if self.current_drawdown >= self.config.max_drawdown_pct {
            return Some(HaltReason::MaxDrawdown);
        }
        if self.consecutive_losses >= self.config.max_consecutive_losses {
            return Some(HaltReason::ConsecutiveLosses);
        }
        None
    }

    /// True if trading is allowed. Side-effect free.
    pub fn check_constraints(&self) -> bool {
        self.breached_limit().is_none()
    }

    /// Room for one more entry given `pending` trades that are open but not
    /// yet recorded
    pub fn can_open(&self, pending: usize) -> bool {
        self.check_constraints() && self.trades.len() + pending < self.config.max_trades
    }

    /// Record a realized trade and re-evaluate the breaker.
    ///
    /// Returns the halt reason when this trade tripped the breaker.
    pub fn record_trade(&mut self, pnl_pct: f64) -> Option<HaltReason> {
        let was_active = !self.kill_switch;
        let outcome = TradeOutcome {
            pnl_pct,
            is_win: pnl_pct > 0.0,
        };
        self.trades.push(outcome);

        self.daily_pnl = self.trades.iter().map(|t| t.pnl_pct).sum();
        // Worst realized point, never relaxed by later winners
        if self.daily_pnl < 0.0 {
            self.current_drawdown = self.current_drawdown.max(self.daily_pnl.abs());
        }

        if outcome.is_win {
            self.consecutive_losses = 0;
        } else {
            self.consecutive_losses += 1;
        }

        if let Some(reason) = self.breached_limit() {
            self.kill_switch = true;
            if self.halt_reason.is_none() {
                self.halt_reason = Some(reason);
            }
            if was_active {
                return Some(reason);
            }
        }
        None
    }

    /// Latch the kill switch. Idempotent.
    pub fn activate_kill_switch(&mut self) {
        if !self.kill_switch {
            self.kill_switch = true;
            self.halt_reason.get_or_insert(HaltReason::KillSwitch);
        }
    }

    pub fn state(&self) -> RiskState {
        if self.check_constraints() {
            RiskState::Active
        } else {
            RiskState::Halted
        }
    }

    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.halt_reason.or_else(|| self.breached_limit())
    }

    pub fn is_kill_switch_active(&self) -> bool {
        self.kill_switch
    }

    pub fn trades(&self) -> &[TradeOutcome] {
        &self.trades
    }

    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }

    pub fn current_drawdown(&self) -> f64 {
        self.current_drawdown
    }

    pub fn consecutive_losses(&self) -> usize {
        self.consecutive_losses
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    /// Whole shares to trade so that hitting the stop loses
    /// `per_trade_risk_pct` of `capital`
    ///
    /// ```text
    /// quantity = floor(capital * risk% / |entry - stop|)
    /// ```
    pub fn position_size(&self, capital: f64, entry: f64, stop: f64) -> u64 {
        let stop_distance = (entry - stop).abs();
        if stop_distance == 0.0 || !stop_distance.is_finite() || capital <= 0.0 {
            return 0;
        }
        let risk_amount = capital * self.config.per_trade_risk_pct / 100.0;
        (risk_amount / stop_distance).floor() as u64
    }
}

impl Default for RiskManager {
    fn default() -> Self {
        RiskManager::from_config(RiskManagerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_session_is_active() {
        let rm = RiskManager::default();
        assert!(rm.check_constraints());
        assert_eq!(rm.state(), RiskState::Active);
        assert_eq!(rm.halt_reason(), None);
    }

    #[test]
    fn test_consecutive_losses_halt_until_reset() {
        let mut rm = RiskManagerConfig::default()
            .with_max_trades(10)
            .with_max_drawdown_pct(100.0)
            .with_max_consecutive_losses(2)
            .build();

        assert_eq!(rm.record_trade(-0.1), None);
        assert!(rm.check_constraints());
        assert_eq!(rm.record_trade(-0.1), Some(HaltReason::ConsecutiveLosses));
        assert!(!rm.check_constraints());

        // A later winner does not re-open the session
        assert_eq!(rm.record_trade(5.0), None);
        assert!(!rm.check_constraints());
        assert!(rm.is_kill_switch_active());

        rm.reset_session();
        assert!(rm.check_constraints());
        assert_eq!(rm.trade_count(), 0);
    }

    #[test]
    fn test_drawdown_is_monotonic() {
        let mut rm = RiskManagerConfig::default()
            .with_max_trades(10)
            .with_max_drawdown_pct(5.0)
            .with_max_consecutive_losses(10)
            .build();

        rm.record_trade(-1.0);
        rm.record_trade(0.5);
        assert_eq!(rm.current_drawdown(), 1.0);
        assert_eq!(rm.daily_pnl(), -0.5);
        assert_eq!(rm.consecutive_losses(), 0);
    }

    #[test]
    fn test_drawdown_halt() {
        let mut rm = RiskManagerConfig::default()
            .with_max_trades(10)
            .with_max_consecutive_losses(10)
            .build();
        assert_eq!(rm.record_trade(-1.6), Some(HaltReason::MaxDrawdown));
        assert_eq!(rm.halt_reason(), Some(HaltReason::MaxDrawdown));
    }

    #[test]
    fn test_max_trades_halt() {
        let mut rm = RiskManager::default();
        rm.record_trade(0.2);
        rm.record_trade(0.2);
        assert!(rm.check_constraints());
        assert_eq!(rm.record_trade(0.2), Some(HaltReason::MaxTrades));
        assert!(!rm.check_constraints());
    }

    #[test]
    fn test_zero_pnl_counts_as_loss() {
        let mut rm = RiskManager::default();
        rm.record_trade(0.0);
        assert_eq!(rm.consecutive_losses(), 1);
        assert!(!rm.trades()[0].is_win);
    }

    #[test]
    fn test_kill_switch_is_idempotent() {
        let mut rm = RiskManager::default();
        rm.activate_kill_switch();
        rm.activate_kill_switch();
        assert!(!rm.check_constraints());
        assert_eq!(rm.halt_reason(), Some(HaltReason::KillSwitch));
        // Recording after a halt never reports a fresh trip
        assert_eq!(rm.record_trade(-0.1), None);
    }

    #[test]
    fn test_can_open_counts_pending() {
        let mut rm = RiskManager::default();
        rm.record_trade(0.1);
        assert!(rm.can_open(1));
        assert!(!rm.can_open(2));
    }

    #[test]
    fn test_position_sizing() {
        let rm = RiskManager::default();
        // Risk = 100,000 * 0.5% = 500, stop distance = 2.5 -> 200 shares
        assert_eq!(rm.position_size(100_000.0, 100.0, 102.5), 200);
        assert_eq!(rm.position_size(100_000.0, 100.0, 100.0), 0);
        assert_eq!(rm.position_size(0.0, 100.0, 99.0), 0);
    }
}
