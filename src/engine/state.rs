//! Shared engine state
//!
//! Everything a tick may mutate lives in one `EngineState` behind a single
//! `std::sync::Mutex`. Critical sections are short and never span an
//! `.await`; network calls happen between two lock scopes.

use chrono::{Local, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::info;

use super::EnginePhase;
use crate::config::Config;
use crate::costs::CostModel;
use crate::dashboard::EngineSnapshot;
use crate::levels::LevelEngine;
use crate::regime::RegimeClassifier;
use crate::risk::{HaltReason, RiskManager};
use crate::session::PersistedSession;
use crate::types::{Levels, OpenTrade, PlannedTrade, Side};
use crate::Symbol;

/// Lifecycle of one symbol's position slot
#[derive(Debug, Clone)]
pub enum TradeSlot {
    /// Entry order in flight
    Reserved,
    Open(OpenTrade),
    /// Exit order in flight
    Closing(OpenTrade),
}

impl TradeSlot {
    pub fn trade(&self) -> Option<&OpenTrade> {
        match self {
            TradeSlot::Reserved => None,
            TradeSlot::Open(t) | TradeSlot::Closing(t) => Some(t),
        }
    }
}

/// Realized result of one closed trade
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosedTrade {
    pub net_pnl: f64,
    pub pnl_pct: f64,
    /// Set when this trade tripped the risk breaker
    pub tripped: Option<HaltReason>,
}

pub struct EngineState {
    pub levels: LevelEngine,
    pub regime: RegimeClassifier,
    pub risk: RiskManager,
    pub session: PersistedSession,
    slots: HashMap<Symbol, TradeSlot>,
    planned: BTreeMap<Symbol, [PlannedTrade; 2]>,
    logs: VecDeque<String>,
    log_capacity: usize,
    capital_changed: bool,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

impl EngineState {
    pub fn new(config: &Config, session: PersistedSession) -> Self {
        Self {
            levels: LevelEngine::new(config.levels),
            regime: RegimeClassifier::new(config.regime.threshold_mult, config.regime.thresholds),
            risk: RiskManager::from_config(config.risk.clone()),
            session,
            slots: HashMap::new(),
            planned: BTreeMap::new(),
            logs: VecDeque::new(),
            log_capacity: config.engine.log_capacity.max(1),
            capital_changed: false,
        }
    }

    /// Append to the bounded dashboard log and mirror to tracing
    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.logs
            .push_back(format!("[{}] {}", Local::now().format("%H:%M"), message));
        while self.logs.len() > self.log_capacity {
            self.logs.pop_front();
        }
    }

    pub fn logs(&self) -> impl Iterator<Item = &String> {
        self.logs.iter()
    }

    pub fn slot(&self, symbol: &Symbol) -> Option<&TradeSlot> {
        self.slots.get(symbol)
    }

    /// Entries sent or open but not yet recorded with the risk manager
    pub fn pending(&self) -> usize {
        self.slots.len()
    }

    pub fn open_trades(&self) -> Vec<OpenTrade> {
        let mut trades: Vec<OpenTrade> = self
            .slots
            .values()
            .filter_map(|s| s.trade().cloned())
            .collect();
        trades.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        trades
    }

    /// Claim the slot for an entry. Fails when the symbol already has a
    /// position or the risk manager has no room left.
    pub fn reserve(&mut self, symbol: &Symbol) -> bool {
        if self.slots.contains_key(symbol) || !self.risk.can_open(self.pending()) {
            return false;
        }
        self.slots.insert(symbol.clone(), TradeSlot::Reserved);
        true
    }

    pub fn release(&mut self, symbol: &Symbol) {
        if matches!(self.slots.get(symbol), Some(TradeSlot::Reserved)) {
            self.slots.remove(symbol);
        }
    }

    pub fn confirm_entry(&mut self, trade: OpenTrade) {
        self.slots
            .insert(trade.symbol.clone(), TradeSlot::Open(trade));
    }

    /// Move an open trade to `Closing` if `price` crossed its target or stop
    pub fn begin_exit(&mut self, symbol: &Symbol, price: f64) -> Option<(OpenTrade, &'static str)> {
        let trade = match self.slots.get(symbol) {
            Some(TradeSlot::Open(trade)) => trade.clone(),
            _ => return None,
        };
        let reason = trade.exit_reason(price)?;
        self.slots
            .insert(symbol.clone(), TradeSlot::Closing(trade.clone()));
        Some((trade, reason))
    }

    /// Move an open trade to `Closing` regardless of price
    pub fn begin_flatten(&mut self, symbol: &Symbol) -> Option<OpenTrade> {
        match self.slots.get(symbol) {
            Some(TradeSlot::Open(trade)) => {
                let trade = trade.clone();
                self.slots
                    .insert(symbol.clone(), TradeSlot::Closing(trade.clone()));
                Some(trade)
            }
            _ => None,
        }
    }

    /// The exit order failed; the position stays open for the next tick
    pub fn abort_exit(&mut self, trade: OpenTrade) {
        self.slots
            .insert(trade.symbol.clone(), TradeSlot::Open(trade));
    }

    /// Book a filled exit: net P&L after charges goes to the risk manager
    /// (as percent of capital) and to the persisted session
    pub fn complete_exit(&mut self, trade: &OpenTrade, exit_price: f64, costs: &CostModel) -> ClosedTrade {
        self.slots.remove(&trade.symbol);

        let breakdown = match trade.side {
            Side::Long => costs.calculate(trade.entry, exit_price, trade.quantity),
            Side::Short => costs.calculate(exit_price, trade.entry, trade.quantity),
        };
        let capital = self.session.capital;
        let pnl_pct = if capital > 0.0 {
            breakdown.net_pnl / capital * 100.0
        } else {
            0.0
        };

        let tripped = self.risk.record_trade(pnl_pct);
        self.session.apply_realized(breakdown.net_pnl);
        self.capital_changed = true;

        ClosedTrade {
            net_pnl: breakdown.net_pnl,
            pnl_pct,
            tripped,
        }
    }

    /// True once after any realized trade
    pub fn take_capital_changed(&mut self) -> bool {
        std::mem::take(&mut self.capital_changed)
    }

    /// Refresh the LONG/SHORT plan lines for one symbol
    pub fn set_planned(&mut self, symbol: &Symbol, levels: &Levels, current: f64) {
        let long = PlannedTrade {
            symbol: symbol.clone(),
            side: Side::Long,
            current: round2(current),
            entry: round2(levels.support),
            target: round2(levels.resistance * 0.998),
            stop: round2(levels.support * 0.995),
        };
        let short = PlannedTrade {
            symbol: symbol.clone(),
            side: Side::Short,
            current: round2(current),
            entry: round2(levels.resistance),
            target: round2(levels.support * 1.002),
            stop: round2(levels.resistance * 1.005),
        };
        self.planned.insert(symbol.clone(), [long, short]);
    }

    pub fn planned_trades(&self) -> Vec<PlannedTrade> {
        self.planned.values().flat_map(|p| p.iter().cloned()).collect()
    }

    pub fn snapshot(
        &self,
        phase: EnginePhase,
        cycle: u64,
        active_feed: Option<String>,
        watchlist: &[Symbol],
    ) -> EngineSnapshot {
        EngineSnapshot {
            phase,
            regime: self.regime.regime(),
            tsd_count: self.regime.tsd_count(),
            risk_consumed: self.risk.daily_pnl(),
            max_drawdown: self.risk.config().max_drawdown_pct,
            current_drawdown: self.risk.current_drawdown(),
            kill_switch: self.risk.is_kill_switch_active(),
            halt_reason: self.risk.halt_reason(),
            trade_count: self.risk.trade_count(),
            pnl: round2(self.session.pnl),
            capital: self.session.capital,
            cycle,
            active_feed,
            watchlist: watchlist.to_vec(),
            positions: self.open_trades(),
            planned_trades: self.planned_trades(),
            logs: self.logs.iter().cloned().collect(),
            equity_history: self.session.equity_history.clone(),
            updated_at: Utc::now(),
        }
    }
}
