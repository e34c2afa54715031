//! Read-only engine snapshot for presentation layers
//!
//! The engine publishes one `EngineSnapshot` per cycle. Sinks decide what to
//! do with it; a failing sink never affects trading.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::engine::EnginePhase;
use crate::regime::Regime;
use crate::risk::HaltReason;
use crate::session::EquityPoint;
use crate::types::{OpenTrade, PlannedTrade};
use crate::Symbol;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub phase: EnginePhase,
    pub regime: Regime,
    pub tsd_count: u32,
    /// Realized session P&L in percent of capital
    pub risk_consumed: f64,
    /// Configured drawdown limit in percent
    pub max_drawdown: f64,
    pub current_drawdown: f64,
    pub kill_switch: bool,
    pub halt_reason: Option<HaltReason>,
    /// Trades recorded with the risk manager this session
    pub trade_count: usize,
    pub pnl: f64,
    pub capital: f64,
    pub cycle: u64,
    pub active_feed: Option<String>,
    pub watchlist: Vec<Symbol>,
    pub positions: Vec<OpenTrade>,
    pub planned_trades: Vec<PlannedTrade>,
    pub logs: Vec<String>,
    pub equity_history: Vec<EquityPoint>,
    pub updated_at: DateTime<Utc>,
}

pub trait PresentationSink: Send + Sync {
    fn publish(&self, snapshot: &EngineSnapshot) -> Result<()>;
}

/// Discards every snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl PresentationSink for NullSink {
    fn publish(&self, _snapshot: &EngineSnapshot) -> Result<()> {
        Ok(())
    }
}

/// Latest-value channel; subscribers always see the most recent snapshot
#[derive(Debug)]
pub struct WatchSink {
    tx: watch::Sender<Option<EngineSnapshot>>,
}

impl WatchSink {
    pub fn new() -> (Self, watch::Receiver<Option<EngineSnapshot>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<EngineSnapshot>> {
        self.tx.subscribe()
    }
}

impl PresentationSink for WatchSink {
    fn publish(&self, snapshot: &EngineSnapshot) -> Result<()> {
        // send_replace never fails, even with no receivers left
        self.tx.send_replace(Some(snapshot.clone()));
        Ok(())
    }
}
