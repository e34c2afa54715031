//! Per-symbol tick processing
//!
//! A tick either manages the symbol's open position or looks for a new
//! entry. Order placement runs in its own task so a tick cancelled by its
//! deadline never loses track of an order that already reached the broker.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, warn};

use super::state::{EngineState, TradeSlot};
use super::EngineHandle;
use crate::broker::ExecutionAdapter;
use crate::costs::CostModel;
use crate::oracle::{confirm_or_open, ConfirmationOracle};
use crate::regime::Regime;
use crate::strategies::SignalGenerator;
use crate::types::{Bar, OpenTrade, OrderType, Side, Signal};
use crate::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped,
    Holding,
    NoSignal,
    Filtered,
    Entered,
    Exited,
    Failed,
}

/// Everything a tick needs, shared by all ticks of a session
pub(crate) struct TickContext {
    pub state: Arc<Mutex<EngineState>>,
    pub generator: SignalGenerator,
    pub costs: CostModel,
    pub broker: Arc<dyn ExecutionAdapter>,
    pub oracle: Arc<dyn ConfirmationOracle>,
    pub oracle_timeout: Duration,
    pub handle: EngineHandle,
}

impl TickContext {
    pub fn lock(&self) -> MutexGuard<'_, EngineState> {
        // Poison is ignored: every mutation is a single EngineState call
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub(crate) async fn run_tick(ctx: Arc<TickContext>, symbol: Symbol, bar: Bar) -> TickOutcome {
    if ctx.handle.is_stopped() {
        return TickOutcome::Skipped;
    }
    if let Err(e) = bar.validate() {
        debug!("{}: dropping bar: {}", symbol, e);
        return TickOutcome::Skipped;
    }

    // Open position: only exits are considered
    let exit = {
        let mut state = ctx.lock();
        match state.slot(&symbol).map(|s| matches!(s, TradeSlot::Open(_))) {
            Some(true) => Some(state.begin_exit(&symbol, bar.close)),
            // Entry or exit still in flight
            Some(false) => return TickOutcome::Skipped,
            None => None,
        }
    };
    if let Some(exit) = exit {
        let Some((trade, reason)) = exit else {
            return TickOutcome::Holding;
        };
        let task = tokio::spawn(close_position(ctx.clone(), trade, bar.close, reason));
        return match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{}: exit task failed: {}", symbol, e);
                TickOutcome::Failed
            }
        };
    }

    // Kill switch: positions are still managed above, nothing new opens
    if ctx.handle.kill_switch() {
        return TickOutcome::Skipped;
    }

    let (levels, regime, capital, room) = {
        let mut state = ctx.lock();
        let levels = state.levels.levels_for(&symbol, &bar);
        state.set_planned(&symbol, &levels, bar.close);
        if bar.close >= levels.resistance {
            state.log(format!(
                "TOUCH {} at resistance {:.2} (price {:.2})",
                symbol, levels.resistance, bar.close
            ));
        } else if bar.close <= levels.support {
            state.log(format!(
                "TOUCH {} at support {:.2} (price {:.2})",
                symbol, levels.support, bar.close
            ));
        }
        let room = state.risk.can_open(state.pending());
        (levels, state.regime.regime(), state.session.capital, room)
    };
    if !room {
        return TickOutcome::Skipped;
    }

    let prior = bar.prior.as_deref().unwrap_or(&bar);
    let trend_shift = ctx.generator.trend_shift_for(&bar);
    let signal = match ctx.generator.generate(
        &bar,
        prior,
        levels.resistance,
        levels.support,
        regime,
        levels.base_range,
        trend_shift,
    ) {
        Ok(Some(signal)) => signal,
        Ok(None) => return TickOutcome::NoSignal,
        Err(e) => {
            debug!("{}: no evaluation: {}", symbol, e);
            return TickOutcome::Skipped;
        }
    };

    let quantity = ctx
        .lock()
        .risk
        .position_size(capital, signal.entry, signal.stop_loss);
    if quantity == 0 {
        debug!("{}: {} signal sized to zero shares", symbol, signal.side);
        return TickOutcome::Filtered;
    }

    let (worth, costs) = ctx.costs.is_worth_taking(
        signal.side == Side::Long,
        signal.entry,
        signal.target,
        quantity,
    );
    if !worth {
        ctx.lock().log(format!(
            "COST FILTER {} {}: net {:.2} ({:.3}%) after {:.2} charges",
            signal.side, symbol, costs.net_pnl, costs.net_profit_pct, costs.total_charges
        ));
        return TickOutcome::Filtered;
    }

    let summary = describe(&symbol, &signal, &bar, regime, quantity);
    if !confirm_or_open(ctx.oracle.as_ref(), &summary, ctx.oracle_timeout).await {
        ctx.lock()
            .log(format!("AI FILTER {} {} rejected", signal.side, symbol));
        return TickOutcome::Filtered;
    }

    if ctx.handle.is_stopped() || ctx.handle.kill_switch() || !ctx.lock().reserve(&symbol) {
        return TickOutcome::Skipped;
    }

    let task = tokio::spawn(open_position(ctx.clone(), symbol.clone(), signal, quantity));
    match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("{}: entry task failed: {}", symbol, e);
            ctx.lock().release(&symbol);
            TickOutcome::Failed
        }
    }
}

fn describe(symbol: &Symbol, signal: &Signal, bar: &Bar, regime: Regime, quantity: u64) -> String {
    format!(
        "{} {} {} x{} entry {:.2} target {:.2} stop {:.2}; regime {:?}; bar O {:.2} H {:.2} L {:.2} C {:.2} V {:.0}",
        signal.reason,
        signal.side,
        symbol,
        quantity,
        signal.entry,
        signal.target,
        signal.stop_loss,
        regime,
        bar.open,
        bar.high,
        bar.low,
        bar.close,
        bar.volume
    )
}

async fn open_position(ctx: Arc<TickContext>, symbol: Symbol, signal: Signal, quantity: u64) -> TickOutcome {
    let placed = ctx
        .broker
        .place_order(&symbol, signal.side, OrderType::Market, quantity, Some(signal.entry))
        .await;

    let mut state = ctx.lock();
    match placed {
        Ok(order_id) => {
            state.log(format!(
                "ORDER {} {} x{} @ {:.2} | target {:.2} stop {:.2} ({})",
                signal.side,
                symbol,
                quantity,
                signal.entry,
                signal.target,
                signal.stop_loss,
                signal.reason
            ));
            state.confirm_entry(OpenTrade {
                symbol,
                side: signal.side,
                entry: signal.entry,
                target: signal.target,
                stop_loss: signal.stop_loss,
                quantity,
                order_id,
                opened_at: Utc::now(),
            });
            TickOutcome::Entered
        }
        Err(e) => {
            state.release(&symbol);
            state.log(format!("ORDER FAILED {} {}: {}", signal.side, symbol, e));
            TickOutcome::Failed
        }
    }
}

/// Send the opposite-side order and book the result. On failure the trade
/// goes back to `Open` and the next tick tries again.
async fn close_position(ctx: Arc<TickContext>, trade: OpenTrade, price: f64, reason: &'static str) -> TickOutcome {
    let placed = ctx
        .broker
        .place_order(
            &trade.symbol,
            trade.side.opposite(),
            OrderType::Market,
            trade.quantity,
            Some(price),
        )
        .await;

    let mut state = ctx.lock();
    match placed {
        Ok(_) => {
            let closed = state.complete_exit(&trade, price, &ctx.costs);
            state.log(format!(
                "EXIT {} {} @ {:.2} ({}) net {:+.2} ({:+.3}%)",
                trade.side, trade.symbol, price, reason, closed.net_pnl, closed.pnl_pct
            ));
            if let Some(halt) = closed.tripped {
                state.log(format!("RISK HALT: {}", halt));
            }
            TickOutcome::Exited
        }
        Err(e) => {
            warn!("{}: exit order failed, retrying next tick", trade.symbol);
            state.log(format!("EXIT FAILED {} {}: {}", trade.side, trade.symbol, e));
            state.abort_exit(trade);
            TickOutcome::Failed
        }
    }
}

/// Close every open position at the last seen close (entry price when the
/// symbol never printed again)
pub(crate) async fn flatten(ctx: Arc<TickContext>, last_bars: &HashMap<Symbol, Bar>) -> usize {
    let symbols: Vec<Symbol> = ctx
        .lock()
        .open_trades()
        .into_iter()
        .map(|t| t.symbol)
        .collect();

    let mut closed = 0;
    for symbol in symbols {
        let Some(trade) = ctx.lock().begin_flatten(&symbol) else {
            continue;
        };
        let price = last_bars
            .get(&symbol)
            .map(|b| b.close)
            .unwrap_or(trade.entry);
        if close_position(ctx.clone(), trade, price, "Session End").await == TickOutcome::Exited {
            closed += 1;
        }
    }
    closed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{ExecutionError, ExecutionResult, PaperBroker};
    use crate::config::Config;
    use crate::oracle::{AlwaysConfirm, OracleError};
    use crate::session::PersistedSession;
    use crate::types::PositionRecord;
    use async_trait::async_trait;

    struct RejectingBroker;

    #[async_trait]
    impl ExecutionAdapter for RejectingBroker {
        fn name(&self) -> &str {
            "rejecting"
        }

        async fn authenticate(&self) -> bool {
            true
        }

        async fn place_order(
            &self,
            _symbol: &Symbol,
            _side: Side,
            _order_type: OrderType,
            _quantity: u64,
            _price: Option<f64>,
        ) -> ExecutionResult<String> {
            Err(ExecutionError::Rejected("margin".into()))
        }

        async fn get_positions(&self) -> ExecutionResult<Vec<PositionRecord>> {
            Ok(vec![])
        }

        async fn get_balance(&self) -> ExecutionResult<f64> {
            Ok(0.0)
        }
    }

    struct Veto;

    #[async_trait]
    impl ConfirmationOracle for Veto {
        async fn confirm(&self, _summary: &str) -> Result<bool, OracleError> {
            Ok(false)
        }
    }

    /// Engages the kill switch while the entry is being confirmed
    struct KillWhileConfirming(EngineHandle);

    #[async_trait]
    impl ConfirmationOracle for KillWhileConfirming {
        async fn confirm(&self, _summary: &str) -> Result<bool, OracleError> {
            self.0.set_kill_switch(true);
            Ok(true)
        }
    }

    fn context(broker: Arc<dyn ExecutionAdapter>, oracle: Arc<dyn ConfirmationOracle>) -> Arc<TickContext> {
        context_with(broker, oracle, EngineHandle::new())
    }

    fn context_with(
        broker: Arc<dyn ExecutionAdapter>,
        oracle: Arc<dyn ConfirmationOracle>,
        handle: EngineHandle,
    ) -> Arc<TickContext> {
        let config = Config::default();
        Arc::new(TickContext {
            state: Arc::new(Mutex::new(EngineState::new(
                &config,
                PersistedSession::fresh(100_000.0),
            ))),
            generator: SignalGenerator::new(config.strategy.clone()),
            costs: CostModel::default(),
            broker,
            oracle,
            oracle_timeout: Duration::from_millis(100),
            handle,
        })
    }

    fn opening_bar() -> Bar {
        Bar::new(100.0, 101.0, 99.0, 100.0, 1_000.0)
    }

    /// Closes above resistance (100.6) with a long upper wick
    fn rejection_bar() -> Bar {
        Bar::new(100.7, 101.5, 100.5, 100.7, 1_000.0)
    }

    #[tokio::test]
    async fn test_short_entry_then_target() {
        let ctx = context(Arc::new(PaperBroker::new(100_000.0)), Arc::new(AlwaysConfirm));
        let sym = Symbol::new("INFY");

        assert_eq!(run_tick(ctx.clone(), sym.clone(), opening_bar()).await, TickOutcome::NoSignal);
        assert_eq!(run_tick(ctx.clone(), sym.clone(), rejection_bar()).await, TickOutcome::Entered);

        let trade = ctx.lock().open_trades().pop().unwrap();
        assert_eq!(trade.side, Side::Short);
        assert_eq!(trade.entry, 100.7);
        assert!(trade.quantity > 0);

        let holding = Bar::new(100.6, 100.7, 100.5, 100.6, 1_000.0);
        assert_eq!(run_tick(ctx.clone(), sym.clone(), holding).await, TickOutcome::Holding);

        let target = Bar::new(100.3, 100.4, 100.1, 100.2, 1_000.0);
        assert_eq!(run_tick(ctx.clone(), sym.clone(), target).await, TickOutcome::Exited);

        let state = ctx.lock();
        assert!(state.open_trades().is_empty());
        assert_eq!(state.risk.trade_count(), 1);
        assert!(state.risk.trades()[0].is_win);
        assert!(state.session.capital > 100_000.0);
        assert!(state.logs().any(|l| l.contains("ORDER SHORT INFY")));
    }

    #[tokio::test]
    async fn test_rejected_order_releases_slot() {
        let ctx = context(Arc::new(RejectingBroker), Arc::new(AlwaysConfirm));
        let sym = Symbol::new("INFY");
        run_tick(ctx.clone(), sym.clone(), opening_bar()).await;
        assert_eq!(run_tick(ctx.clone(), sym.clone(), rejection_bar()).await, TickOutcome::Failed);

        let state = ctx.lock();
        assert_eq!(state.pending(), 0);
        assert_eq!(state.risk.trade_count(), 0);
        assert!(state.logs().any(|l| l.contains("ORDER FAILED")));
    }

    #[tokio::test]
    async fn test_oracle_veto_blocks_entry() {
        let ctx = context(Arc::new(PaperBroker::new(100_000.0)), Arc::new(Veto));
        let sym = Symbol::new("INFY");
        run_tick(ctx.clone(), sym.clone(), opening_bar()).await;
        assert_eq!(run_tick(ctx.clone(), sym.clone(), rejection_bar()).await, TickOutcome::Filtered);
        let state = ctx.lock();
        assert_eq!(state.pending(), 0);
        assert!(state.logs().any(|l| l.contains("AI FILTER")));
    }

    #[tokio::test]
    async fn test_invalid_bar_is_skipped() {
        let ctx = context(Arc::new(PaperBroker::new(100_000.0)), Arc::new(AlwaysConfirm));
        let bad = Bar::new(100.0, 99.0, 101.0, 100.0, 1_000.0);
        assert_eq!(run_tick(ctx.clone(), Symbol::new("X"), bad).await, TickOutcome::Skipped);
        assert!(ctx.lock().levels.is_empty());
    }

    #[tokio::test]
    async fn test_kill_switch_blocks_entries_but_manages_exits() {
        let ctx = context(Arc::new(PaperBroker::new(100_000.0)), Arc::new(AlwaysConfirm));
        let sym = Symbol::new("INFY");
        run_tick(ctx.clone(), sym.clone(), opening_bar()).await;
        assert_eq!(run_tick(ctx.clone(), sym.clone(), rejection_bar()).await, TickOutcome::Entered);

        ctx.handle.set_kill_switch(true);
        let target = Bar::new(100.3, 100.4, 100.1, 100.2, 1_000.0);
        assert_eq!(run_tick(ctx.clone(), sym.clone(), target).await, TickOutcome::Exited);

        let other = Symbol::new("TCS");
        run_tick(ctx.clone(), other.clone(), opening_bar()).await;
        assert_eq!(run_tick(ctx.clone(), other, rejection_bar()).await, TickOutcome::Skipped);
        assert_eq!(ctx.lock().pending(), 0);
    }

    #[tokio::test]
    async fn test_kill_switch_during_confirmation_skips_reservation() {
        let handle = EngineHandle::new();
        let ctx = context_with(
            Arc::new(PaperBroker::new(100_000.0)),
            Arc::new(KillWhileConfirming(handle.clone())),
            handle,
        );
        let sym = Symbol::new("INFY");
        run_tick(ctx.clone(), sym.clone(), opening_bar()).await;
        assert_eq!(run_tick(ctx.clone(), sym, rejection_bar()).await, TickOutcome::Skipped);

        let state = ctx.lock();
        assert_eq!(state.pending(), 0);
        assert!(!state.logs().any(|l| l.contains("ORDER")));
    }

    #[tokio::test]
    async fn test_flatten_closes_at_last_close() {
        let ctx = context(Arc::new(PaperBroker::new(100_000.0)), Arc::new(AlwaysConfirm));
        let sym = Symbol::new("INFY");
        run_tick(ctx.clone(), sym.clone(), opening_bar()).await;
        run_tick(ctx.clone(), sym.clone(), rejection_bar()).await;

        let mut last = HashMap::new();
        last.insert(sym.clone(), Bar::new(100.7, 100.7, 100.7, 100.7, 10.0));
        assert_eq!(flatten(ctx.clone(), &last).await, 1);

        let state = ctx.lock();
        assert!(state.open_trades().is_empty());
        // Flat at entry price: charges make it a small loss
        assert!(state.session.pnl < 0.0);
    }
}
