//! Session scheduler
//!
//! One control task drives the session:
//!
//! ```text
//! Initializing -> Screening -> Running --(risk breaker)--> Halted
//!                                  \----(stop / max cycles)--> Stopped
//! ```
//!
//! Each cycle fetches the whole watchlist from the active feed, advances the
//! regime classifier and fans out one tick per symbol, bounded by a
//! semaphore. On the way out every open position is flattened and the
//! session is checkpointed.

pub mod state;
pub mod tick;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::broker::{ExecutionAdapter, PaperBroker};
use crate::config::{Config, EngineConfig};
use crate::costs::CostModel;
use crate::dashboard::{EngineSnapshot, NullSink, PresentationSink};
use crate::feed::{FeedRouter, QuoteBatch};
use crate::oracle::{AlwaysConfirm, ConfirmationOracle, GeminiOracle};
use crate::regime;
use crate::screener::{StaticScreener, WatchlistProvider};
use crate::session::{PersistedSession, SessionStore};
use crate::strategies::SignalGenerator;
use crate::types::Bar;
use crate::Symbol;

use state::EngineState;
use tick::{flatten, run_tick, TickContext, TickOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnginePhase {
    Initializing,
    Screening,
    Running,
    Halted,
    Stopped,
}

impl std::fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EnginePhase::Initializing => "INITIALIZING",
            EnginePhase::Screening => "SCREENING",
            EnginePhase::Running => "RUNNING",
            EnginePhase::Halted => "HALTED",
            EnginePhase::Stopped => "STOPPED",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Default)]
struct Flags {
    stop: AtomicBool,
    kill_switch: AtomicBool,
    notify: Notify,
}

/// Cloneable control surface for a running engine
#[derive(Debug, Clone, Default)]
pub struct EngineHandle {
    flags: Arc<Flags>,
}

impl EngineHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the engine to finish the current cycle and shut down
    pub fn stop(&self) {
        self.flags.stop.store(true, Ordering::SeqCst);
        self.flags.notify.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.flags.stop.load(Ordering::SeqCst)
    }

    /// Resolves once `stop()` has been called
    pub async fn stopped(&self) {
        while !self.is_stopped() {
            self.flags.notify.notified().await;
        }
    }

    /// Engaging halts the session at the start of the next cycle. The
    /// risk manager latches it, so clearing the flag later does not resume
    /// trading.
    pub fn set_kill_switch(&self, on: bool) {
        self.flags.kill_switch.store(on, Ordering::SeqCst);
    }

    pub fn toggle_kill_switch(&self) -> bool {
        !self.flags.kill_switch.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn kill_switch(&self) -> bool {
        self.flags.kill_switch.load(Ordering::SeqCst)
    }
}

pub struct EngineBuilder {
    config: Config,
    router: Option<FeedRouter>,
    broker: Option<Arc<dyn ExecutionAdapter>>,
    oracle: Option<Arc<dyn ConfirmationOracle>>,
    screener: Option<Arc<dyn WatchlistProvider>>,
    sink: Option<Arc<dyn PresentationSink>>,
    session: Option<PersistedSession>,
}

impl EngineBuilder {
    pub fn router(mut self, router: FeedRouter) -> Self {
        self.router = Some(router);
        self
    }

    pub fn broker(mut self, broker: Arc<dyn ExecutionAdapter>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn oracle(mut self, oracle: Arc<dyn ConfirmationOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn screener(mut self, screener: Arc<dyn WatchlistProvider>) -> Self {
        self.screener = Some(screener);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn PresentationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Start from this session instead of the checkpoint on disk
    pub fn session(mut self, session: PersistedSession) -> Self {
        self.session = Some(session);
        self
    }

    /// Missing collaborators default to the configured feeds, a paper
    /// broker, the configured oracle (or none), the static screener and no
    /// presentation sink.
    pub fn build(self) -> Result<Engine> {
        let config = self.config;
        let store = SessionStore::new(&config.session.path, config.session.checkpoint_interval());
        let session = match self.session {
            Some(session) => session,
            None => store.load_or_fresh(config.session.initial_capital),
        };

        let router = self
            .router
            .unwrap_or_else(|| FeedRouter::from_config(&config.feed));
        let broker = self
            .broker
            .unwrap_or_else(|| Arc::new(PaperBroker::new(session.capital)));
        let oracle: Arc<dyn ConfirmationOracle> = match self.oracle {
            Some(oracle) => oracle,
            None if config.oracle.enabled => {
                Arc::new(GeminiOracle::new(&config.oracle).context("building the confirmation oracle")?)
            }
            None => Arc::new(AlwaysConfirm),
        };
        let screener = self
            .screener
            .unwrap_or_else(|| Arc::new(StaticScreener::new(config.universe.max_watchlist)));
        let sink = self.sink.unwrap_or_else(|| Arc::new(NullSink));

        let handle = EngineHandle::new();
        let ctx = Arc::new(TickContext {
            state: Arc::new(Mutex::new(EngineState::new(&config, session))),
            generator: SignalGenerator::new(config.strategy.clone()),
            costs: CostModel::new(config.costs.clone()),
            broker,
            oracle,
            oracle_timeout: std::time::Duration::from_millis(config.oracle.timeout_ms),
            handle: handle.clone(),
        });

        Ok(Engine {
            settings: config.engine.clone(),
            universe: config.universe.symbols(),
            router,
            screener,
            sink,
            store,
            ctx,
            handle,
            phase: EnginePhase::Initializing,
            cycle: 0,
            active_feed: None,
            watchlist: Vec::new(),
            last_bars: HashMap::new(),
        })
    }
}

pub struct Engine {
    settings: EngineConfig,
    universe: Vec<Symbol>,
    router: FeedRouter,
    screener: Arc<dyn WatchlistProvider>,
    sink: Arc<dyn PresentationSink>,
    store: SessionStore,
    ctx: Arc<TickContext>,
    handle: EngineHandle,
    phase: EnginePhase,
    cycle: u64,
    active_feed: Option<String>,
    watchlist: Vec<Symbol>,
    /// Latest bar seen per symbol, priors stripped
    last_bars: HashMap<Symbol, Bar>,
}

impl Engine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder {
            config,
            router: None,
            broker: None,
            oracle: None,
            screener: None,
            sink: None,
            session: None,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.ctx.lock().snapshot(
            self.phase,
            self.cycle,
            self.active_feed.clone(),
            &self.watchlist,
        )
    }

    fn set_phase(&mut self, phase: EnginePhase) {
        if self.phase != phase {
            info!("Engine phase {} -> {}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Run the session to completion and return the final phase
    pub async fn run(&mut self) -> Result<EnginePhase> {
        self.set_phase(EnginePhase::Initializing);
        self.router.authenticate_all().await;
        if !self.ctx.broker.authenticate().await {
            bail!(
                "execution adapter {} failed to authenticate",
                self.ctx.broker.name()
            );
        }
        self.reconcile_broker().await;

        self.set_phase(EnginePhase::Screening);
        self.watchlist = self
            .screener
            .screen(&self.universe)
            .await
            .context("screening the universe")?;
        if self.watchlist.is_empty() {
            warn!("Watchlist is empty, the engine will idle");
        }
        self.ctx
            .lock()
            .log(format!("Watching {} symbols", self.watchlist.len()));

        self.set_phase(EnginePhase::Running);
        self.publish();

        while !self.handle.is_stopped() {
            let started = Instant::now();
            self.cycle += 1;

            if !self.check_risk() {
                self.set_phase(EnginePhase::Halted);
                break;
            }

            self.run_cycle().await;
            self.publish();
            self.checkpoint(false);

            if let Some(max) = self.settings.max_cycles {
                if self.cycle >= max {
                    info!("Reached {} cycles, stopping", max);
                    break;
                }
            }

            let pause = self
                .settings
                .min_cycle()
                .saturating_sub(started.elapsed())
                .max(self.settings.min_pause());
            tokio::select! {
                _ = sleep(pause) => {}
                _ = self.handle.stopped() => {}
            }
        }

        self.shutdown().await;
        Ok(self.phase)
    }

    /// Log the broker's view at startup. Positions opened outside this
    /// session are reported but never managed.
    async fn reconcile_broker(&self) {
        let broker = &self.ctx.broker;
        match broker.get_balance().await {
            Ok(balance) => info!("[{}] Available balance ₹{:.2}", broker.name(), balance),
            Err(e) => warn!("[{}] Balance unavailable: {}", broker.name(), e),
        }
        match broker.get_positions().await {
            Ok(positions) if !positions.is_empty() => {
                for p in &positions {
                    warn!(
                        "[{}] Unmanaged position {} qty {} @ {:.2}",
                        broker.name(),
                        p.symbol,
                        p.quantity,
                        p.average_price
                    );
                }
            }
            Ok(_) => {}
            Err(e) => warn!("[{}] Positions unavailable: {}", broker.name(), e),
        }
    }

    /// Fold in the kill switch and evaluate the breaker. False once halted.
    fn check_risk(&mut self) -> bool {
        if let Some(path) = &self.settings.kill_switch_file {
            if path.exists() && !self.handle.kill_switch() {
                warn!("Kill switch file {} found", path.display());
                self.handle.set_kill_switch(true);
            }
        }

        let mut state = self.ctx.lock();
        if self.handle.kill_switch() && !state.risk.is_kill_switch_active() {
            state.risk.activate_kill_switch();
            state.log("KILL SWITCH engaged");
        }
        if state.risk.check_constraints() {
            return true;
        }
        let reason = state
            .risk
            .halt_reason()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        state.log(format!("Risk limit reached ({}), halting", reason));
        false
    }

    async fn run_cycle(&mut self) {
        self.active_feed = self.router.begin_cycle().map(str::to_string);
        if self.watchlist.is_empty() || self.active_feed.is_none() {
            return;
        }

        let batch = self
            .router
            .fetch_chunked(
                &self.watchlist,
                self.settings.chunk_size,
                self.settings.chunk_delay(),
                self.settings.fetch_timeout(),
            )
            .await;
        if batch.is_empty() {
            debug!("Cycle {}: no market data", self.cycle);
            return;
        }

        self.observe_regime(&batch);
        self.dispatch_ticks(batch).await;
    }

    fn observe_regime(&self, batch: &QuoteBatch) {
        let Some((trend_shift, base_range)) = regime::aggregate(batch.values()) else {
            return;
        };
        let mut state = self.ctx.lock();
        let before = state.regime.regime();
        match state.regime.observe(trend_shift, base_range) {
            Ok(after) if after != before => {
                let count = state.regime.tsd_count();
                state.log(format!("REGIME {} -> {} (TSD {})", before, after, count));
            }
            Ok(_) => {}
            Err(e) => warn!("Regime update skipped: {}", e),
        }
    }

    async fn dispatch_ticks(&mut self, batch: QuoteBatch) {
        let width = self.settings.max_workers.min(batch.len()).max(1);
        let permits = Arc::new(Semaphore::new(width));
        let tick_timeout = self.settings.tick_timeout();
        let mut tasks = Vec::new();

        for (symbol, bar) in batch {
            let bar = match self.last_bars.get(&symbol) {
                Some(previous) if bar.prior.is_none() => bar.with_prior(previous.clone()),
                _ => bar,
            };
            self.last_bars.insert(symbol.clone(), bar.without_prior());

            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let ctx = self.ctx.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                match timeout(tick_timeout, run_tick(ctx, symbol.clone(), bar)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        debug!("{}: tick exceeded {:?}", symbol, tick_timeout);
                        TickOutcome::Skipped
                    }
                }
            }));
        }

        let (mut entered, mut exited) = (0, 0);
        for task in tasks {
            match task.await {
                Ok(TickOutcome::Entered) => entered += 1,
                Ok(TickOutcome::Exited) => exited += 1,
                Ok(_) => {}
                Err(e) => error!("Tick task failed: {}", e),
            }
        }
        debug!(
            "Cycle {}: {} entries, {} exits",
            self.cycle, entered, exited
        );
    }

    fn publish(&self) {
        if let Err(e) = self.sink.publish(&self.snapshot()) {
            debug!("Presentation sink failed: {}", e);
        }
    }

    /// Throttled write, forced after any realized trade
    fn checkpoint(&mut self, force: bool) {
        let (session, changed) = {
            let mut state = self.ctx.lock();
            (state.session.clone(), state.take_capital_changed())
        };
        if let Err(e) = self.store.checkpoint(&session, force || changed) {
            warn!("Session checkpoint failed: {}", e);
        }
    }

    async fn shutdown(&mut self) {
        let closed = flatten(self.ctx.clone(), &self.last_bars).await;
        if closed > 0 {
            info!("Flattened {} open positions", closed);
        }
        let open = self.ctx.lock().open_trades().len();
        if open > 0 {
            error!("{} positions could not be flattened, check the broker", open);
        }
        if self.phase != EnginePhase::Halted {
            self.set_phase(EnginePhase::Stopped);
        }
        self.checkpoint(true);
        self.publish();
    }
}
