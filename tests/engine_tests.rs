//! End-to-end sessions against a scripted feed and the paper broker

use approx::assert_relative_eq;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use reversion_engine::broker::{ExecutionAdapter, PaperBroker};
use reversion_engine::dashboard::WatchSink;
use reversion_engine::feed::{DataFeed, FeedError, FeedRouter, QuoteBatch};
use reversion_engine::oracle::{AlwaysConfirm, ConfirmationOracle, OracleError};
use reversion_engine::risk::HaltReason;
use reversion_engine::session::{PersistedSession, SessionStore};
use reversion_engine::regime::Regime;
use reversion_engine::{Bar, Config, Engine, EnginePhase, Side, Symbol};

/// Serves one prepared batch per call, then nothing
struct ScriptedFeed {
    script: Mutex<VecDeque<QuoteBatch>>,
}

impl ScriptedFeed {
    fn new(bars: Vec<Bar>) -> Self {
        let script = bars
            .into_iter()
            .map(|bar| {
                let mut batch = QuoteBatch::new();
                batch.insert(Symbol::new("INFY"), bar);
                batch
            })
            .collect();
        Self {
            script: Mutex::new(script),
        }
    }
}

#[async_trait]
impl DataFeed for ScriptedFeed {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn authenticate(&self) -> bool {
        true
    }

    async fn get_quote_batch(&self, _symbols: &[Symbol]) -> Result<QuoteBatch, FeedError> {
        Ok(self.script.lock().unwrap().pop_front().unwrap_or_default())
    }

    fn is_disabled(&self) -> bool {
        false
    }
}

/// First bar of the session: levels 99.40 / 100.60
fn opening() -> Bar {
    Bar::new(100.0, 101.0, 99.0, 100.0, 1_000.0)
}

/// Closes above resistance with a long upper wick
fn rejection() -> Bar {
    Bar::new(100.7, 101.5, 100.5, 100.7, 1_000.0)
}

/// Through the short target
fn target_hit() -> Bar {
    Bar::new(100.3, 100.4, 100.1, 100.2, 1_000.0)
}

/// Through the short stop
fn stop_hit() -> Bar {
    Bar::new(101.6, 101.9, 101.5, 101.8, 1_000.0)
}

fn config(dir: &TempDir, cycles: u64) -> Config {
    let mut config = Config::default();
    config.engine.min_cycle_ms = 0;
    config.engine.min_pause_ms = 0;
    config.engine.chunk_delay_ms = 0;
    config.engine.kill_switch_file = None;
    config.engine.max_cycles = Some(cycles);
    config.session.path = dir.path().join("session.json");
    config.universe.symbols = vec!["INFY".to_string()];
    config
}

fn engine(config: Config, bars: Vec<Bar>, broker: Arc<PaperBroker>) -> Engine {
    let feed: Arc<dyn DataFeed> = Arc::new(ScriptedFeed::new(bars));
    Engine::builder(config)
        .router(FeedRouter::new(vec![feed], Duration::from_secs(1)))
        .broker(broker)
        .oracle(Arc::new(AlwaysConfirm))
        .session(PersistedSession::fresh(100_000.0))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_short_fade_hits_target() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(PaperBroker::new(100_000.0));
    let mut engine = engine(
        config(&dir, 3),
        vec![opening(), rejection(), target_hit()],
        broker.clone(),
    );

    assert_eq!(engine.run().await.unwrap(), EnginePhase::Stopped);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.cycle, 3);
    assert_eq!(snapshot.trade_count, 1);
    assert!(snapshot.positions.is_empty());
    assert!(snapshot.pnl > 0.0);
    assert!(snapshot.capital > 100_000.0);
    assert_eq!(snapshot.equity_history.len(), 2);
    assert!(snapshot.logs.iter().any(|l| l.contains("ORDER SHORT INFY")));
    assert!(snapshot.logs.iter().any(|l| l.contains("(Target)")));

    assert_eq!(broker.fill_count(), 2);
    assert!(broker.get_positions().await.unwrap().is_empty());

    // Realized trades are checkpointed
    let store = SessionStore::new(dir.path().join("session.json"), Duration::from_secs(30));
    let saved = store.load().unwrap().unwrap();
    assert_relative_eq!(saved.capital, snapshot.capital, epsilon = 1e-9);
    assert_relative_eq!(saved.pnl, snapshot.capital - 100_000.0, epsilon = 1e-6);
}

#[tokio::test]
async fn test_two_losses_halt_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(PaperBroker::new(100_000.0));
    let mut engine = engine(
        config(&dir, 10),
        vec![opening(), rejection(), stop_hit(), rejection(), stop_hit(), rejection()],
        broker.clone(),
    );

    assert_eq!(engine.run().await.unwrap(), EnginePhase::Halted);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.trade_count, 2);
    assert_eq!(snapshot.halt_reason, Some(HaltReason::ConsecutiveLosses));
    assert!(snapshot.pnl < 0.0);
    assert!(snapshot.positions.is_empty());
    // Halted at the start of the cycle after the second loss
    assert_eq!(snapshot.cycle, 6);
    assert_eq!(broker.fill_count(), 4);
}

#[tokio::test]
async fn test_kill_switch_halts_before_trading() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(PaperBroker::new(100_000.0));
    let mut engine = engine(config(&dir, 5), vec![opening(), rejection()], broker.clone());
    engine.handle().set_kill_switch(true);

    assert_eq!(engine.run().await.unwrap(), EnginePhase::Halted);
    let snapshot = engine.snapshot();
    assert!(snapshot.kill_switch);
    assert_eq!(snapshot.halt_reason, Some(HaltReason::KillSwitch));
    assert_eq!(broker.fill_count(), 0);
}

#[tokio::test]
async fn test_kill_switch_file_is_polled() {
    let dir = tempfile::tempdir().unwrap();
    let kill_file = dir.path().join("KILL_SWITCH");
    std::fs::write(&kill_file, "").unwrap();

    let mut config = config(&dir, 5);
    config.engine.kill_switch_file = Some(kill_file);
    let mut engine = engine(config, vec![opening()], Arc::new(PaperBroker::new(100_000.0)));

    assert_eq!(engine.run().await.unwrap(), EnginePhase::Halted);
    assert!(engine.handle().kill_switch());
}

#[tokio::test]
async fn test_shutdown_flattens_open_positions() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(PaperBroker::new(100_000.0));
    let (sink, rx) = WatchSink::new();
    let feed: Arc<dyn DataFeed> = Arc::new(ScriptedFeed::new(vec![opening(), rejection()]));
    let mut engine = Engine::builder(config(&dir, 2))
        .router(FeedRouter::new(vec![feed], Duration::from_secs(1)))
        .broker(broker.clone())
        .sink(Arc::new(sink))
        .session(PersistedSession::fresh(100_000.0))
        .build()
        .unwrap();

    assert_eq!(engine.run().await.unwrap(), EnginePhase::Stopped);

    let last = rx.borrow().clone().unwrap();
    assert_eq!(last.phase, EnginePhase::Stopped);
    assert!(last.positions.is_empty());
    assert_eq!(last.trade_count, 1);
    assert!(last.logs.iter().any(|l| l.contains("Session End")));
    assert!(broker.get_positions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stop_before_first_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(config(&dir, 5), vec![opening()], Arc::new(PaperBroker::new(100_000.0)));
    engine.handle().stop();

    assert_eq!(engine.run().await.unwrap(), EnginePhase::Stopped);
    assert_eq!(engine.cycle(), 0);
    // The closing checkpoint is always written
    assert!(dir.path().join("session.json").exists());
}

#[tokio::test]
async fn test_planned_trades_follow_levels() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(config(&dir, 1), vec![opening()], Arc::new(PaperBroker::new(100_000.0)));
    engine.run().await.unwrap();

    let planned = engine.snapshot().planned_trades;
    assert_eq!(planned.len(), 2);
    let long = planned.iter().find(|p| p.side == Side::Long).unwrap();
    let short = planned.iter().find(|p| p.side == Side::Short).unwrap();
    assert_eq!(long.entry, 99.4);
    assert_eq!(long.stop, 98.9);
    assert_eq!(short.entry, 100.6);
    assert_eq!(short.target, 99.6);
}

/// Prices every requested symbol except `SLOW`, which never answers in time
struct StallingFeed;

#[async_trait]
impl DataFeed for StallingFeed {
    fn name(&self) -> &str {
        "stalling"
    }

    async fn authenticate(&self) -> bool {
        true
    }

    async fn get_quote_batch(&self, symbols: &[Symbol]) -> Result<QuoteBatch, FeedError> {
        if symbols.iter().any(|s| s.as_str() == "SLOW") {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        Ok(symbols.iter().map(|s| (s.clone(), opening())).collect())
    }

    fn is_disabled(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn test_slow_symbol_does_not_cost_the_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir, 1);
    config.universe.symbols = vec!["INFY".to_string(), "SLOW".to_string()];
    config.engine.chunk_size = 1;
    config.engine.fetch_timeout_ms = 500;

    let feed: Arc<dyn DataFeed> = Arc::new(StallingFeed);
    let mut engine = Engine::builder(config)
        .router(FeedRouter::new(vec![feed], Duration::from_secs(5)))
        .broker(Arc::new(PaperBroker::new(100_000.0)))
        .oracle(Arc::new(AlwaysConfirm))
        .session(PersistedSession::fresh(100_000.0))
        .build()
        .unwrap();

    engine.run().await.unwrap();

    let planned = engine.snapshot().planned_trades;
    assert_eq!(planned.len(), 2);
    assert!(planned.iter().all(|p| p.symbol.as_str() == "INFY"));
}

/// Serves the same scripted bar to every requested symbol
struct BroadcastFeed {
    script: Mutex<VecDeque<Bar>>,
}

#[async_trait]
impl DataFeed for BroadcastFeed {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn authenticate(&self) -> bool {
        true
    }

    async fn get_quote_batch(&self, symbols: &[Symbol]) -> Result<QuoteBatch, FeedError> {
        let Some(bar) = self.script.lock().unwrap().pop_front() else {
            return Ok(QuoteBatch::new());
        };
        Ok(symbols.iter().map(|s| (s.clone(), bar.clone())).collect())
    }

    fn is_disabled(&self) -> bool {
        false
    }
}

/// Never answers for `SLOW`, confirms everything else
struct StuckOnSlow;

#[async_trait]
impl ConfirmationOracle for StuckOnSlow {
    async fn confirm(&self, summary: &str) -> Result<bool, OracleError> {
        if summary.contains("SLOW") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(true)
    }
}

#[tokio::test]
async fn test_stuck_tick_is_dropped_and_cycle_completes() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir, 2);
    config.universe.symbols = vec!["INFY".to_string(), "SLOW".to_string()];
    config.engine.tick_timeout_ms = 200;
    config.oracle.timeout_ms = 60_000;

    let broker = Arc::new(PaperBroker::new(100_000.0));
    let feed: Arc<dyn DataFeed> = Arc::new(BroadcastFeed {
        script: Mutex::new(VecDeque::from(vec![opening(), rejection()])),
    });
    let mut engine = Engine::builder(config)
        .router(FeedRouter::new(vec![feed], Duration::from_secs(1)))
        .broker(broker.clone())
        .oracle(Arc::new(StuckOnSlow))
        .session(PersistedSession::fresh(100_000.0))
        .build()
        .unwrap();

    let started = std::time::Instant::now();
    assert_eq!(engine.run().await.unwrap(), EnginePhase::Stopped);
    assert!(started.elapsed() < Duration::from_secs(5));

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.cycle, 2);
    // INFY entered and was flattened at shutdown; SLOW never reserved
    assert_eq!(snapshot.trade_count, 1);
    assert!(snapshot.logs.iter().any(|l| l.contains("ORDER SHORT INFY")));
    assert!(!snapshot.logs.iter().any(|l| l.contains("ORDER SHORT SLOW")));
    assert_eq!(broker.fill_count(), 2);
}

/// Full-body bar: the whole range is directional movement
fn trend_bar() -> Bar {
    Bar::new(100.0, 101.0, 100.0, 101.0, 1_000.0)
}

#[tokio::test]
async fn test_trending_market_blocks_entries() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(PaperBroker::new(100_000.0));
    let mut bars = vec![opening()];
    bars.extend(std::iter::repeat_with(trend_bar).take(5));
    // Would enter short in a calm market; pulls TSD back to 4 only
    bars.push(rejection());
    let mut engine = engine(config(&dir, 7), bars, broker.clone());

    assert_eq!(engine.run().await.unwrap(), EnginePhase::Stopped);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.cycle, 7);
    assert_eq!(snapshot.tsd_count, 4);
    assert_eq!(snapshot.regime, Regime::Trending);
    assert!(snapshot.logs.iter().any(|l| l.contains("REGIME")));
    assert!(!snapshot.logs.iter().any(|l| l.contains("ORDER")));
    assert_eq!(snapshot.trade_count, 0);
    assert_eq!(broker.fill_count(), 0);
}
