//! Run command: drive one trading session
//!
//! Paper mode fills in memory. Live mode routes orders through Kite after a
//! countdown that can be aborted with Ctrl+C.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use reversion_engine::broker::{ExecutionAdapter, KiteBroker, PaperBroker};
use reversion_engine::config::Config;
use reversion_engine::dashboard::WatchSink;
use reversion_engine::engine::{Engine, EnginePhase};
use reversion_engine::session::SessionStore;
use reversion_engine::zerodha::{ClientConfig, Credentials, ZerodhaClient};

pub fn run(
    config_path: String,
    paper: bool,
    live: bool,
    capital: Option<f64>,
    max_cycles: Option<u64>,
) -> Result<()> {
    if live && paper {
        bail!("Cannot specify both --paper and --live modes");
    }

    let mut config = Config::load_or_default(&config_path)?;
    let live_mode = live || (!paper && config.execution.live);

    if let Some(capital) = capital {
        if !capital.is_finite() || capital <= 0.0 {
            bail!("--capital must be positive, got {}", capital);
        }
        info!("Overriding initial capital to: ₹{:.2}", capital);
        config.session.initial_capital = capital;
    }
    if max_cycles.is_some() {
        config.engine.max_cycles = max_cycles;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config, live_mode))
}

fn kite_broker(config: &Config) -> Result<KiteBroker> {
    let kite = &config.feed.kite;
    let credentials =
        Credentials::new(&kite.api_key, &kite.api_secret).with_access_token(&kite.access_token);
    if !credentials.is_configured() {
        bail!("Live mode needs KITE_API_KEY and KITE_ACCESS_TOKEN");
    }
    let client = ZerodhaClient::with_config(
        credentials,
        ClientConfig::default().with_base_url(&kite.base_url),
    )?;
    Ok(KiteBroker::new(client))
}

async fn run_async(config: Config, live_mode: bool) -> Result<()> {
    let mode = if live_mode { "LIVE" } else { "PAPER" };

    // Session capital also seeds the paper broker's cash
    let store = SessionStore::new(&config.session.path, config.session.checkpoint_interval());
    let session = store.load_or_fresh(config.session.initial_capital);

    let broker: Arc<dyn ExecutionAdapter> = if live_mode {
        Arc::new(kite_broker(&config)?)
    } else {
        Arc::new(PaperBroker::new(session.capital))
    };

    info!("========================================================");
    info!("  NSE MEAN REVERSION ENGINE - {} MODE", mode);
    info!("  Capital: ₹{:.2} (session P&L ₹{:.2})", session.capital, session.pnl);
    info!("  Universe: {} symbols", config.universe.symbols.len());
    info!("  Session file: {}", config.session.path.display());
    info!("========================================================");

    let (sink, mut snapshots) = WatchSink::new();
    let mut engine = Engine::builder(config.clone())
        .broker(broker)
        .sink(Arc::new(sink))
        .session(session)
        .build()?;
    let handle = engine.handle();

    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, finishing the current cycle");
                ctrl_c.stop();
            }
            Err(e) => error!("Error setting up signal handler: {}", e),
        }
    });

    if live_mode {
        let secs = config.execution.live_countdown_secs;
        warn!("LIVE TRADING MODE - REAL MONEY AT RISK!");
        warn!("Press Ctrl+C within {} seconds to abort...", secs);
        for i in (1..=secs).rev() {
            if handle.is_stopped() {
                info!("Aborted before trading started");
                return Ok(());
            }
            info!("Starting in {} seconds...", i);
            sleep(Duration::from_secs(1)).await;
        }
    }

    // Console status line per cycle
    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let Some(s) = snapshots.borrow_and_update().clone() else {
                continue;
            };
            info!(
                "[{}] cycle {} | feed {} | regime {} (TSD {}) | open {} | trades {} | P&L ₹{:.2} | DD {:.2}%",
                s.phase,
                s.cycle,
                s.active_feed.as_deref().unwrap_or("none"),
                s.regime,
                s.tsd_count,
                s.positions.len(),
                s.trade_count,
                s.pnl,
                s.current_drawdown
            );
        }
    });

    let phase = engine.run().await?;
    let summary = engine.snapshot();

    println!("\n{}", "=".repeat(60));
    println!("SESSION SUMMARY ({})", mode);
    println!("{}", "=".repeat(60));
    println!("Final Phase:        {}", phase);
    println!("Cycles:             {}", summary.cycle);
    println!("Trades:             {}", summary.trade_count);
    println!("Session P&L:        ₹{:.2}", summary.pnl);
    println!("Capital:            ₹{:.2}", summary.capital);
    println!("Drawdown:           {:.2}%", summary.current_drawdown);
    if let Some(reason) = summary.halt_reason {
        println!("Halted By:          {}", reason);
    }
    println!("{}", "=".repeat(60));

    if phase == EnginePhase::Halted {
        warn!("Session halted by the risk breaker");
    }
    Ok(())
}
