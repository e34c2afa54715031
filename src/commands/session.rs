//! Session checkpoint maintenance

use anyhow::{Context, Result};
use tracing::info;

use reversion_engine::config::Config;
use reversion_engine::session::SessionStore;

pub enum SessionAction {
    Show,
    Reset,
    SetCapital(f64),
}

pub fn run(config_path: String, action: SessionAction) -> Result<()> {
    let config = Config::load_or_default(&config_path)?;
    let store = SessionStore::new(&config.session.path, config.session.checkpoint_interval());

    match action {
        SessionAction::Show => match store.load()? {
            Some(session) => {
                println!("Session file:   {}", store.path().display());
                println!("Capital:        ₹{:.2}", session.capital);
                println!("Realized P&L:   ₹{:.2}", session.pnl);
                println!("Equity points:  {}", session.equity_history.len());
                for point in session.equity_history.iter().rev().take(5) {
                    println!("  {:>8}  ₹{:.2}", point.time, point.equity);
                }
            }
            None => println!("No session checkpoint at {}", store.path().display()),
        },
        SessionAction::Reset => {
            if store.reset()? {
                info!("Removed {}", store.path().display());
            } else {
                info!("Nothing to reset at {}", store.path().display());
            }
        }
        SessionAction::SetCapital(capital) => {
            let session = store
                .set_capital(capital)
                .context("Failed to write the session checkpoint")?;
            info!("Session capital set to ₹{:.2}", session.capital);
        }
    }
    Ok(())
}
