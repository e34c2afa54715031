//! Kill switch for a running engine
//!
//! The engine polls for the kill switch file at the start of every cycle.

use anyhow::{bail, Context, Result};
use chrono::Local;
use tracing::{info, warn};

use reversion_engine::config::Config;

pub fn run(config_path: String, off: bool) -> Result<()> {
    let config = Config::load_or_default(&config_path)?;
    let Some(path) = config.engine.kill_switch_file else {
        bail!("engine.kill_switch_file is disabled in {}", config_path);
    };

    if off {
        match std::fs::remove_file(&path) {
            Ok(()) => info!("Kill switch file {} removed", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Kill switch was not engaged")
            }
            Err(e) => return Err(e).context(format!("Failed to remove {}", path.display())),
        }
        warn!("A session already halted stays halted until it is restarted");
    } else {
        std::fs::write(&path, Local::now().to_rfc3339())
            .context(format!("Failed to write {}", path.display()))?;
        warn!("Kill switch engaged via {}", path.display());
    }
    Ok(())
}
