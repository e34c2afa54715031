//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for API credentials. Every section has defaults, so an
//! empty `{}` file is a valid paper-trading configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::costs::CostConfig;
use crate::feed::FeedConfig;
use crate::levels::LevelConfig;
use crate::oracle::OracleConfig;
use crate::regime::{RegimeThresholds, DEFAULT_THRESHOLD_MULT};
use crate::risk::RiskManagerConfig;
use crate::screener::MAX_WATCHLIST;
use crate::strategies::MeanReversionConfig;
use crate::Symbol;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub regime: RegimeConfig,
    pub levels: LevelConfig,
    pub strategy: MeanReversionConfig,
    pub risk: RiskManagerConfig,
    pub feed: FeedConfig,
    pub costs: CostConfig,
    pub oracle: OracleConfig,
    pub session: SessionConfig,
    pub universe: UniverseConfig,
    pub execution: ExecutionConfig,
}

/// Credential overrides read from the environment (and `.env`)
const ENV_OVERRIDES: &[&str] = &[
    "KITE_API_KEY",
    "KITE_API_SECRET",
    "KITE_ACCESS_TOKEN",
    "DHAN_CLIENT_ID",
    "DHAN_ACCESS_TOKEN",
    "GEMINI_API_KEY",
];

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.apply_env();
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise start from defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::warn!("Config file {} not found, using defaults", path.display());
            let mut config = Config::default();
            config.apply_env();
            Ok(config)
        }
    }

    /// Overlay API credentials from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for key in ENV_OVERRIDES {
            let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) else {
                continue;
            };
            match *key {
                "KITE_API_KEY" => self.feed.kite.api_key = value,
                "KITE_API_SECRET" => self.feed.kite.api_secret = value,
                "KITE_ACCESS_TOKEN" => self.feed.kite.access_token = value,
                "DHAN_CLIENT_ID" => self.feed.dhan.client_id = value,
                "DHAN_ACCESS_TOKEN" => self.feed.dhan.access_token = value,
                "GEMINI_API_KEY" => self.oracle.api_key = value,
                _ => {}
            }
        }
    }
}

/// Scheduling loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub min_cycle_ms: u64,
    pub min_pause_ms: u64,
    pub chunk_size: usize,
    pub chunk_delay_ms: u64,
    pub fetch_timeout_ms: u64,
    pub tick_timeout_ms: u64,
    pub max_workers: usize,
    pub log_capacity: usize,
    /// Presence of this file activates the kill switch
    pub kill_switch_file: Option<PathBuf>,
    /// Stop after this many cycles (unbounded when absent)
    pub max_cycles: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_cycle_ms: 1_000,
            min_pause_ms: 100,
            chunk_size: 50,
            chunk_delay_ms: 200,
            fetch_timeout_ms: 20_000,
            tick_timeout_ms: 1_000,
            max_workers: 50,
            log_capacity: 50,
            kill_switch_file: Some(PathBuf::from("KILL_SWITCH")),
            max_cycles: None,
        }
    }
}

impl EngineConfig {
    pub fn min_cycle(&self) -> Duration {
        Duration::from_millis(self.min_cycle_ms)
    }

    pub fn min_pause(&self) -> Duration {
        Duration::from_millis(self.min_pause_ms)
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms.max(1))
    }

    pub fn tick_timeout(&self) -> Duration {
        Duration::from_millis(self.tick_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub threshold_mult: f64,
    pub thresholds: RegimeThresholds,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            threshold_mult: DEFAULT_THRESHOLD_MULT,
            thresholds: RegimeThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub path: PathBuf,
    pub checkpoint_interval_secs: u64,
    pub initial_capital: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("paper_data.json"),
            checkpoint_interval_secs: 30,
            initial_capital: 100_000.0,
        }
    }
}

impl SessionConfig {
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }
}

/// Symbols considered for the session watchlist
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseConfig {
    pub symbols: Vec<String>,
    pub max_watchlist: usize,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            symbols: NIFTY_200.iter().map(|s| s.to_string()).collect(),
            max_watchlist: MAX_WATCHLIST,
        }
    }
}

impl UniverseConfig {
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.iter().map(|s| Symbol::new(s.clone())).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Real orders through Kite. The CLI flag takes precedence.
    pub live: bool,
    /// Seconds to wait before live trading starts
    pub live_countdown_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            live: false,
            live_countdown_secs: 10,
        }
    }
}

/// Default universe: NSE large and mid caps
const NIFTY_200: &[&str] = &[
    "ABB", "ACC", "APLAPOLLO", "AUBANK", "ADANIENSOL", "ADANIENT", "ADANIGREEN", "ADANIPORTS",
    "ADANIPOWER", "ATGL", "ABCAPITAL", "ALKEM", "AMBUJACEM", "APOLLOHOSP", "ASHOKLEY",
    "ASIANPAINT", "ASTRAL", "AUROPHARMA", "DMART", "AXISBANK", "BSE", "BAJAJ-AUTO", "BAJFINANCE",
    "BAJAJFINSV", "BAJAJHLDNG", "BAJAJHFL", "BANKBARODA", "BANKINDIA", "BDL", "BEL", "BHARATFORG",
    "BHEL", "BPCL", "BHARTIARTL", "BHARTIHEXA", "BIOCON", "BLUESTARCO", "BOSCHLTD", "BRITANNIA",
    "CGPOWER", "CANBK", "CHOLAFIN", "CIPLA", "COALINDIA", "COCHINSHIP", "COFORGE", "COLPAL",
    "CONCOR", "COROMANDEL", "CUMMINSIND", "DLF", "DABUR", "DIVISLAB", "DIXON", "DRREDDY",
    "EICHERMOT", "ETERNAL", "EXIDEIND", "NYKAA", "FEDERALBNK", "FORTIS", "GAIL", "GMRAIRPORT",
    "GLENMARK", "GODFRYPHLP", "GODREJCP", "GODREJPROP", "GRASIM", "HCLTECH", "HDFCAMC",
    "HDFCBANK", "HDFCLIFE", "HAVELLS", "HEROMOTOCO", "HINDALCO", "HAL", "HINDPETRO",
    "HINDUNILVR", "HINDZINC", "POWERINDIA", "HUDCO", "HYUNDAI", "ICICIBANK", "ICICIGI",
    "IDFCFIRSTB", "IRB", "ITC", "INDIANB", "INDHOTEL", "IOC", "IRCTC", "IRFC", "IREDA", "IGL",
    "INDUSTOWER", "INDUSINDBK", "NAUKRI", "INFY", "INDIGO", "JSWENERGY", "JSWSTEEL",
    "JINDALSTEL", "JIOFIN", "JUBLFOOD", "KEI", "KPITTECH", "KALYANKJIL", "KOTAKBANK", "LTF",
    "LICHSGFIN", "LTIM", "LT", "LICI", "LODHA", "LUPIN", "MRF", "M&MFIN", "M&M", "MANKIND",
    "MARICO", "MARUTI", "MFSL", "MAXHEALTH", "MAZDOCK", "MOTILALOFS", "MPHASIS", "MUTHOOTFIN",
    "NHPC", "NMDC", "NTPC", "NATIONALUM", "NESTLEIND", "OBEROIRLTY", "ONGC", "OIL", "PAYTM",
    "OFSS", "POLICYBZR", "PIIND", "PAGEIND", "PATANJALI", "PERSISTENT", "PHOENIXLTD",
    "PIDILITIND", "POLYCAB", "PFC", "POWERGRID", "PREMIERENE", "PRESTIGE", "PNB", "RECLTD",
    "RVNL", "RELIANCE", "SBICARD", "SBILIFE", "SRF", "MOTHERSON", "SHREECEM", "SHRIRAMFIN",
    "ENRIN", "SIEMENS", "SOLARINDS", "SONACOMS", "SBIN", "SAIL", "SUNPHARMA", "SUPREMEIND",
    "SUZLON", "SWIGGY", "TVSMOTOR", "TATACOMM", "TCS", "TATACONSUM", "TATAELXSI", "TMPV",
    "TATAPOWER", "TATASTEEL", "TATATECH", "TECHM", "TITAN", "TORNTPHARM", "TORNTPOWER", "TRENT",
    "TIINDIA", "UPL", "ULTRACEMCO", "UNIONBANK", "UNITDSPR", "VBL", "VEDL", "VMM", "IDEA",
    "VOLTAS", "WAAREEENER", "WIPRO", "YESBANK", "ZYDUSLIFE",
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_json_is_all_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.engine.chunk_size, 50);
        assert_eq!(config.risk.max_trades, 3);
        assert_eq!(config.feed.preference, vec!["kite", "dhan", "yahoo"]);
        assert!(!config.universe.symbols.is_empty());
        assert_eq!(config.costs.min_net_profit_pct, 0.0);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let json = r#"{"risk": {"max_trades": 5}, "engine": {"min_cycle_ms": 250}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.risk.max_trades, 5);
        assert_eq!(config.risk.max_consecutive_losses, 2);
        assert_eq!(config.engine.min_cycle(), Duration::from_millis(250));
        assert_eq!(config.engine.min_pause_ms, 100);
    }

    #[test]
    fn test_env_overrides_credentials() {
        let env: HashMap<&str, &str> = [
            ("KITE_API_KEY", "kk"),
            ("KITE_ACCESS_TOKEN", "kt"),
            ("DHAN_CLIENT_ID", " "),
            ("GEMINI_API_KEY", "gk"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.feed.dhan.client_id = "keep".into();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.feed.kite.api_key, "kk");
        assert_eq!(config.feed.kite.access_token, "kt");
        assert_eq!(config.feed.dhan.client_id, "keep");
        assert_eq!(config.oracle.api_key, "gk");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"universe": {"symbols": ["INFY", "TCS"]}}"#).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.universe.symbols(), vec![Symbol::new("INFY"), Symbol::new("TCS")]);
        assert!(Config::from_file(dir.path().join("missing.json")).is_err());
    }
}
