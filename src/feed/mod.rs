//! Market data acquisition
//!
//! Raw quote APIs (`KiteQuotes`, `DhanQuotes`, `YahooQuotes`) know only how
//! to talk to one upstream. `GuardedSource` wraps a raw API with the auth
//! lockout, a transient circuit breaker and a rate limiter, turning it into a
//! `DataFeed`. `FeedRouter` picks exactly one live feed per cycle.

pub mod cache;
pub mod dhan;
pub mod guarded;
pub mod kite;
pub mod router;
pub mod yahoo;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::{Bar, Symbol};

pub use cache::CachedQuotes;
pub use dhan::DhanQuotes;
pub use guarded::GuardedSource;
pub use kite::KiteQuotes;
pub use router::FeedRouter;
pub use yahoo::YahooQuotes;

/// Latest bar per symbol. Symbols the source could not price are absent.
pub type QuoteBatch = HashMap<Symbol, Bar>;

#[derive(Debug, Error)]
pub enum FeedError {
    /// Credentials rejected; the source must never be called again
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("circuit open for {0}")]
    CircuitOpen(String),
    #[error("request timed out")]
    Timeout,
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FeedError::Timeout
        } else {
            FeedError::Network(err.to_string())
        }
    }
}

/// One upstream quote API without any fault handling
#[async_trait]
pub trait QuoteApi: Send + Sync {
    fn name(&self) -> &str;

    /// True when the API takes a rate-limit token per upstream request
    /// itself. The guard then skips its per-batch token.
    fn paces_requests(&self) -> bool {
        false
    }

    /// Check credentials with a cheap call. Sources without credentials
    /// accept by default.
    async fn verify(&self) -> Result<(), FeedError> {
        Ok(())
    }

    async fn fetch(&self, symbols: &[Symbol]) -> Result<QuoteBatch, FeedError>;
}

/// Market data source as seen by the engine
#[async_trait]
pub trait DataFeed: Send + Sync {
    fn name(&self) -> &str;

    /// True when the source is usable. A rejection disables it for good.
    async fn authenticate(&self) -> bool;

    async fn get_quote_batch(&self, symbols: &[Symbol]) -> Result<QuoteBatch, FeedError>;

    /// True once the source has been permanently disabled
    fn is_disabled(&self) -> bool;
}

fn default_preference() -> Vec<String> {
    vec!["kite".to_string(), "dhan".to_string(), "yahoo".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KiteFeedConfig {
    pub api_key: String,
    pub api_secret: String,
    pub access_token: String,
    pub base_url: String,
    pub requests_per_sec: u32,
}

impl Default for KiteFeedConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            access_token: String::new(),
            base_url: crate::zerodha::API_BASE_URL.to_string(),
            requests_per_sec: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DhanFeedConfig {
    pub client_id: String,
    pub access_token: String,
    pub base_url: String,
    /// NSE trading symbol to Dhan security id
    pub security_ids: HashMap<String, u64>,
    pub requests_per_sec: u32,
}

impl Default for DhanFeedConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            access_token: String::new(),
            base_url: dhan::API_BASE_URL.to_string(),
            security_ids: HashMap::new(),
            requests_per_sec: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YahooFeedConfig {
    pub enabled: bool,
    pub base_url: String,
    pub cache_ttl_secs: u64,
    /// Relative jitter applied to cached closes, e.g. 0.0005 = ±0.05 %
    pub jitter_pct: f64,
    pub requests_per_sec: u32,
}

impl Default for YahooFeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: yahoo::API_BASE_URL.to_string(),
            cache_ttl_secs: 30,
            jitter_pct: 0.0005,
            requests_per_sec: 5,
        }
    }
}

/// Data source selection and per-source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Source names in priority order
    #[serde(default = "default_preference")]
    pub preference: Vec<String>,
    pub request_timeout_secs: u64,
    pub failure_threshold: u32,
    pub breaker_timeout_secs: u64,
    pub kite: KiteFeedConfig,
    pub dhan: DhanFeedConfig,
    pub yahoo: YahooFeedConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            preference: default_preference(),
            request_timeout_secs: 10,
            failure_threshold: 5,
            breaker_timeout_secs: 30,
            kite: KiteFeedConfig::default(),
            dhan: DhanFeedConfig::default(),
            yahoo: YahooFeedConfig::default(),
        }
    }
}
