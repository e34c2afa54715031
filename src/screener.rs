//! Watchlist selection for the session

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::info;

use crate::Symbol;

/// Most symbols the engine will watch in one session
pub const MAX_WATCHLIST: usize = 250;

#[async_trait]
pub trait WatchlistProvider: Send + Sync {
    /// Pick the symbols to watch out of `universe`, best first
    async fn screen(&self, universe: &[Symbol]) -> Result<Vec<Symbol>>;
}

/// Takes the configured universe as-is: upper-cased, de-duplicated in
/// order and capped
#[derive(Debug, Clone)]
pub struct StaticScreener {
    limit: usize,
}

impl StaticScreener {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.clamp(1, MAX_WATCHLIST),
        }
    }
}

impl Default for StaticScreener {
    fn default() -> Self {
        Self::new(MAX_WATCHLIST)
    }
}

#[async_trait]
impl WatchlistProvider for StaticScreener {
    async fn screen(&self, universe: &[Symbol]) -> Result<Vec<Symbol>> {
        let mut seen = HashSet::new();
        let watchlist: Vec<Symbol> = universe
            .iter()
            .map(|s| Symbol::new(s.as_str().trim().to_uppercase()))
            .filter(|s| !s.as_str().is_empty() && seen.insert(s.clone()))
            .take(self.limit)
            .collect();
        info!(
            "Screened {} of {} symbols into the watchlist",
            watchlist.len(),
            universe.len()
        );
        Ok(watchlist)
    }
}
