//! Source selection and batched fetching
//!
//! Exactly one source is active at a time. Failover happens between cycles:
//! `begin_cycle` promotes the next enabled source when the active one has
//! been disabled. Within a cycle every error or timeout becomes an empty
//! batch, so a failing source costs one cycle of data, never a crash.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{error, info, warn};

use super::guarded::breaker_config;
use super::{
    CachedQuotes, DataFeed, DhanQuotes, FeedConfig, GuardedSource, KiteQuotes, QuoteBatch,
    YahooQuotes,
};
use crate::common::{RateLimiter, RateLimiterConfig};
use crate::zerodha::{auth::is_real_credential, ClientConfig, Credentials, ZerodhaClient};
use crate::Symbol;

pub struct FeedRouter {
    sources: Vec<Arc<dyn DataFeed>>,
    active: usize,
    fetch_timeout: Duration,
}

impl FeedRouter {
    /// Sources in priority order
    pub fn new(sources: Vec<Arc<dyn DataFeed>>, fetch_timeout: Duration) -> Self {
        let mut router = Self {
            sources,
            active: 0,
            fetch_timeout,
        };
        router.promote();
        router
    }

    /// Build every configured source in preference order. Sources with
    /// missing or placeholder credentials are skipped.
    pub fn from_config(config: &FeedConfig) -> Self {
        let request_timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        let breaker = || breaker_config(config.failure_threshold, config.breaker_timeout_secs);
        let limiter = |rate: u32| RateLimiterConfig::default().with_rate(rate);

        let mut sources: Vec<Arc<dyn DataFeed>> = Vec::new();
        for name in &config.preference {
            match name.as_str() {
                "kite" => {
                    let kite = &config.kite;
                    let credentials = Credentials::new(&kite.api_key, &kite.api_secret)
                        .with_access_token(&kite.access_token);
                    if !credentials.is_configured() {
                        info!("[kite] Credentials not configured, skipping source");
                        continue;
                    }
                    let client_config = ClientConfig::default()
                        .with_base_url(&kite.base_url)
                        .with_timeout(request_timeout);
                    match ZerodhaClient::with_config(credentials, client_config) {
                        Ok(client) => sources.push(Arc::new(GuardedSource::new(
                            KiteQuotes::new(client),
                            breaker(),
                            limiter(kite.requests_per_sec),
                        ))),
                        Err(e) => warn!("[kite] Client construction failed: {}", e),
                    }
                }
                "dhan" => {
                    let dhan = &config.dhan;
                    if !is_real_credential(&dhan.client_id) || !is_real_credential(&dhan.access_token)
                    {
                        info!("[dhan] Credentials not configured, skipping source");
                        continue;
                    }
                    match DhanQuotes::new(
                        &dhan.base_url,
                        &dhan.client_id,
                        &dhan.access_token,
                        dhan.security_ids.clone(),
                        request_timeout,
                    ) {
                        Ok(api) => sources.push(Arc::new(GuardedSource::new(
                            api,
                            breaker(),
                            limiter(dhan.requests_per_sec),
                        ))),
                        Err(e) => warn!("[dhan] Client construction failed: {}", e),
                    }
                }
                "yahoo" => {
                    let yahoo = &config.yahoo;
                    if !yahoo.enabled {
                        continue;
                    }
                    match YahooQuotes::new(&yahoo.base_url, request_timeout) {
                        Ok(api) => {
                            // One chart request per symbol, so the limiter
                            // sits inside the API rather than per batch
                            let api = api.with_rate_limiter(RateLimiter::new(limiter(
                                yahoo.requests_per_sec,
                            )));
                            let cached = CachedQuotes::new(api, Duration::from_secs(yahoo.cache_ttl_secs))
                                .with_jitter(yahoo.jitter_pct);
                            sources.push(Arc::new(GuardedSource::new(
                                cached,
                                breaker(),
                                limiter(yahoo.requests_per_sec),
                            )));
                        }
                        Err(e) => warn!("[yahoo] Client construction failed: {}", e),
                    }
                }
                other => warn!("Unknown data source '{}' in preference list", other),
            }
        }

        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        info!("Data sources in priority order: {:?}", names);
        // Whole-batch timeout: a slow source must not stall the cycle
        Self::new(sources, request_timeout * 2)
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn active_name(&self) -> Option<&str> {
        self.sources.get(self.active).map(|s| s.name())
    }

    pub fn is_exhausted(&self) -> bool {
        self.active >= self.sources.len()
    }

    fn promote(&mut self) -> bool {
        let before = self.active;
        while self.active < self.sources.len() && self.sources[self.active].is_disabled() {
            self.active += 1;
        }
        self.active != before
    }

    /// Verify credentials of every source up front, then select the first
    /// one still enabled
    pub async fn authenticate_all(&mut self) {
        for source in &self.sources {
            if source.authenticate().await {
                info!("[{}] Source ready", source.name());
            } else {
                warn!("[{}] Source unavailable", source.name());
            }
        }
        self.promote();
    }

    /// Run between cycles. Returns the name of the source for this cycle.
    pub fn begin_cycle(&mut self) -> Option<&str> {
        let previous = self.active_name().map(str::to_string);
        if self.promote() {
            match (previous, self.active_name()) {
                (Some(from), Some(to)) => info!("Data source {} disabled, switching to {}", from, to),
                (Some(from), None) => warn!("Data source {} disabled, no fallback left", from),
                _ => {}
            }
        }
        if self.is_exhausted() {
            error!("CRITICAL: all data sources are disabled, no market data this cycle");
        }
        self.active_name()
    }

    /// One batch from the active source. Errors and timeouts yield an
    /// empty batch.
    pub async fn fetch(&self, symbols: &[Symbol]) -> QuoteBatch {
        let Some(source) = self.sources.get(self.active) else {
            return QuoteBatch::new();
        };
        match timeout(self.fetch_timeout, source.get_quote_batch(symbols)).await {
            Ok(Ok(batch)) => batch,
            Ok(Err(e)) => {
                warn!("[{}] Batch fetch failed: {}", source.name(), e);
                QuoteBatch::new()
            }
            Err(_) => {
                warn!(
                    "[{}] Batch fetch timed out after {:?}",
                    source.name(),
                    self.fetch_timeout
                );
                QuoteBatch::new()
            }
        }
    }

    /// Fetch a whole watchlist in chunks with a pause between chunks.
    ///
    /// `budget` bounds the whole call. Each chunk gets whatever is left of
    /// it, and chunks already priced are kept when a later one runs out.
    pub async fn fetch_chunked(
        &self,
        symbols: &[Symbol],
        chunk_size: usize,
        chunk_delay: Duration,
        budget: Duration,
    ) -> QuoteBatch {
        let deadline = Instant::now() + budget;
        let mut all = QuoteBatch::new();
        let chunks: Vec<&[Symbol]> = symbols.chunks(chunk_size.max(1)).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 && !chunk_delay.is_zero() {
                sleep(chunk_delay).await;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    "Fetch budget {:?} spent, {} of {} chunks unpriced this cycle",
                    budget,
                    chunks.len() - i,
                    chunks.len()
                );
                break;
            }
            match timeout(remaining, self.fetch(chunk)).await {
                Ok(batch) => all.extend(batch),
                Err(_) => {
                    warn!(
                        "Fetch budget {:?} spent mid-chunk, keeping {} priced symbols",
                        budget,
                        all.len()
                    );
                    break;
                }
            }
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_credentials_are_skipped() {
        let mut config = FeedConfig::default();
        config.kite.api_key = "your_api_key".into();
        config.kite.access_token = "your_access_token".into();
        config.dhan.client_id = String::new();
        config.yahoo.enabled = false;
        let router = FeedRouter::from_config(&config);
        assert!(router.source_names().is_empty());
        assert!(router.is_exhausted());
    }

    #[test]
    fn test_yahoo_only_by_default() {
        let router = FeedRouter::from_config(&FeedConfig::default());
        assert_eq!(router.source_names(), vec!["yahoo"]);
        assert_eq!(router.active_name(), Some("yahoo"));
    }
}
