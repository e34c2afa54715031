//! Per-symbol TTL cache in front of a quote API
//!
//! Free-tier sources update slowly and throttle aggressively, so a symbol
//! priced within the last `ttl` is served from memory. With jitter enabled
//! the cached close is perturbed by up to ±`jitter` (relative) and the
//! high/low widened to contain it, which keeps downstream signal logic
//! exercised between real refreshes.

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use super::{FeedError, QuoteApi, QuoteBatch};
use crate::{Bar, Symbol};

pub struct CachedQuotes<A> {
    inner: A,
    ttl: Duration,
    jitter: f64,
    entries: Mutex<HashMap<Symbol, (Instant, Bar)>>,
}

impl<A: QuoteApi> CachedQuotes<A> {
    pub fn new(inner: A, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            jitter: 0.0,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Enable relative jitter on cache hits. Negative values disable it.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() { jitter.max(0.0) } else { 0.0 };
        self
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    fn fresh(&self, symbols: &[Symbol]) -> (QuoteBatch, Vec<Symbol>) {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut hits = QuoteBatch::new();
        let mut misses = Vec::new();
        for symbol in symbols {
            match entries.get(symbol) {
                Some((at, bar)) if at.elapsed() < self.ttl => {
                    hits.insert(symbol.clone(), bar.clone());
                }
                _ => misses.push(symbol.clone()),
            }
        }
        (hits, misses)
    }

    fn jittered(&self, bar: Bar) -> Bar {
        if self.jitter == 0.0 {
            return bar;
        }
        let shift = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let close = bar.close * (1.0 + shift);
        Bar {
            high: bar.high.max(close),
            low: bar.low.min(close),
            close,
            ..bar
        }
    }
}

#[async_trait]
impl<A: QuoteApi> QuoteApi for CachedQuotes<A> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn paces_requests(&self) -> bool {
        self.inner.paces_requests()
    }

    async fn verify(&self) -> Result<(), FeedError> {
        self.inner.verify().await
    }

    async fn fetch(&self, symbols: &[Symbol]) -> Result<QuoteBatch, FeedError> {
        let (hits, misses) = self.fresh(symbols);

        let fetched = if misses.is_empty() {
            QuoteBatch::new()
        } else {
            match self.inner.fetch(&misses).await {
                Ok(batch) => batch,
                Err(e @ FeedError::AuthRejected(_)) => return Err(e),
                Err(e) if hits.is_empty() => return Err(e),
                Err(e) => {
                    warn!(
                        "[{}] {} symbols unpriced, serving {} from cache: {}",
                        self.inner.name(),
                        misses.len(),
                        hits.len(),
                        e
                    );
                    QuoteBatch::new()
                }
            }
        };

        let now = Instant::now();
        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            for (symbol, bar) in &fetched {
                entries.insert(symbol.clone(), (now, bar.clone()));
            }
        }

        let mut batch = fetched;
        for (symbol, bar) in hits {
            batch.insert(symbol, self.jittered(bar));
        }
        Ok(batch)
    }
}
