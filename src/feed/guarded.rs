//! Fault-tolerant wrapper that turns a raw `QuoteApi` into a `DataFeed`

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::{DataFeed, FeedError, QuoteApi, QuoteBatch};
use crate::common::{CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig};
use crate::Symbol;

pub struct GuardedSource<A> {
    api: A,
    breaker: Mutex<CircuitBreaker>,
    rate_limiter: RateLimiter,
}

impl<A: QuoteApi> GuardedSource<A> {
    pub fn new(api: A, breaker: CircuitBreakerConfig, rate_limiter: RateLimiterConfig) -> Self {
        Self {
            api,
            breaker: Mutex::new(CircuitBreaker::new(breaker)),
            rate_limiter: RateLimiter::new(rate_limiter),
        }
    }

    pub fn with_defaults(api: A) -> Self {
        Self::new(
            api,
            CircuitBreakerConfig::default(),
            RateLimiterConfig::default(),
        )
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    fn with_breaker<R>(&self, f: impl FnOnce(&mut CircuitBreaker) -> R) -> R {
        let mut guard = self.breaker.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    fn lock_out(&self, reason: &str) {
        error!(
            "[{}] Authentication rejected, disabling source for this session: {}",
            self.api.name(),
            reason
        );
        self.with_breaker(|cb| cb.lock_out(reason));
    }
}

#[async_trait]
impl<A: QuoteApi> DataFeed for GuardedSource<A> {
    fn name(&self) -> &str {
        self.api.name()
    }

    async fn authenticate(&self) -> bool {
        if self.is_disabled() {
            return false;
        }
        match self.api.verify().await {
            Ok(()) => true,
            Err(FeedError::AuthRejected(reason)) => {
                self.lock_out(&reason);
                false
            }
            Err(e) => {
                // Transient; the source stays eligible
                warn!("[{}] Verification failed: {}", self.api.name(), e);
                true
            }
        }
    }

    async fn get_quote_batch(&self, symbols: &[Symbol]) -> Result<QuoteBatch, FeedError> {
        if self.is_disabled() || symbols.is_empty() {
            return Ok(QuoteBatch::new());
        }
        if !self.with_breaker(|cb| cb.can_attempt()) {
            return Err(FeedError::CircuitOpen(self.api.name().to_string()));
        }

        if !self.api.paces_requests() {
            self.rate_limiter.acquire().await;
        }

        match self.api.fetch(symbols).await {
            Ok(batch) => {
                self.with_breaker(|cb| cb.record_success());
                debug!(
                    "[{}] {} of {} symbols priced",
                    self.api.name(),
                    batch.len(),
                    symbols.len()
                );
                Ok(batch)
            }
            Err(FeedError::AuthRejected(reason)) => {
                self.lock_out(&reason);
                Err(FeedError::AuthRejected(reason))
            }
            Err(e) => {
                self.with_breaker(|cb| cb.record_failure());
                Err(e)
            }
        }
    }

    fn is_disabled(&self) -> bool {
        self.with_breaker(|cb| cb.is_locked())
    }
}

/// Breaker settings shared by every configured source
pub(crate) fn breaker_config(failure_threshold: u32, timeout_secs: u64) -> CircuitBreakerConfig {
    CircuitBreakerConfig::default()
        .with_failure_threshold(failure_threshold.max(1))
        .with_timeout(Duration::from_secs(timeout_secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bar;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyApi {
        calls: AtomicUsize,
        reject_auth: bool,
    }

    #[async_trait]
    impl QuoteApi for FlakyApi {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn fetch(&self, symbols: &[Symbol]) -> Result<QuoteBatch, FeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reject_auth {
                return Err(FeedError::AuthRejected("token expired".into()));
            }
            Err(FeedError::Network(format!("{} symbols dropped", symbols.len())))
        }
    }

    fn symbols() -> Vec<Symbol> {
        vec![Symbol::new("INFY")]
    }

    #[tokio::test]
    async fn test_auth_rejection_disables_without_further_calls() {
        let source = GuardedSource::with_defaults(FlakyApi {
            calls: AtomicUsize::new(0),
            reject_auth: true,
        });

        assert!(matches!(
            source.get_quote_batch(&symbols()).await,
            Err(FeedError::AuthRejected(_))
        ));
        assert!(source.is_disabled());

        for _ in 0..3 {
            assert!(source.get_quote_batch(&symbols()).await.unwrap().is_empty());
        }
        assert_eq!(source.api().calls.load(Ordering::SeqCst), 1);
        assert!(!source.authenticate().await);
    }

    #[tokio::test]
    async fn test_transient_errors_open_breaker_but_do_not_disable() {
        let source = GuardedSource::new(
            FlakyApi {
                calls: AtomicUsize::new(0),
                reject_auth: false,
            },
            breaker_config(2, 60),
            RateLimiterConfig::default(),
        );

        for _ in 0..2 {
            assert!(matches!(
                source.get_quote_batch(&symbols()).await,
                Err(FeedError::Network(_))
            ));
        }
        assert!(matches!(
            source.get_quote_batch(&symbols()).await,
            Err(FeedError::CircuitOpen(_))
        ));
        assert_eq!(source.api().calls.load(Ordering::SeqCst), 2);
        assert!(!source.is_disabled());
    }

    #[tokio::test]
    async fn test_empty_request_skips_the_api() {
        struct Never;
        #[async_trait]
        impl QuoteApi for Never {
            fn name(&self) -> &str {
                "never"
            }
            async fn fetch(&self, _: &[Symbol]) -> Result<QuoteBatch, FeedError> {
                let mut batch = QuoteBatch::new();
                batch.insert(Symbol::new("X"), Bar::new(1.0, 1.0, 1.0, 1.0, 1.0));
                Ok(batch)
            }
        }
        let source = GuardedSource::with_defaults(Never);
        assert!(source.get_quote_batch(&[]).await.unwrap().is_empty());
    }

    /// Prices from memory after the first call and paces nothing itself
    struct SelfPacedApi {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QuoteApi for SelfPacedApi {
        fn name(&self) -> &str {
            "self-paced"
        }

        fn paces_requests(&self) -> bool {
            true
        }

        async fn fetch(&self, symbols: &[Symbol]) -> Result<QuoteBatch, FeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(symbols
                .iter()
                .map(|s| (s.clone(), Bar::new(5.0, 5.0, 5.0, 5.0, 1.0)))
                .collect())
        }
    }

    #[tokio::test]
    async fn test_self_paced_api_skips_batch_token() {
        // One token a minute: a second batch token would stall the test
        let source = GuardedSource::new(
            SelfPacedApi {
                calls: AtomicUsize::new(0),
            },
            CircuitBreakerConfig::default(),
            RateLimiterConfig::default()
                .with_rate(1)
                .with_refill_interval(Duration::from_secs(60)),
        );

        let batches = async {
            for _ in 0..3 {
                source.get_quote_batch(&symbols()).await.unwrap();
            }
        };
        assert!(tokio::time::timeout(Duration::from_secs(1), batches).await.is_ok());
        assert_eq!(source.api().calls.load(Ordering::SeqCst), 3);
    }
}
