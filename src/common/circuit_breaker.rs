//! Circuit breaker for one upstream service
//!
//! ```text
//! Closed --(failure_threshold failures in a row)--> Open
//! Open   --(timeout elapsed, next attempt)--------> HalfOpen
//! HalfOpen --(success_threshold successes)--------> Closed
//! HalfOpen --(any failure)------------------------> Open
//! any    --(lock_out)-----------------------------> Locked
//! ```
//!
//! `Locked` is reserved for rejected credentials and is never left: a
//! source whose token was refused stays dark until the process restarts.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
    Locked,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit
    pub failure_threshold: u32,
    /// Successful trial calls needed to close a half-open circuit
    pub success_threshold: u32,
    /// Cool-down before an open circuit lets a trial call through
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    /// Failures while closed, successes while half-open
    streak: u32,
    opened_at: Option<Instant>,
    lock_reason: Option<String>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            streak: 0,
            opened_at: None,
            lock_reason: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    fn enter(&mut self, state: CircuitState) {
        self.state = state;
        self.streak = 0;
        self.opened_at = (state == CircuitState::Open).then(Instant::now);
    }

    /// Whether a call may go out now. Promotes an open circuit to
    /// half-open once the cool-down has passed.
    pub fn can_attempt(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Locked => false,
            CircuitState::Open => {
                let cooled = self
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.config.timeout);
                if cooled {
                    info!("Circuit half-open, trying upstream again");
                    self.enter(CircuitState::HalfOpen);
                }
                cooled
            }
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => self.streak = 0,
            CircuitState::HalfOpen => {
                self.streak += 1;
                if self.streak >= self.config.success_threshold {
                    info!("Circuit closed, upstream recovered");
                    self.enter(CircuitState::Closed);
                }
            }
            CircuitState::Open | CircuitState::Locked => {}
        }
    }

    pub fn record_failure(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.streak += 1;
                if self.streak >= self.config.failure_threshold {
                    warn!(
                        "Circuit open after {} consecutive failures, cooling down {:?}",
                        self.streak, self.config.timeout
                    );
                    self.enter(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                warn!("Trial call failed, circuit open again");
                self.enter(CircuitState::Open);
            }
            CircuitState::Open | CircuitState::Locked => {}
        }
    }

    /// Disable the upstream for the rest of the process
    pub fn lock_out(&mut self, reason: impl Into<String>) {
        if self.state != CircuitState::Locked {
            self.enter(CircuitState::Locked);
            self.lock_reason = Some(reason.into());
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state == CircuitState::Locked
    }

    pub fn lock_reason(&self) -> Option<&str> {
        self.lock_reason.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(failures)
                .with_timeout(Duration::from_millis(timeout_ms)),
        )
    }

    #[test]
    fn test_consecutive_failures_open() {
        let mut cb = breaker(2, 60_000);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert!(cb.is_open());
        assert!(!cb.can_attempt());
    }

    #[test]
    fn test_success_breaks_the_streak() {
        let mut cb = breaker(3, 60_000);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_cool_down() {
        let mut cb = breaker(1, 1);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.can_attempt());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_failure();
        assert!(cb.is_open());

        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.can_attempt());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_lockout_is_terminal() {
        let mut cb = breaker(5, 1);
        cb.lock_out("TokenException");
        std::thread::sleep(Duration::from_millis(5));
        assert!(!cb.can_attempt());
        cb.record_success();
        cb.record_failure();
        cb.lock_out("again");
        assert!(cb.is_locked());
        assert_eq!(cb.lock_reason(), Some("TokenException"));
    }
}
