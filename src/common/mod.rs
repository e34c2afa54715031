//! Fault-tolerance utilities shared by every data source and broker client
//!
//! - Circuit breaker with a terminal lockout for rejected credentials
//! - Token bucket rate limiter for request pacing

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
