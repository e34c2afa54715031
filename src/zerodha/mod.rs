//! Zerodha Kite Connect integration
//!
//! Transport only: request signing, envelope decoding and error
//! classification. Fault tolerance (breakers, rate limits, auth lockout)
//! is layered on by the feed and broker wrappers.

pub mod auth;
pub mod client;
pub mod error;
pub mod types;

pub use auth::{generate_checksum, Credentials};
pub use client::{ClientConfig, ZerodhaClient};
pub use error::{ZerodhaError, ZerodhaResult};
pub use types::*;

pub const API_BASE_URL: &str = "https://api.kite.trade";

/// Kite caps `/quote` at 500 instruments per request
pub const MAX_QUOTE_INSTRUMENTS: usize = 500;

/// Kite instrument key for an NSE equity (`NSE:RELIANCE`)
pub fn nse_instrument(symbol: &str) -> String {
    format!("NSE:{}", symbol)
}
