//! Counter-Trend Mean Reversion Strategy Module
//!
//! Fades touches of the session resistance/support levels when the bar shows
//! a rejection wick and enough participation relative to the prior bar.
//! Disabled entirely while the market regime is trending.

mod config;
mod strategy;

pub use config::MeanReversionConfig;
pub use strategy::{SignalError, SignalGenerator};
