//! Trading strategies
//!
//! The engine runs a single counter-trend strategy. Strategies are pure: they
//! see a bar plus the session context and return a proposal, never touching
//! broker or engine state.

pub mod mean_reversion;

pub use mean_reversion::{MeanReversionConfig, SignalError, SignalGenerator};
