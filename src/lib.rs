//! NSE Mean Reversion Engine
//!
//! An intraday decision engine for NSE equities: session support/resistance
//! levels, a trend-strength regime filter, rejection-candle signals, a
//! transaction-cost gate and a session risk breaker, fed by market data
//! sources that fail over to one another.

pub mod broker;
pub mod common;
pub mod config;
pub mod costs;
pub mod dashboard;
pub mod engine;
pub mod feed;
pub mod levels;
pub mod oracle;
pub mod regime;
pub mod risk;
pub mod screener;
pub mod session;
pub mod strategies;
pub mod types;
pub mod zerodha;

pub use config::Config;
pub use engine::{Engine, EngineHandle, EnginePhase};
pub use types::*;
