//! Zerodha API data structures

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::Bar;

/// Every Kite response is wrapped in `{status, data}` or
/// `{status, message, error_type}`
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub status: String,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
}

/// Full market quote for one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    #[serde(default)]
    pub instrument_token: u64,
    pub last_price: f64,
    #[serde(default)]
    pub volume: f64,
    pub ohlc: Ohlc,
}

/// Day OHLC. `close` is the previous session's close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Quote {
    /// Day bar with the last traded price as close
    pub fn to_bar(&self) -> Bar {
        let high = self.ohlc.high.max(self.last_price);
        let low = self.ohlc.low.min(self.last_price);
        Bar::new(self.ohlc.open, high, low, self.last_price, self.volume)
    }
}

pub type QuoteMap = HashMap<String, Quote>;

#[derive(Debug, Clone, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub exchange: String,
    pub tradingsymbol: String,
    pub quantity: i64,
    pub average_price: f64,
    #[serde(default)]
    pub last_price: f64,
    #[serde(default)]
    pub pnl: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Positions {
    pub net: Vec<Position>,
    #[serde(default)]
    pub day: Vec<Position>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentMargin {
    pub net: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Margins {
    pub equity: SegmentMargin,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
}
