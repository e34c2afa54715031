//! Core data types used across the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// NSE trading symbol (e.g. `RELIANCE`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

/// Why a bar was refused
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BarError {
    #[error("non-finite field `{0}`")]
    NonFinite(&'static str),
    #[error("close must be positive, got {0}")]
    NonPositiveClose(f64),
    #[error("high {high} is below low {low}")]
    InvertedRange { high: f64, low: f64 },
    #[error("negative volume {0}")]
    NegativeVolume(f64),
}

/// OHLCV snapshot for one instrument at one sampling instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Previous bar, when the source provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<Box<Bar>>,
}

impl Bar {
    pub fn new(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Bar {
            open,
            high,
            low,
            close,
            volume,
            prior: None,
        }
    }

    pub fn with_prior(mut self, prior: Bar) -> Self {
        self.prior = Some(Box::new(prior.without_prior()));
        self
    }

    /// Copy of this bar with the prior link dropped, so chains never grow
    pub fn without_prior(&self) -> Bar {
        Bar {
            prior: None,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<(), BarError> {
        for (name, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ] {
            if !value.is_finite() {
                return Err(BarError::NonFinite(name));
            }
        }
        if self.close <= 0.0 {
            return Err(BarError::NonPositiveClose(self.close));
        }
        if self.high < self.low {
            return Err(BarError::InvertedRange {
                high: self.high,
                low: self.low,
            });
        }
        if self.volume < 0.0 {
            return Err(BarError::NegativeVolume(self.volume));
        }
        Ok(())
    }

    /// Absolute candle body
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Order type passed to the execution adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// Directional trade proposal, produced and consumed within one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub side: Side,
    pub entry: f64,
    pub target: f64,
    pub stop_loss: f64,
    pub reason: String,
}

/// Per-instrument reference levels, fixed for the session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Levels {
    pub resistance: f64,
    pub support: f64,
    pub base_range: f64,
}

/// Trade that has been sent to the execution adapter and is awaiting exit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTrade {
    pub symbol: Symbol,
    pub side: Side,
    pub entry: f64,
    pub target: f64,
    pub stop_loss: f64,
    pub quantity: u64,
    pub order_id: String,
    pub opened_at: DateTime<Utc>,
}

impl OpenTrade {
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        match self.side {
            Side::Long => (price - self.entry) * self.quantity as f64,
            Side::Short => (self.entry - price) * self.quantity as f64,
        }
    }

    /// Exit reason if `price` has crossed the target or the stop
    pub fn exit_reason(&self, price: f64) -> Option<&'static str> {
        match self.side {
            Side::Long if price >= self.target => Some("Target"),
            Side::Long if price <= self.stop_loss => Some("Stop Loss"),
            Side::Short if price <= self.target => Some("Target"),
            Side::Short if price >= self.stop_loss => Some("Stop Loss"),
            _ => None,
        }
    }
}

/// Plan line shown on the dashboard for each watched symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTrade {
    pub symbol: Symbol,
    pub side: Side,
    pub current: f64,
    pub entry: f64,
    pub target: f64,
    pub stop: f64,
}

/// Position as reported by an execution adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub symbol: Symbol,
    /// Signed net quantity: positive long, negative short
    pub quantity: i64,
    pub average_price: f64,
}
