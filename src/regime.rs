//! Market regime classification
//!
//! A cycle qualifies as a Trend Shift Day (TSD) when the market-wide move
//! exceeds a volatility-scaled threshold. Qualifying cycles grow a counter,
//! others let it decay by one. The counter maps to a regime that decides
//! whether counter-trend entries are allowed at all.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Bar;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegimeError {
    #[error("invalid regime input: {0}")]
    InvalidInput(String),
}

/// Market regime derived from the TSD counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Regime {
    /// Range-bound market, mean reversion fully enabled
    Neutral,
    /// Emerging trend
    Transitional,
    /// Established trend, mean reversion disabled
    Trending,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regime::Neutral => write!(f, "NEUTRAL"),
            Regime::Transitional => write!(f, "TRANSITIONAL"),
            Regime::Trending => write!(f, "TRENDING"),
        }
    }
}

/// Upper TSD bounds for the neutral and transitional regimes (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeThresholds {
    pub neutral_max: u32,
    pub transitional_max: u32,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            neutral_max: 1,
            transitional_max: 3,
        }
    }
}

pub const DEFAULT_THRESHOLD_MULT: f64 = 0.7;

/// Advance the TSD counter by one cycle.
///
/// Qualifying (`|trend_shift| > threshold_mult * base_range`) increments by
/// one; otherwise the counter decays by one, floored at zero.
pub fn update(
    tsd_count: u32,
    trend_shift: f64,
    base_range: f64,
    threshold_mult: f64,
) -> Result<u32, RegimeError> {
    if !trend_shift.is_finite() || !base_range.is_finite() || !threshold_mult.is_finite() {
        return Err(RegimeError::InvalidInput(format!(
            "non-finite input (trend_shift={}, base_range={}, threshold_mult={})",
            trend_shift, base_range, threshold_mult
        )));
    }
    if base_range < 0.0 || threshold_mult < 0.0 {
        return Err(RegimeError::InvalidInput(format!(
            "negative base_range {} or threshold_mult {}",
            base_range, threshold_mult
        )));
    }

    if trend_shift.abs() > threshold_mult * base_range {
        Ok(tsd_count.saturating_add(1))
    } else {
        Ok(tsd_count.saturating_sub(1))
    }
}

/// Convert an externally supplied count, rejecting negatives
pub fn count_from_i64(count: i64) -> Result<u32, RegimeError> {
    u32::try_from(count)
        .map_err(|_| RegimeError::InvalidInput(format!("tsd_count out of range: {}", count)))
}

/// Map a TSD count to its regime with the default thresholds
pub fn classify(tsd_count: u32) -> Regime {
    classify_with(tsd_count, RegimeThresholds::default())
}

pub fn classify_with(tsd_count: u32, thresholds: RegimeThresholds) -> Regime {
    if tsd_count <= thresholds.neutral_max {
        Regime::Neutral
    } else if tsd_count <= thresholds.transitional_max {
        Regime::Transitional
    } else {
        Regime::Trending
    }
}

/// Market-wide statistic for one cycle: average `|close - open|` as the
/// trend shift and average `high - low` as the base range.
///
/// Returns `None` when no bars were fetched this cycle.
pub fn aggregate<'a, I>(bars: I) -> Option<(f64, f64)>
where
    I: IntoIterator<Item = &'a Bar>,
{
    let (mut shift_sum, mut range_sum, mut n) = (0.0, 0.0, 0usize);
    for bar in bars {
        shift_sum += (bar.close - bar.open).abs();
        range_sum += bar.high - bar.low;
        n += 1;
    }
    if n == 0 {
        return None;
    }
    Some((shift_sum / n as f64, range_sum / n as f64))
}

/// Global regime state, advanced once per scheduling cycle
#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    tsd_count: u32,
    threshold_mult: f64,
    thresholds: RegimeThresholds,
}

impl RegimeClassifier {
    pub fn new(threshold_mult: f64, thresholds: RegimeThresholds) -> Self {
        Self {
            tsd_count: 0,
            threshold_mult,
            thresholds,
        }
    }

    pub fn tsd_count(&self) -> u32 {
        self.tsd_count
    }

    pub fn regime(&self) -> Regime {
        classify_with(self.tsd_count, self.thresholds)
    }

    /// Advance with this cycle's aggregate move and range
    pub fn observe(&mut self, trend_shift: f64, base_range: f64) -> Result<Regime, RegimeError> {
        self.tsd_count = update(self.tsd_count, trend_shift, base_range, self.threshold_mult)?;
        Ok(self.regime())
    }

    pub fn reset(&mut self) {
        self.tsd_count = 0;
    }
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_MULT, RegimeThresholds::default())
    }
}
