//! Mean Reversion Strategy Configuration

use serde::{Deserialize, Serialize};

/// Counter-trend entry and exit parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanReversionConfig {
    // === Entry Filters ===
    /// Wick must exceed this fraction of the candle body (default: 0.3)
    pub wick_body_ratio: f64,
    /// Current volume must be at least this fraction of prior volume (default: 0.7)
    pub volume_ratio: f64,

    // === Targets ===
    /// Base range multiple in the target distance (default: 1.0)
    pub target_vol_mult: f64,
    /// Trend shift multiple in the target distance (default: 0.4)
    pub target_trend_mult: f64,
    /// Stop buffer beyond the bar extreme as a fraction of close (default: 0.001)
    pub stop_buffer_pct: f64,

    // === Trend Shift ===
    /// Per-instrument trend shift as a fraction of close (default: 0.001)
    pub trend_shift_pct: f64,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        MeanReversionConfig {
            wick_body_ratio: 0.3,
            volume_ratio: 0.7,

            target_vol_mult: 1.0,
            target_trend_mult: 0.4,
            stop_buffer_pct: 0.001,

            trend_shift_pct: 0.001,
        }
    }
}
