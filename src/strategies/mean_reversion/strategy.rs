//! Mean Reversion Signal Generator
//!
//! ## Strategy Logic
//!
//! ### Short (fade resistance)
//! 1. Close at or above session resistance
//! 2. Upper wick longer than `wick_body_ratio` × body (rejection candle)
//! 3. Volume at least `volume_ratio` × prior bar volume
//!
//! Target = resistance − (vol_mult × base_range + trend_mult × |trend_shift|),
//! stop = high + buffer.
//!
//! ### Long (fade support)
//! Mirror image around support using the lower wick.
//!
//! The short side is evaluated first; when both would fire the short wins.

use thiserror::Error;

use super::config::MeanReversionConfig;
use crate::regime::Regime;
use crate::types::BarError;
use crate::{Bar, Side, Signal};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error("malformed bar: {0}")]
    MalformedBar(#[from] BarError),
    #[error("invalid levels: resistance={resistance}, support={support}, base_range={base_range}")]
    InvalidLevels {
        resistance: f64,
        support: f64,
        base_range: f64,
    },
}

/// Counter-trend signal generator
#[derive(Debug, Clone, Default)]
pub struct SignalGenerator {
    config: MeanReversionConfig,
}

impl SignalGenerator {
    pub fn new(config: MeanReversionConfig) -> Self {
        SignalGenerator { config }
    }

    pub fn config(&self) -> &MeanReversionConfig {
        &self.config
    }

    /// Trend shift magnitude used for a bar's target distance
    pub fn trend_shift_for(&self, bar: &Bar) -> f64 {
        bar.close * self.config.trend_shift_pct
    }

    fn is_rejection_candle(&self, bar: &Bar, side: Side) -> bool {
        let threshold = self.config.wick_body_ratio * bar.body();
        match side {
            Side::Short => bar.upper_wick() > threshold,
            Side::Long => bar.lower_wick() > threshold,
        }
    }

    fn passes_volume_filter(&self, bar: &Bar, prior: &Bar) -> bool {
        bar.volume >= prior.volume * self.config.volume_ratio
    }

    fn target_distance(&self, base_range: f64, trend_shift: f64) -> f64 {
        self.config.target_vol_mult * base_range + self.config.target_trend_mult * trend_shift.abs()
    }

    /// Evaluate one bar against the session levels.
    ///
    /// A trending regime short-circuits to `Ok(None)` before any input is
    /// validated. Otherwise malformed bars or levels are errors and
    /// `Ok(None)` means no setup.
    #[allow(clippy::too_many_arguments)]
    pub fn generate(
        &self,
        bar: &Bar,
        prior: &Bar,
        resistance: f64,
        support: f64,
        regime: Regime,
        base_range: f64,
        trend_shift: f64,
    ) -> Result<Option<Signal>, SignalError> {
        if regime == Regime::Trending {
            return Ok(None);
        }

        bar.validate()?;
        prior.validate()?;
        if !resistance.is_finite() || !support.is_finite() || !base_range.is_finite() {
            return Err(SignalError::InvalidLevels {
                resistance,
                support,
                base_range,
            });
        }

        let close = bar.close;
        let distance = self.target_distance(base_range, trend_shift);

        if close >= resistance
            && self.is_rejection_candle(bar, Side::Short)
            && self.passes_volume_filter(bar, prior)
        {
            return Ok(Some(Signal {
                side: Side::Short,
                entry: close,
                target: resistance - distance,
                stop_loss: bar.high + self.config.stop_buffer_pct * close,
                reason: "Resistance Rejection".to_string(),
            }));
        }

        if close <= support
            && self.is_rejection_candle(bar, Side::Long)
            && self.passes_volume_filter(bar, prior)
        {
            return Ok(Some(Signal {
                side: Side::Long,
                entry: close,
                target: support + distance,
                stop_loss: bar.low - self.config.stop_buffer_pct * close,
                reason: "Support Rejection".to_string(),
            }));
        }

        Ok(None)
    }
}
