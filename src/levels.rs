//! Session reference levels
//!
//! Support and resistance are derived once per instrument from the first bar
//! seen in the session and then held fixed, even as price moves.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Bar, Levels, Symbol};

/// Volatility scaling for level derivation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    /// Multiplier on the bar's relative range
    pub scale: f64,
    /// Minimum relative distance of support/resistance from price
    pub floor: f64,
    /// Fraction of the level distance used as the base range
    pub base_range_factor: f64,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            scale: 0.3,
            floor: 0.005,
            base_range_factor: 0.5,
        }
    }
}

impl LevelConfig {
    /// Levels implied by a single bar. `bar.close` must be positive.
    pub fn derive(&self, bar: &Bar) -> Levels {
        let close = bar.close;
        let vol_range = self.floor.max((bar.high - bar.low) / close * self.scale);
        Levels {
            resistance: close * (1.0 + vol_range),
            support: close * (1.0 - vol_range),
            base_range: close * vol_range * self.base_range_factor,
        }
    }
}

/// Lazy per-instrument level cache
#[derive(Debug, Clone, Default)]
pub struct LevelEngine {
    config: LevelConfig,
    cache: HashMap<Symbol, Levels>,
}

impl LevelEngine {
    pub fn new(config: LevelConfig) -> Self {
        Self {
            config,
            cache: HashMap::new(),
        }
    }

    /// Levels for `symbol`, computed from `bar` only on first sight
    pub fn levels_for(&mut self, symbol: &Symbol, bar: &Bar) -> Levels {
        let config = self.config;
        *self
            .cache
            .entry(symbol.clone())
            .or_insert_with(|| config.derive(bar))
    }

    pub fn get(&self, symbol: &Symbol) -> Option<Levels> {
        self.cache.get(symbol).copied()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Forget every cached level (new session)
    pub fn reset(&mut self) {
        self.cache.clear();
    }
}
