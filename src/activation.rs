//! Activation latches and running extremes
//!
//! The gate decides whether an asset is tradable at all: nothing happens
//! until price crosses the migration threshold, and once a migrated asset
//! collapses below the dead threshold it is flagged for an emergency exit.
//! Both flags are one-way.
//!
//! The extreme tracker keeps the all-time-high, re-baselined only on
//! material new highs (`close > ath * update_threshold_ratio`).

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EngineError, EngineResult};

/// Latch state for one asset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivationState {
    pub migrated: bool,
    pub dead: bool,
    pub migration_threshold: f64,
    pub dead_threshold: f64,
}

/// Transition reported by [`ActivationGate::observe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    Migrated,
    Died,
}

#[derive(Debug, Clone)]
pub struct ActivationGate {
    state: ActivationState,
}

impl ActivationGate {
    pub fn new(migration_threshold: f64, dead_threshold: f64) -> EngineResult<Self> {
        if !(migration_threshold.is_finite() && migration_threshold > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "migration_threshold must be > 0, got {migration_threshold}"
            )));
        }
        if !(dead_threshold.is_finite() && dead_threshold > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "dead_threshold must be > 0, got {dead_threshold}"
            )));
        }
        if dead_threshold >= migration_threshold {
            return Err(EngineError::InvalidConfig(format!(
                "dead_threshold ({dead_threshold}) must be below migration_threshold ({migration_threshold})"
            )));
        }

        Ok(Self {
            state: ActivationState {
                migrated: false,
                dead: false,
                migration_threshold,
                dead_threshold,
            },
        })
    }

    /// Feed one normalized price. Returns the transition it caused, if any.
    pub fn observe(&mut self, normalized_price: f64) -> Option<GateEvent> {
        if !self.state.migrated {
            if normalized_price > self.state.migration_threshold {
                self.state.migrated = true;
                info!(
                    price = normalized_price,
                    threshold = self.state.migration_threshold,
                    "Migration threshold crossed"
                );
                return Some(GateEvent::Migrated);
            }
            return None;
        }

        if !self.state.dead && normalized_price < self.state.dead_threshold {
            self.state.dead = true;
            info!(
                price = normalized_price,
                threshold = self.state.dead_threshold,
                "Asset declared dead"
            );
            return Some(GateEvent::Died);
        }

        None
    }

    pub fn is_migrated(&self) -> bool {
        self.state.migrated
    }

    pub fn is_dead(&self) -> bool {
        self.state.dead
    }

    pub fn state(&self) -> ActivationState {
        self.state
    }
}

/// All-time-high tracking with a hysteresis ratio
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtremeState {
    pub all_time_high: f64,
    pub update_threshold_ratio: f64,
}

#[derive(Debug, Clone)]
pub struct ExtremeTracker {
    state: ExtremeState,
}

impl ExtremeTracker {
    pub fn new(update_threshold_ratio: f64) -> EngineResult<Self> {
        if !(update_threshold_ratio.is_finite() && update_threshold_ratio > 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "ath update ratio must be > 1, got {update_threshold_ratio}"
            )));
        }
        Ok(Self {
            state: ExtremeState {
                all_time_high: 0.0,
                update_threshold_ratio,
            },
        })
    }

    /// Returns true when the ATH was re-baselined on this bar. Callers own
    /// any level-dependent state (buy targets) and must refresh it then.
    pub fn observe(&mut self, bar_high: f64, bar_close: f64) -> bool {
        let ath = self.state.all_time_high;
        if ath == 0.0 || bar_close > ath * self.state.update_threshold_ratio {
            self.state.all_time_high = ath.max(bar_high);
            info!(all_time_high = self.state.all_time_high, "New ATH");
            return true;
        }
        false
    }

    pub fn all_time_high(&self) -> f64 {
        self.state.all_time_high
    }

    pub fn state(&self) -> ExtremeState {
        self.state
    }
}
