//! Fibonacci Retrace policy
//!
//! The buy level is `ATH * fibo_level`, refreshed on each ATH update. A
//! close at or below `level * (1 + tolerance)` buys once; with `once` unset
//! the next ATH update re-arms it. The first buy of a cycle is the initial
//! entry, later ones are ladder adds.

use tracing::debug;

use super::config::FiboRetraceConfig;
use crate::error::{EngineError, EngineResult};
use crate::ladder::EntryKind;
use crate::ledger::Position;
use crate::strategies::{EntryContext, EntryPolicy};

pub struct FiboRetracePolicy {
    config: FiboRetraceConfig,
    buy_level: f64,
    bought: bool,
}

impl FiboRetracePolicy {
    pub fn new(config: FiboRetraceConfig) -> EngineResult<Self> {
        if !(config.fibo_level > 0.0 && config.fibo_level < 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "fibo_level must be in (0, 1), got {}",
                config.fibo_level
            )));
        }
        if !(config.tolerance >= 0.0 && config.tolerance.is_finite()) {
            return Err(EngineError::InvalidConfig(format!(
                "tolerance must be >= 0, got {}",
                config.tolerance
            )));
        }
        Ok(Self {
            config,
            buy_level: 0.0,
            bought: false,
        })
    }

    pub fn buy_level(&self) -> f64 {
        self.buy_level
    }

    pub fn is_armed(&self) -> bool {
        self.buy_level > 0.0 && !self.bought
    }
}

impl EntryPolicy for FiboRetracePolicy {
    fn name(&self) -> &'static str {
        super::NAME
    }

    fn on_ath_update(&mut self, all_time_high: f64) {
        self.buy_level = all_time_high * self.config.fibo_level;
        if !self.config.once {
            self.bought = false;
        }
        debug!(level = self.buy_level, armed = self.is_armed(), "Retrace level refreshed");
    }

    fn entry_signal(&self, ctx: &EntryContext<'_>) -> Option<EntryKind> {
        if !self.is_armed() {
            return None;
        }
        let upper = self.buy_level * (1.0 + self.config.tolerance);
        if ctx.price() > upper {
            return None;
        }
        Some(if ctx.ladder.initial_entry_done {
            EntryKind::Martingale
        } else {
            EntryKind::Initial
        })
    }

    fn on_entry_filled(&mut self, _kind: EntryKind, _position: &Position) {
        self.bought = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ladder::LadderState;
    use crate::Candle;
    use chrono::{TimeZone, Utc};

    fn signal(p: &FiboRetracePolicy, close: f64, ladder: LadderState) -> Option<EntryKind> {
        let candle = Candle::new_unchecked(
            Utc.timestamp_opt(0, 0).unwrap(),
            close,
            close,
            close,
            close,
            1.0,
        );
        p.entry_signal(&EntryContext {
            candle: &candle,
            position: &Position::default(),
            ladder,
            all_time_high: 0.0,
        })
    }

    #[test]
    fn test_unarmed_before_ath() {
        let p = FiboRetracePolicy::new(FiboRetraceConfig::default()).unwrap();
        assert_eq!(signal(&p, 0.0001, LadderState::default()), None);
    }

    #[test]
    fn test_touch_with_tolerance() {
        let mut p = FiboRetracePolicy::new(FiboRetraceConfig::default()).unwrap();
        p.on_ath_update(100.0);
        // level 22, upper bound 22.44
        assert_eq!(signal(&p, 22.5, LadderState::default()), None);
        assert_eq!(signal(&p, 22.4, LadderState::default()), Some(EntryKind::Initial));

        let ladder = LadderState {
            initial_entry_done: true,
            ..Default::default()
        };
        assert_eq!(signal(&p, 20.0, ladder), Some(EntryKind::Martingale));
    }

    #[test]
    fn test_once_never_rearms() {
        let mut p = FiboRetracePolicy::new(FiboRetraceConfig::default()).unwrap();
        p.on_ath_update(100.0);
        p.on_entry_filled(EntryKind::Initial, &Position::default());
        p.on_ath_update(200.0);
        assert!(!p.is_armed());
        assert_eq!(p.buy_level(), 44.0);
    }

    #[test]
    fn test_rearms_on_ath_update() {
        let mut p = FiboRetracePolicy::new(FiboRetraceConfig {
            once: false,
            ..Default::default()
        })
        .unwrap();
        p.on_ath_update(100.0);
        p.on_entry_filled(EntryKind::Initial, &Position::default());
        assert!(!p.is_armed());
        p.on_ath_update(200.0);
        assert!(p.is_armed());
    }
}
