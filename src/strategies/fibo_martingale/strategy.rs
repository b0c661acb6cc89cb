//! Fibonacci Martingale policy
//!
//! ## Entry Logic
//! - Initial: flat and RSI < `rsi_entry`
//! - Add `k`: close <= ATH * `fibo_levels[k]` and the green streak is at
//!   least `green_candle_streak_required`; `k` advances per filled add and
//!   also when the add could not be sized, so an unaffordable level is
//!   passed over instead of firing on every bar below it
//!
//! ## Take Profit
//! `max(1 + tp + rung * step, 1 + min_profit_pct)`

use tracing::debug;

use super::config::FiboMartingaleConfig;
use crate::error::{EngineError, EngineResult};
use crate::indicators::{GreenStreak, RsiTracker};
use crate::ladder::EntryKind;
use crate::ledger::Position;
use crate::risk::{LadderTakeProfit, TakeProfitFactor};
use crate::strategies::{EntryContext, EntryPolicy};
use crate::Candle;

pub struct FiboMartingalePolicy {
    config: FiboMartingaleConfig,
    rsi: RsiTracker,
    streak: GreenStreak,
    level_index: usize,
}

impl FiboMartingalePolicy {
    pub fn new(config: FiboMartingaleConfig) -> EngineResult<Self> {
        if config.fibo_levels.is_empty() {
            return Err(EngineError::InvalidConfig("fibo_levels is empty".into()));
        }
        if let Some(bad) = config
            .fibo_levels
            .iter()
            .find(|l| !(**l > 0.0 && **l < 1.0))
        {
            return Err(EngineError::InvalidConfig(format!(
                "fibo level must be in (0, 1), got {bad}"
            )));
        }
        let rsi = RsiTracker::new(config.rsi_period)?;
        Ok(Self {
            config,
            rsi,
            streak: GreenStreak::new(),
            level_index: 0,
        })
    }

    /// Target price of the next add, if any level is left
    pub fn next_level_price(&self, all_time_high: f64) -> Option<f64> {
        if all_time_high <= 0.0 {
            return None;
        }
        self.config
            .fibo_levels
            .get(self.level_index)
            .map(|level| all_time_high * level)
    }

    pub fn level_index(&self) -> usize {
        self.level_index
    }
}

impl EntryPolicy for FiboMartingalePolicy {
    fn name(&self) -> &'static str {
        super::NAME
    }

    fn observe(&mut self, candle: &Candle) {
        self.rsi.next(candle.close);
        self.streak.next(candle);
    }

    fn entry_signal(&self, ctx: &EntryContext<'_>) -> Option<EntryKind> {
        if !ctx.position.is_open() {
            let rsi = self.rsi.value()?;
            return (rsi < self.config.rsi_entry).then_some(EntryKind::Initial);
        }

        if self.streak.count() < self.config.green_candle_streak_required {
            return None;
        }
        let target = self.next_level_price(ctx.all_time_high)?;
        (ctx.price() <= target).then_some(EntryKind::Martingale)
    }

    fn on_entry_filled(&mut self, kind: EntryKind, _position: &Position) {
        if kind == EntryKind::Martingale {
            self.level_index += 1;
            debug!(level_index = self.level_index, "Fibo level consumed");
        }
    }

    fn on_entry_skipped(&mut self, kind: EntryKind, reason: &EngineError) {
        if kind == EntryKind::Martingale {
            self.level_index += 1;
            debug!(level_index = self.level_index, %reason, "Fibo level passed over");
        }
    }

    fn reset_cycle(&mut self) {
        self.level_index = 0;
    }

    fn take_profit_factor(&self) -> Box<dyn TakeProfitFactor> {
        Box::new(LadderTakeProfit {
            step_per_rung: self.config.tp_step_per_rung,
            min_profit_pct: self.config.min_profit_pct,
        })
    }
}
