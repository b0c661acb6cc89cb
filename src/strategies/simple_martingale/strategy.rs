//! Simple Martingale policy
//!
//! ## Entry Logic
//! - Initial: flat and RSI < `rsi_entry`
//! - Add: close <= trigger, where trigger = average entry * (1 + drop),
//!   recomputed after every buy fill
//! - At most `max_buys` buys per cycle
//!
//! Exits use the fixed take-profit factor.

use tracing::debug;

use super::config::SimpleMartingaleConfig;
use crate::error::{EngineError, EngineResult};
use crate::indicators::RsiTracker;
use crate::ladder::EntryKind;
use crate::ledger::Position;
use crate::strategies::{EntryContext, EntryPolicy};
use crate::Candle;

pub struct SimpleMartingalePolicy {
    config: SimpleMartingaleConfig,
    rsi: RsiTracker,
    trigger_price: f64,
    buys: u32,
}

impl SimpleMartingalePolicy {
    pub fn new(config: SimpleMartingaleConfig) -> EngineResult<Self> {
        if !(config.martingale_buy_drop > -1.0 && config.martingale_buy_drop < 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "martingale_buy_drop must be in (-1, 0), got {}",
                config.martingale_buy_drop
            )));
        }
        if config.max_buys == 0 {
            return Err(EngineError::InvalidConfig("max_buys must be >= 1".into()));
        }
        let rsi = RsiTracker::new(config.rsi_period)?;
        Ok(Self {
            config,
            rsi,
            trigger_price: 0.0,
            buys: 0,
        })
    }

    /// Price at or below which the next add fires (0 while flat)
    pub fn trigger_price(&self) -> f64 {
        self.trigger_price
    }

    pub fn buys(&self) -> u32 {
        self.buys
    }
}

impl EntryPolicy for SimpleMartingalePolicy {
    fn name(&self) -> &'static str {
        super::NAME
    }

    fn observe(&mut self, candle: &Candle) {
        self.rsi.next(candle.close);
    }

    fn entry_signal(&self, ctx: &EntryContext<'_>) -> Option<EntryKind> {
        if !ctx.position.is_open() {
            let rsi = self.rsi.value()?;
            return (rsi < self.config.rsi_entry).then_some(EntryKind::Initial);
        }

        if self.buys >= self.config.max_buys || self.trigger_price <= 0.0 {
            return None;
        }
        (ctx.price() <= self.trigger_price).then_some(EntryKind::Martingale)
    }

    fn on_entry_filled(&mut self, _kind: EntryKind, position: &Position) {
        self.buys += 1;
        self.trigger_price = position.average_entry_price * (1.0 + self.config.martingale_buy_drop);
        debug!(
            buys = self.buys,
            trigger = self.trigger_price,
            "Next martingale trigger"
        );
    }

    fn reset_cycle(&mut self) {
        self.trigger_price = 0.0;
        self.buys = 0;
    }
}
