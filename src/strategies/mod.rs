//! Entry policies
//!
//! A policy decides *when* to enter: the initial buy of a cycle and each
//! averaging add. It never sizes orders and never decides exits; sizing
//! belongs to the ladder and exits to the risk evaluator. The only exit
//! customization a policy supplies is its take-profit factor.
//!
//! Policies are created by name through a registry so new ones can be
//! plugged in without touching the engine.

pub mod fibo_martingale;
pub mod fibo_retrace;
pub mod simple_martingale;

use crate::error::EngineError;
use crate::ladder::{EntryKind, LadderState};
use crate::ledger::Position;
use crate::risk::{FixedTakeProfit, TakeProfitFactor};
use crate::{Candle, Config};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

/// Read-only view handed to [`EntryPolicy::entry_signal`]
#[derive(Debug, Clone, Copy)]
pub struct EntryContext<'a> {
    pub candle: &'a Candle,
    pub position: &'a Position,
    pub ladder: LadderState,
    pub all_time_high: f64,
}

impl EntryContext<'_> {
    pub fn price(&self) -> f64 {
        self.candle.close
    }
}

pub trait EntryPolicy: Send + Sync {
    /// Registry name
    fn name(&self) -> &'static str;

    /// Called on every bar before any decision, to keep indicators current
    fn observe(&mut self, _candle: &Candle) {}

    /// The all-time-high was re-baselined; refresh level-dependent targets
    fn on_ath_update(&mut self, _all_time_high: f64) {}

    /// Entry wanted on this bar, if any
    fn entry_signal(&self, ctx: &EntryContext<'_>) -> Option<EntryKind>;

    /// A buy issued for `kind` was filled; `position` is already updated
    fn on_entry_filled(&mut self, _kind: EntryKind, _position: &Position) {}

    /// The signal for `kind` could not be sized (short cash, ladder full)
    fn on_entry_skipped(&mut self, _kind: EntryKind, _reason: &EngineError) {}

    /// The position was fully liquidated
    fn reset_cycle(&mut self) {}

    fn take_profit_factor(&self) -> Box<dyn TakeProfitFactor> {
        Box::new(FixedTakeProfit)
    }
}

/// Factory function type for creating policies from config
pub type PolicyFactory = fn(&Config) -> Result<Box<dyn EntryPolicy>>;

static REGISTRY: OnceLock<RwLock<HashMap<&'static str, PolicyFactory>>> = OnceLock::new();

fn get_registry() -> &'static RwLock<HashMap<&'static str, PolicyFactory>> {
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        map.insert(
            simple_martingale::NAME,
            simple_martingale::create as PolicyFactory,
        );
        map.insert(fibo_martingale::NAME, fibo_martingale::create as PolicyFactory);
        map.insert(fibo_retrace::NAME, fibo_retrace::create as PolicyFactory);
        RwLock::new(map)
    })
}

/// Create the policy named in `config.strategy.name`
pub fn create_policy(config: &Config) -> Result<Box<dyn EntryPolicy>> {
    let registry = get_registry()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let name = config.strategy_name();
    let factory = registry.get(name.as_str()).ok_or_else(|| {
        let mut available: Vec<_> = registry.keys().copied().collect();
        available.sort_unstable();
        anyhow::anyhow!(
            "Unknown strategy: '{}'. Available: {}",
            name,
            available.join(", ")
        )
    })?;

    factory(config)
}

/// Registered policy names, sorted
pub fn available_policies() -> Vec<&'static str> {
    let mut names: Vec<_> = get_registry()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .keys()
        .copied()
        .collect();
    names.sort_unstable();
    names
}

/// Register a new policy (for plugins or testing)
pub fn register_policy(name: &'static str, factory: PolicyFactory) {
    get_registry()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(name, factory);
}
