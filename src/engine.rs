//! Strategy orchestrator
//!
//! One orchestrator drives one asset. Each bar runs, in order:
//!
//! 1. indicator update (always, even while an order is outstanding)
//! 2. activation gate on the normalized close
//! 3. all-time-high tracking, policy notified on re-baseline
//! 4. peak-since-entry tracking
//! 5. exit rules; a fired rule liquidates the whole position
//! 6. entry policy and ladder sizing, unless the asset is dead
//!
//! At most one intent is emitted per bar. Until the execution side reports
//! a fill or a rejection the intent stays pending and later bars make no
//! decisions. Full liquidation resets the ledger, ladder, dynamic
//! take-profit peak and policy cycle state. The all-time-high and both
//! activation latches survive across cycles.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::activation::{ActivationGate, ExtremeTracker, GateEvent};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::ladder::{EntryKind, EntryRequest, LadderConfig, LadderState, SizingLadder};
use crate::ledger::{Position, PositionLedger};
use crate::risk::{ExitContext, ExitRuleConfig, ExitSignal, RiskAction, RiskExitEvaluator};
use crate::strategies::{self, EntryContext, EntryPolicy};
use crate::{Candle, Config, Side, Symbol};

/// Cash source queried before every sizing decision
pub trait CashAccount {
    fn available_cash(&self) -> f64;
}

impl CashAccount for f64 {
    fn available_cash(&self) -> f64 {
        *self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntentReason {
    Entry(EntryKind),
    Exit(ExitSignal),
}

/// Order the engine asks the execution side to place
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderIntent {
    pub side: Side,
    pub quantity: f64,
    pub reason: IntentReason,
}

impl OrderIntent {
    pub fn is_exit(&self) -> bool {
        matches!(self.reason, IntentReason::Exit(_))
    }
}

/// Execution report for the pending intent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub commission: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    InsufficientFunds,
    Margin,
    Canceled,
}

/// Lifecycle view for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnginePhase {
    /// Migration threshold not crossed yet
    Inactive,
    Flat,
    InPosition { rung: u32 },
    /// Exit intent outstanding
    Liquidating,
    /// Dead asset with nothing left to drain
    Dead,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    intent: OrderIntent,
    ladder_before: LadderState,
}

pub struct StrategyOrchestrator {
    symbol: Symbol,
    price_unit_scale: f64,
    gate: ActivationGate,
    extremes: ExtremeTracker,
    ledger: PositionLedger,
    ladder: SizingLadder,
    evaluator: RiskExitEvaluator,
    policy: Box<dyn EntryPolicy>,
    pending: Option<Pending>,
}

impl StrategyOrchestrator {
    pub fn new(
        symbol: Symbol,
        engine: &EngineConfig,
        sizing: LadderConfig,
        exits: ExitRuleConfig,
        policy: Box<dyn EntryPolicy>,
    ) -> EngineResult<Self> {
        engine.validate()?;
        let evaluator = exits.build(policy.take_profit_factor())?;
        Ok(Self {
            symbol,
            price_unit_scale: engine.price_unit_scale,
            gate: ActivationGate::new(engine.migration_threshold, engine.dead_threshold)?,
            extremes: ExtremeTracker::new(engine.ath_update_ratio)?,
            ledger: PositionLedger::new(),
            ladder: SizingLadder::new(sizing)?,
            evaluator,
            policy,
            pending: None,
        })
    }

    /// Build an orchestrator with the policy named in the config
    pub fn from_config(symbol: Symbol, config: &Config) -> Result<Self> {
        let policy = strategies::create_policy(config)?;
        Ok(Self::new(
            symbol,
            &config.engine,
            config.sizing,
            config.exits,
            policy,
        )?)
    }

    /// Process one bar. Returns at most one intent.
    pub fn on_bar(
        &mut self,
        candle: &Candle,
        account: &dyn CashAccount,
    ) -> EngineResult<Option<OrderIntent>> {
        self.policy.observe(candle);

        if self.pending.is_some() {
            debug!(symbol = %self.symbol, "Order outstanding, bar skipped");
            return Ok(None);
        }

        let close = candle.close;
        if !(close.is_finite() && close > 0.0) {
            warn!(symbol = %self.symbol, close, "Degenerate close, bar skipped");
            return Ok(None);
        }

        match self.gate.observe(close * self.price_unit_scale) {
            Some(GateEvent::Migrated) => {
                info!(symbol = %self.symbol, time = %candle.datetime, "Asset migrated, trading enabled")
            }
            Some(GateEvent::Died) => {
                info!(symbol = %self.symbol, time = %candle.datetime, "Asset dead, entries disabled")
            }
            None => {}
        }
        if !self.gate.is_migrated() {
            return Ok(None);
        }

        if self.extremes.observe(candle.high, close) {
            self.policy.on_ath_update(self.extremes.all_time_high());
        }
        self.ledger.observe_price(close);

        let exit_ctx = ExitContext {
            position: self.ledger.position(),
            rung_index: self.ladder.rung_index(),
            dead: self.gate.is_dead(),
        };
        if let RiskAction::Liquidate(signal) = self.evaluator.evaluate(close, exit_ctx) {
            let intent = OrderIntent {
                side: Side::Sell,
                quantity: self.ledger.position().total_quantity,
                reason: IntentReason::Exit(signal),
            };
            return Ok(Some(self.issue(intent)));
        }

        if self.gate.is_dead() {
            return Ok(None);
        }

        let entry_ctx = EntryContext {
            candle,
            position: self.ledger.position(),
            ladder: self.ladder.state(),
            all_time_high: self.extremes.all_time_high(),
        };
        let Some(kind) = self.policy.entry_signal(&entry_ctx) else {
            return Ok(None);
        };

        let ladder_before = self.ladder.state();
        let cash = account.available_cash();
        match self
            .ladder
            .size_for_entry(EntryRequest { kind }, cash, close)
        {
            Ok(quantity) => {
                let intent = OrderIntent {
                    side: Side::Buy,
                    quantity,
                    reason: IntentReason::Entry(kind),
                };
                self.pending = Some(Pending {
                    intent,
                    ladder_before,
                });
                info!(
                    symbol = %self.symbol,
                    kind = ?kind,
                    quantity,
                    price = close,
                    rung = self.ladder.rung_index(),
                    "Entry intent"
                );
                Ok(Some(intent))
            }
            Err(e) if e.is_recoverable() => {
                warn!(symbol = %self.symbol, kind = ?kind, cash, error = %e, "Entry skipped");
                self.policy.on_entry_skipped(kind, &e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn issue(&mut self, intent: OrderIntent) -> OrderIntent {
        self.pending = Some(Pending {
            intent,
            ladder_before: self.ladder.state(),
        });
        if let IntentReason::Exit(signal) = intent.reason {
            info!(
                symbol = %self.symbol,
                rule = %signal.kind,
                quantity = intent.quantity,
                price = signal.price,
                "Liquidation intent"
            );
        }
        intent
    }

    /// Apply the execution report for the pending intent. The intent stays
    /// pending when the fill is rejected by the ledger.
    pub fn on_fill(&mut self, fill: &Fill) -> EngineResult<()> {
        let pending = self.pending.ok_or_else(|| {
            EngineError::ExecutionDesync(format!(
                "{} fill with no pending intent for {}",
                side_name(fill.side),
                self.symbol
            ))
        })?;
        if pending.intent.side != fill.side {
            return Err(EngineError::ExecutionDesync(format!(
                "{} fill does not match pending {} intent for {}",
                side_name(fill.side),
                side_name(pending.intent.side),
                self.symbol
            )));
        }

        self.ledger.apply_fill(fill.side, fill.price, fill.quantity)?;
        self.pending = None;

        match pending.intent.reason {
            IntentReason::Entry(kind) => {
                self.policy.on_entry_filled(kind, self.ledger.position());
                debug!(
                    symbol = %self.symbol,
                    price = fill.price,
                    quantity = fill.quantity,
                    avg_entry = self.ledger.position().average_entry_price,
                    "Buy filled"
                );
            }
            IntentReason::Exit(signal) => {
                if self.ledger.is_flat() {
                    self.ladder.reset();
                    self.evaluator.reset();
                    self.policy.reset_cycle();
                    info!(
                        symbol = %self.symbol,
                        rule = %signal.kind,
                        price = fill.price,
                        "Position closed, cycle reset"
                    );
                }
            }
        }
        Ok(())
    }

    /// The pending intent was not executed. A rejected entry puts the
    /// ladder back to where it was before sizing.
    pub fn on_rejection(&mut self, rejection: Rejection) -> EngineResult<()> {
        let pending = self.pending.take().ok_or_else(|| {
            EngineError::ExecutionDesync(format!(
                "{rejection:?} rejection with no pending intent for {}",
                self.symbol
            ))
        })?;
        if let IntentReason::Entry(_) = pending.intent.reason {
            self.ladder.restore(pending.ladder_before);
        }
        warn!(
            symbol = %self.symbol,
            reason = ?rejection,
            intent = ?pending.intent.reason,
            "Order rejected"
        );
        Ok(())
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn position(&self) -> &Position {
        self.ledger.position()
    }

    pub fn rung_index(&self) -> u32 {
        self.ladder.rung_index()
    }

    pub fn ladder_state(&self) -> LadderState {
        self.ladder.state()
    }

    pub fn average_entry_price(&self) -> f64 {
        self.ledger.position().average_entry_price
    }

    pub fn all_time_high(&self) -> f64 {
        self.extremes.all_time_high()
    }

    pub fn dynamic_peak(&self) -> f64 {
        self.evaluator.dynamic_peak()
    }

    pub fn is_migrated(&self) -> bool {
        self.gate.is_migrated()
    }

    pub fn is_dead(&self) -> bool {
        self.gate.is_dead()
    }

    pub fn pending_intent(&self) -> Option<OrderIntent> {
        self.pending.map(|p| p.intent)
    }

    pub fn phase(&self) -> EnginePhase {
        if !self.gate.is_migrated() {
            return EnginePhase::Inactive;
        }
        if matches!(self.pending_intent(), Some(i) if i.is_exit()) {
            return EnginePhase::Liquidating;
        }
        let pos = self.ledger.position();
        match (pos.is_open(), self.gate.is_dead()) {
            (true, _) => EnginePhase::InPosition {
                rung: self.ladder.rung_index(),
            },
            (false, true) => EnginePhase::Dead,
            (false, false) => EnginePhase::Flat,
        }
    }
}

fn side_name(side: Side) -> &'static str {
    match side {
        Side::Buy => "buy",
        Side::Sell => "sell",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ladder::InitialSizing;
    use crate::risk::ExitKind;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Buys the initial entry whenever flat, adds whenever price is below
    /// the average entry
    struct DipBuyer;

    impl EntryPolicy for DipBuyer {
        fn name(&self) -> &'static str {
            "dip_buyer"
        }

        fn entry_signal(&self, ctx: &EntryContext<'_>) -> Option<EntryKind> {
            if !ctx.position.is_open() {
                Some(EntryKind::Initial)
            } else if ctx.price() < ctx.position.average_entry_price {
                Some(EntryKind::Martingale)
            } else {
                None
            }
        }
    }

    fn engine_config() -> EngineConfig {
        EngineConfig {
            migration_threshold: 100.0,
            dead_threshold: 10.0,
            price_unit_scale: 1.0,
            ath_update_ratio: 1.05,
        }
    }

    fn orchestrator(exits: ExitRuleConfig) -> StrategyOrchestrator {
        StrategyOrchestrator::new(
            Symbol::new("TEST"),
            &engine_config(),
            LadderConfig {
                initial: InitialSizing::Fixed(1000.0),
                multiplier: 2.0,
                max_rungs: None,
            },
            exits,
            Box::new(DipBuyer),
        )
        .unwrap()
    }

    fn bar(i: i64, close: f64) -> Candle {
        Candle::new_unchecked(
            Utc.timestamp_opt(0, 0).unwrap() + Duration::minutes(i),
            close,
            close,
            close,
            close,
            1.0,
        )
    }

    fn fill_for(intent: &OrderIntent, price: f64) -> Fill {
        Fill {
            side: intent.side,
            price,
            quantity: intent.quantity,
            commission: 0.0,
            timestamp: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[test]
    fn test_inactive_until_migration() {
        let mut o = orchestrator(ExitRuleConfig::disabled());
        assert_eq!(o.on_bar(&bar(0, 50.0), &1e6).unwrap(), None);
        assert_eq!(o.phase(), EnginePhase::Inactive);
        assert_eq!(o.all_time_high(), 0.0);

        let intent = o.on_bar(&bar(1, 120.0), &1e6).unwrap().unwrap();
        assert_eq!(intent.side, Side::Buy);
        assert_eq!(intent.reason, IntentReason::Entry(EntryKind::Initial));
        assert_eq!(intent.quantity, 8.0);
        assert_eq!(o.all_time_high(), 120.0);
    }

    #[test]
    fn test_pending_suppresses_decisions() {
        let mut o = orchestrator(ExitRuleConfig::disabled());
        let intent = o.on_bar(&bar(0, 125.0), &1e6).unwrap().unwrap();
        assert_eq!(o.on_bar(&bar(1, 110.0), &1e6).unwrap(), None);

        o.on_fill(&fill_for(&intent, 125.0)).unwrap();
        assert_eq!(o.phase(), EnginePhase::InPosition { rung: 0 });

        let add = o.on_bar(&bar(2, 110.0), &1e6).unwrap().unwrap();
        assert_eq!(add.reason, IntentReason::Entry(EntryKind::Martingale));
        // rung 1 spends 2000 at 110
        assert_eq!(add.quantity, 18.0);
    }

    #[test]
    fn test_unmatched_fill_is_desync() {
        let mut o = orchestrator(ExitRuleConfig::disabled());
        let stray = Fill {
            side: Side::Buy,
            price: 1.0,
            quantity: 1.0,
            commission: 0.0,
            timestamp: Utc.timestamp_opt(0, 0).unwrap(),
        };
        assert!(matches!(
            o.on_fill(&stray),
            Err(EngineError::ExecutionDesync(_))
        ));

        let intent = o.on_bar(&bar(0, 125.0), &1e6).unwrap().unwrap();
        let wrong_side = Fill {
            side: Side::Sell,
            ..fill_for(&intent, 125.0)
        };
        assert!(matches!(
            o.on_fill(&wrong_side),
            Err(EngineError::ExecutionDesync(_))
        ));
        // still pending after the mismatch
        assert_eq!(o.pending_intent(), Some(intent));
    }

    #[test]
    fn test_degenerate_fill_keeps_intent_pending() {
        let mut o = orchestrator(ExitRuleConfig::disabled());
        let intent = o.on_bar(&bar(0, 125.0), &1e6).unwrap().unwrap();

        let empty = Fill {
            quantity: 0.0,
            ..fill_for(&intent, 125.0)
        };
        assert!(matches!(
            o.on_fill(&empty),
            Err(EngineError::NumericDegenerate(_))
        ));
        assert_eq!(o.pending_intent(), Some(intent));
        assert!(!o.position().is_open());

        // the real report still lands
        o.on_fill(&fill_for(&intent, 125.0)).unwrap();
        assert_eq!(o.pending_intent(), None);
        assert_eq!(o.position().total_quantity, 8.0);
        assert_eq!(o.policy_name(), "dip_buyer");
    }

    #[test]
    fn test_rejection_restores_ladder() {
        let mut o = orchestrator(ExitRuleConfig::disabled());
        let intent = o.on_bar(&bar(0, 125.0), &1e6).unwrap().unwrap();
        o.on_fill(&fill_for(&intent, 125.0)).unwrap();
        let before = o.ladder_state();

        o.on_bar(&bar(1, 110.0), &1e6).unwrap().unwrap();
        assert_eq!(o.rung_index(), 1);
        o.on_rejection(Rejection::InsufficientFunds).unwrap();
        assert_eq!(o.ladder_state(), before);
        assert_eq!(o.pending_intent(), None);
    }

    #[test]
    fn test_insufficient_cash_is_absorbed() {
        let mut o = orchestrator(ExitRuleConfig::disabled());
        assert_eq!(o.on_bar(&bar(0, 125.0), &10.0).unwrap(), None);
        assert!(!o.ladder_state().initial_entry_done);
    }

    /// Always asks for an add and counts the skipped ones
    struct SkipCounter {
        skipped: Arc<AtomicU32>,
    }

    impl EntryPolicy for SkipCounter {
        fn name(&self) -> &'static str {
            "skip_counter"
        }

        fn entry_signal(&self, ctx: &EntryContext<'_>) -> Option<EntryKind> {
            Some(if ctx.position.is_open() {
                EntryKind::Martingale
            } else {
                EntryKind::Initial
            })
        }

        fn on_entry_skipped(&mut self, kind: EntryKind, reason: &EngineError) {
            assert_eq!(kind, EntryKind::Martingale);
            assert!(matches!(reason, EngineError::InsufficientFunds { .. }));
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_policy_told_about_skipped_entry() {
        let skipped = Arc::new(AtomicU32::new(0));
        let mut o = StrategyOrchestrator::new(
            Symbol::new("TEST"),
            &engine_config(),
            LadderConfig {
                initial: InitialSizing::Fixed(1000.0),
                multiplier: 2.0,
                max_rungs: None,
            },
            ExitRuleConfig::disabled(),
            Box::new(SkipCounter {
                skipped: Arc::clone(&skipped),
            }),
        )
        .unwrap();

        let intent = o.on_bar(&bar(0, 125.0), &1500.0).unwrap().unwrap();
        o.on_fill(&fill_for(&intent, 125.0)).unwrap();

        // the 2000 add does not fit in 500 of cash
        assert_eq!(o.on_bar(&bar(1, 110.0), &500.0).unwrap(), None);
        assert_eq!(o.on_bar(&bar(2, 105.0), &500.0).unwrap(), None);
        assert_eq!(skipped.load(Ordering::SeqCst), 2);
        assert_eq!(o.rung_index(), 0);
    }

    #[test]
    fn test_exit_resets_cycle_but_keeps_latches() {
        let mut o = orchestrator(ExitRuleConfig::disabled().with_take_profit(0.10));
        let intent = o.on_bar(&bar(0, 125.0), &1e6).unwrap().unwrap();
        o.on_fill(&fill_for(&intent, 125.0)).unwrap();

        let exit = o.on_bar(&bar(1, 140.0), &1e6).unwrap().unwrap();
        assert_eq!(exit.side, Side::Sell);
        assert_eq!(exit.quantity, 8.0);
        assert_eq!(o.phase(), EnginePhase::Liquidating);
        match exit.reason {
            IntentReason::Exit(signal) => assert_eq!(signal.kind, ExitKind::TakeProfit),
            other => panic!("unexpected reason {other:?}"),
        }

        o.on_fill(&fill_for(&exit, 140.0)).unwrap();
        assert_eq!(*o.position(), Position::default());
        assert_eq!(o.ladder_state(), LadderState::default());
        assert_eq!(o.phase(), EnginePhase::Flat);
        assert!(o.is_migrated());
        assert_eq!(o.all_time_high(), 140.0);
    }

    #[test]
    fn test_dead_asset_drains_and_blocks_entries() {
        let mut o = orchestrator(ExitRuleConfig::disabled().with_emergency_exit(true));
        let intent = o.on_bar(&bar(0, 125.0), &1e6).unwrap().unwrap();
        o.on_fill(&fill_for(&intent, 125.0)).unwrap();

        let exit = o.on_bar(&bar(1, 5.0), &1e6).unwrap().unwrap();
        assert!(o.is_dead());
        match exit.reason {
            IntentReason::Exit(signal) => assert_eq!(signal.kind, ExitKind::EmergencyExit),
            other => panic!("unexpected reason {other:?}"),
        }
        o.on_fill(&fill_for(&exit, 5.0)).unwrap();

        assert_eq!(o.on_bar(&bar(2, 4.0), &1e6).unwrap(), None);
        assert_eq!(o.phase(), EnginePhase::Dead);
    }
}
