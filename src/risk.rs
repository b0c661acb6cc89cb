//! Risk-exit evaluation
//!
//! Every bar with an open position runs the exit rules in a fixed priority:
//!
//! ```text
//! STOP_LOSS > EMERGENCY_EXIT > TRAILING_STOP_LOSS > TRAILING_TAKE_PROFIT
//!           > DYNAMIC_TAKE_PROFIT > TAKE_PROFIT
//! ```
//!
//! The first rule that fires wins and the rest are not looked at for that
//! bar. Any fired rule means "liquidate the whole position"; the evaluator
//! never places orders itself.
//!
//! Rule parameters live in one typed [`ExitRuleConfig`], validated when the
//! evaluator is built. The only per-strategy customization is the take-profit
//! factor, supplied as a [`TakeProfitFactor`] object or closure.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::ledger::Position;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitRule {
    pub enabled: bool,
    /// Target above the average entry price, e.g. 0.05 = +5%
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopLossRule {
    pub enabled: bool,
    /// Drop below the average entry price, e.g. 0.5 = -50%
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmergencyExitRule {
    pub enabled: bool,
}

/// Trailing rule armed once unrealized pnl reaches `activation_pct`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingRule {
    pub enabled: bool,
    /// Pullback from the peak since entry that fires the rule
    pub percent: f64,
    pub activation_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DynamicTakeProfitRule {
    pub enabled: bool,
    /// Profit ratio from which the rule tracks its own peak
    pub activation_pct: f64,
    /// Pullback from that peak that fires the rule
    pub pullback_pct: f64,
}

/// Enable flags and parameters for the six exit rules
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitRuleConfig {
    pub take_profit: TakeProfitRule,
    pub stop_loss: StopLossRule,
    pub emergency_exit: EmergencyExitRule,
    pub trailing_stop_loss: TrailingRule,
    pub trailing_take_profit: TrailingRule,
    pub dynamic_take_profit: DynamicTakeProfitRule,
}

impl Default for ExitRuleConfig {
    fn default() -> Self {
        Self {
            take_profit: TakeProfitRule {
                enabled: true,
                percent: 0.05,
            },
            stop_loss: StopLossRule {
                enabled: true,
                percent: 0.99,
            },
            emergency_exit: EmergencyExitRule { enabled: true },
            trailing_stop_loss: TrailingRule {
                enabled: false,
                percent: 0.02,
                activation_pct: 0.01,
            },
            trailing_take_profit: TrailingRule {
                enabled: false,
                percent: 0.01,
                activation_pct: 0.05,
            },
            dynamic_take_profit: DynamicTakeProfitRule {
                enabled: false,
                activation_pct: 0.10,
                pullback_pct: 0.01,
            },
        }
    }
}

impl ExitRuleConfig {
    /// Every rule switched off, default parameters kept
    pub fn disabled() -> Self {
        let mut config = Self::default();
        config.take_profit.enabled = false;
        config.stop_loss.enabled = false;
        config.emergency_exit.enabled = false;
        config
    }

    pub fn with_take_profit(mut self, percent: f64) -> Self {
        self.take_profit = TakeProfitRule {
            enabled: true,
            percent,
        };
        self
    }

    pub fn with_stop_loss(mut self, percent: f64) -> Self {
        self.stop_loss = StopLossRule {
            enabled: true,
            percent,
        };
        self
    }

    pub fn with_emergency_exit(mut self, enabled: bool) -> Self {
        self.emergency_exit.enabled = enabled;
        self
    }

    pub fn with_trailing_stop_loss(mut self, percent: f64, activation_pct: f64) -> Self {
        self.trailing_stop_loss = TrailingRule {
            enabled: true,
            percent,
            activation_pct,
        };
        self
    }

    pub fn with_trailing_take_profit(mut self, percent: f64, activation_pct: f64) -> Self {
        self.trailing_take_profit = TrailingRule {
            enabled: true,
            percent,
            activation_pct,
        };
        self
    }

    pub fn with_dynamic_take_profit(mut self, activation_pct: f64, pullback_pct: f64) -> Self {
        self.dynamic_take_profit = DynamicTakeProfitRule {
            enabled: true,
            activation_pct,
            pullback_pct,
        };
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        fn check(name: &str, value: f64, ok: bool) -> EngineResult<()> {
            if value.is_finite() && ok {
                Ok(())
            } else {
                Err(EngineError::InvalidConfig(format!("{name} out of range: {value}")))
            }
        }

        let tp = self.take_profit.percent;
        check("take_profit.percent", tp, tp > -1.0)?;
        let sl = self.stop_loss.percent;
        check("stop_loss.percent", sl, (0.0..=1.0).contains(&sl))?;

        for (name, rule) in [
            ("trailing_stop_loss", &self.trailing_stop_loss),
            ("trailing_take_profit", &self.trailing_take_profit),
        ] {
            check(
                &format!("{name}.percent"),
                rule.percent,
                (0.0..1.0).contains(&rule.percent),
            )?;
            check(
                &format!("{name}.activation_pct"),
                rule.activation_pct,
                rule.activation_pct > -1.0,
            )?;
        }

        let dtp = &self.dynamic_take_profit;
        check(
            "dynamic_take_profit.activation_pct",
            dtp.activation_pct,
            dtp.activation_pct > -1.0,
        )?;
        check(
            "dynamic_take_profit.pullback_pct",
            dtp.pullback_pct,
            (0.0..1.0).contains(&dtp.pullback_pct),
        )?;
        Ok(())
    }

    /// Build an evaluator with the given take-profit factor
    pub fn build(self, tp_factor: Box<dyn TakeProfitFactor>) -> EngineResult<RiskExitEvaluator> {
        RiskExitEvaluator::new(self, tp_factor)
    }
}

/// Multiplier applied to the average entry price for the fixed take-profit
pub trait TakeProfitFactor: Send + Sync {
    fn factor(&self, tp_percent: f64, rung_index: u32) -> f64;
}

/// `1 + tp_percent`
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedTakeProfit;

impl TakeProfitFactor for FixedTakeProfit {
    fn factor(&self, tp_percent: f64, _rung_index: u32) -> f64 {
        1.0 + tp_percent
    }
}

/// Target rises with ladder depth so deep ladders exit sooner on the bounce:
/// `max(1 + tp + rung * step_per_rung, 1 + min_profit_pct)`
#[derive(Debug, Clone, Copy)]
pub struct LadderTakeProfit {
    pub step_per_rung: f64,
    pub min_profit_pct: f64,
}

impl Default for LadderTakeProfit {
    fn default() -> Self {
        Self {
            step_per_rung: 0.005,
            min_profit_pct: 0.01,
        }
    }
}

impl TakeProfitFactor for LadderTakeProfit {
    fn factor(&self, tp_percent: f64, rung_index: u32) -> f64 {
        let factor = 1.0 + tp_percent + rung_index as f64 * self.step_per_rung;
        factor.max(1.0 + self.min_profit_pct)
    }
}

impl<F> TakeProfitFactor for F
where
    F: Fn(f64, u32) -> f64 + Send + Sync,
{
    fn factor(&self, tp_percent: f64, rung_index: u32) -> f64 {
        self(tp_percent, rung_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitKind {
    StopLoss,
    EmergencyExit,
    TrailingStopLoss,
    TrailingTakeProfit,
    DynamicTakeProfit,
    TakeProfit,
}

impl ExitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitKind::StopLoss => "STOP_LOSS",
            ExitKind::EmergencyExit => "EMERGENCY_EXIT",
            ExitKind::TrailingStopLoss => "TRAILING_STOP_LOSS",
            ExitKind::TrailingTakeProfit => "TRAILING_TAKE_PROFIT",
            ExitKind::DynamicTakeProfit => "DYNAMIC_TAKE_PROFIT",
            ExitKind::TakeProfit => "TAKE_PROFIT",
        }
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fired exit rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitSignal {
    pub kind: ExitKind,
    /// Price observed on the bar that fired
    pub price: f64,
    /// Level the rule compared against
    pub trigger_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RiskAction {
    None,
    Liquidate(ExitSignal),
}

impl RiskAction {
    pub fn is_none(&self) -> bool {
        matches!(self, RiskAction::None)
    }

    pub fn kind(&self) -> Option<ExitKind> {
        match self {
            RiskAction::None => None,
            RiskAction::Liquidate(signal) => Some(signal.kind),
        }
    }
}

/// State the evaluator reads; it never holds a reference to the orchestrator
#[derive(Debug, Clone, Copy)]
pub struct ExitContext<'a> {
    pub position: &'a Position,
    pub rung_index: u32,
    pub dead: bool,
}

pub struct RiskExitEvaluator {
    config: ExitRuleConfig,
    tp_factor: Box<dyn TakeProfitFactor>,
    dynamic_peak: f64,
}

impl fmt::Debug for RiskExitEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RiskExitEvaluator")
            .field("config", &self.config)
            .field("dynamic_peak", &self.dynamic_peak)
            .finish_non_exhaustive()
    }
}

impl RiskExitEvaluator {
    pub fn new(config: ExitRuleConfig, tp_factor: Box<dyn TakeProfitFactor>) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            tp_factor,
            dynamic_peak: 0.0,
        })
    }

    /// Evaluate the rules for one bar. Flat positions always yield `None`.
    pub fn evaluate(&mut self, current_price: f64, ctx: ExitContext<'_>) -> RiskAction {
        let pos = ctx.position;
        if !pos.is_open() {
            return RiskAction::None;
        }

        let signal = self
            .check_stop_loss(current_price, pos)
            .or_else(|| self.check_emergency(current_price, ctx.dead))
            .or_else(|| {
                Self::check_trailing(
                    &self.config.trailing_stop_loss,
                    ExitKind::TrailingStopLoss,
                    current_price,
                    pos,
                )
            })
            .or_else(|| {
                Self::check_trailing(
                    &self.config.trailing_take_profit,
                    ExitKind::TrailingTakeProfit,
                    current_price,
                    pos,
                )
            })
            .or_else(|| self.check_dynamic_take_profit(current_price, pos))
            .or_else(|| self.check_take_profit(current_price, pos, ctx.rung_index));

        match signal {
            Some(signal) => {
                info!(
                    rule = %signal.kind,
                    price = signal.price,
                    trigger = signal.trigger_price,
                    avg_entry = pos.average_entry_price,
                    quantity = pos.total_quantity,
                    "Exit rule fired"
                );
                RiskAction::Liquidate(signal)
            }
            None => RiskAction::None,
        }
    }

    fn check_stop_loss(&self, price: f64, pos: &Position) -> Option<ExitSignal> {
        if !self.config.stop_loss.enabled {
            return None;
        }
        let stop = self.stop_loss_price(pos)?;
        (price <= stop).then_some(ExitSignal {
            kind: ExitKind::StopLoss,
            price,
            trigger_price: stop,
        })
    }

    fn check_emergency(&self, price: f64, dead: bool) -> Option<ExitSignal> {
        (self.config.emergency_exit.enabled && dead).then_some(ExitSignal {
            kind: ExitKind::EmergencyExit,
            price,
            trigger_price: price,
        })
    }

    fn check_trailing(
        rule: &TrailingRule,
        kind: ExitKind,
        price: f64,
        pos: &Position,
    ) -> Option<ExitSignal> {
        if !rule.enabled || pos.peak_price_since_entry <= 0.0 {
            return None;
        }
        if pos.pnl_ratio(price)? < rule.activation_pct {
            return None;
        }
        let trigger = pos.peak_price_since_entry * (1.0 - rule.percent);
        (price <= trigger).then_some(ExitSignal {
            kind,
            price,
            trigger_price: trigger,
        })
    }

    fn check_dynamic_take_profit(&mut self, price: f64, pos: &Position) -> Option<ExitSignal> {
        let rule = self.config.dynamic_take_profit;
        if !rule.enabled {
            return None;
        }

        match pos.pnl_ratio(price) {
            Some(ratio) if ratio >= rule.activation_pct => {
                self.dynamic_peak = self.dynamic_peak.max(price);
                let trigger = self.dynamic_peak * (1.0 - rule.pullback_pct);
                if price <= trigger {
                    self.dynamic_peak = 0.0;
                    return Some(ExitSignal {
                        kind: ExitKind::DynamicTakeProfit,
                        price,
                        trigger_price: trigger,
                    });
                }
                None
            }
            _ => {
                // disarmed below the activation threshold
                self.dynamic_peak = 0.0;
                None
            }
        }
    }

    fn check_take_profit(&self, price: f64, pos: &Position, rung_index: u32) -> Option<ExitSignal> {
        if !self.config.take_profit.enabled {
            return None;
        }
        let target = self.take_profit_price(pos, rung_index)?;
        (price >= target).then_some(ExitSignal {
            kind: ExitKind::TakeProfit,
            price,
            trigger_price: target,
        })
    }

    /// `average_entry_price * (1 - sl_percent)`, `None` while flat
    pub fn stop_loss_price(&self, pos: &Position) -> Option<f64> {
        if !pos.is_open() || pos.average_entry_price <= 0.0 {
            return None;
        }
        Some(pos.average_entry_price * (1.0 - self.config.stop_loss.percent))
    }

    /// `average_entry_price * take_profit_factor`, `None` while flat
    pub fn take_profit_price(&self, pos: &Position, rung_index: u32) -> Option<f64> {
        if !pos.is_open() || pos.average_entry_price <= 0.0 {
            return None;
        }
        let factor = self
            .tp_factor
            .factor(self.config.take_profit.percent, rung_index);
        Some(pos.average_entry_price * factor)
    }

    /// Peak tracked by the dynamic take-profit rule (0 while disarmed)
    pub fn dynamic_peak(&self) -> f64 {
        self.dynamic_peak
    }

    pub fn config(&self) -> &ExitRuleConfig {
        &self.config
    }

    /// Clear per-position state after a full liquidation
    pub fn reset(&mut self) {
        self.dynamic_peak = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn position(avg: f64, peak: f64) -> Position {
        Position {
            average_entry_price: avg,
            total_quantity: 10.0,
            peak_price_since_entry: peak,
        }
    }

    fn ctx(pos: &Position) -> ExitContext<'_> {
        ExitContext {
            position: pos,
            rung_index: 0,
            dead: false,
        }
    }

    fn evaluator(config: ExitRuleConfig) -> RiskExitEvaluator {
        config.build(Box::new(FixedTakeProfit)).unwrap()
    }

    #[test]
    fn test_flat_position_never_fires() {
        let mut eval = evaluator(ExitRuleConfig::default().with_stop_loss(0.5));
        let flat = Position::default();
        assert!(eval.evaluate(1.0, ctx(&flat)).is_none());
    }

    #[test]
    fn test_stop_loss_boundary_inclusive() {
        let mut eval = evaluator(ExitRuleConfig::disabled().with_stop_loss(0.5));
        let pos = position(100.0, 100.0);

        assert_eq!(eval.evaluate(50.01, ctx(&pos)), RiskAction::None);
        assert_eq!(eval.evaluate(50.0, ctx(&pos)).kind(), Some(ExitKind::StopLoss));
        assert_eq!(eval.evaluate(49.0, ctx(&pos)).kind(), Some(ExitKind::StopLoss));
    }

    #[test]
    fn test_emergency_exit_ignores_price() {
        let mut eval = evaluator(ExitRuleConfig::disabled().with_emergency_exit(true));
        let pos = position(100.0, 100.0);
        let dead = ExitContext {
            position: &pos,
            rung_index: 0,
            dead: true,
        };
        assert_eq!(eval.evaluate(500.0, dead).kind(), Some(ExitKind::EmergencyExit));
        assert!(eval.evaluate(500.0, ctx(&pos)).is_none());
    }

    #[test]
    fn test_emergency_beats_take_profit() {
        let mut eval = evaluator(ExitRuleConfig::default().with_take_profit(0.05));
        let pos = position(100.0, 100.0);
        let dead = ExitContext {
            position: &pos,
            rung_index: 0,
            dead: true,
        };
        assert_eq!(eval.evaluate(200.0, dead).kind(), Some(ExitKind::EmergencyExit));
    }

    #[test]
    fn test_trailing_stop_needs_activation() {
        let mut eval = evaluator(ExitRuleConfig::disabled().with_trailing_stop_loss(0.10, 0.20));
        // peak 150 -> trigger 135; pnl at 130 is 30% so armed
        let pos = position(100.0, 150.0);
        let action = eval.evaluate(130.0, ctx(&pos));
        assert_eq!(action.kind(), Some(ExitKind::TrailingStopLoss));

        // pnl 10% < 20% activation: not armed even though below the trail
        let pos = position(100.0, 150.0);
        assert!(eval.evaluate(110.0, ctx(&pos)).is_none());
    }

    #[test]
    fn test_trailing_stop_before_trailing_take_profit() {
        let config = ExitRuleConfig::disabled()
            .with_trailing_stop_loss(0.05, 0.0)
            .with_trailing_take_profit(0.05, 0.0);
        let mut eval = evaluator(config);
        let pos = position(100.0, 200.0);
        assert_eq!(
            eval.evaluate(150.0, ctx(&pos)).kind(),
            Some(ExitKind::TrailingStopLoss)
        );
    }

    #[test]
    fn test_trailing_take_profit_trigger_price() {
        let mut eval = evaluator(ExitRuleConfig::disabled().with_trailing_take_profit(0.10, 0.05));
        let pos = position(100.0, 200.0);
        match eval.evaluate(170.0, ctx(&pos)) {
            RiskAction::Liquidate(signal) => {
                assert_eq!(signal.kind, ExitKind::TrailingTakeProfit);
                assert_relative_eq!(signal.trigger_price, 180.0);
            }
            RiskAction::None => panic!("trailing take profit should fire"),
        }
    }

    #[test]
    fn test_dynamic_take_profit_disarms_below_activation() {
        let mut eval = evaluator(ExitRuleConfig::disabled().with_dynamic_take_profit(0.10, 0.01));
        let pos = position(100.0, 100.0);

        assert!(eval.evaluate(115.0, ctx(&pos)).is_none());
        assert_eq!(eval.dynamic_peak(), 115.0);

        // pnl 5%: peak forgotten
        assert!(eval.evaluate(105.0, ctx(&pos)).is_none());
        assert_eq!(eval.dynamic_peak(), 0.0);

        // re-armed from scratch at 111
        assert!(eval.evaluate(111.0, ctx(&pos)).is_none());
        assert_eq!(eval.dynamic_peak(), 111.0);
    }

    #[test]
    fn test_dynamic_take_profit_fires_and_resets() {
        let mut eval = evaluator(ExitRuleConfig::disabled().with_dynamic_take_profit(0.10, 0.01));
        let pos = position(100.0, 100.0);

        for price in [112.0, 120.0, 130.0] {
            assert!(eval.evaluate(price, ctx(&pos)).is_none());
        }
        match eval.evaluate(128.0, ctx(&pos)) {
            RiskAction::Liquidate(signal) => {
                assert_eq!(signal.kind, ExitKind::DynamicTakeProfit);
                assert_relative_eq!(signal.trigger_price, 128.7, epsilon = 1e-9);
            }
            RiskAction::None => panic!("dynamic take profit should fire"),
        }
        assert_eq!(eval.dynamic_peak(), 0.0);
    }

    #[test]
    fn test_take_profit_fixed_factor() {
        let mut eval = evaluator(ExitRuleConfig::disabled().with_take_profit(0.35));
        let pos = position(100.0, 100.0);
        assert!(eval.evaluate(134.0, ctx(&pos)).is_none());
        assert_eq!(eval.evaluate(136.0, ctx(&pos)).kind(), Some(ExitKind::TakeProfit));
    }

    #[test]
    fn test_ladder_take_profit_factor() {
        let tp = LadderTakeProfit::default();
        assert_relative_eq!(tp.factor(0.3, 0), 1.3);
        assert_relative_eq!(tp.factor(0.3, 4), 1.32);
        // floor at the minimum profit
        assert_relative_eq!(tp.factor(-0.5, 2), 1.01);
    }

    #[test]
    fn test_closure_take_profit_factor() {
        let config = ExitRuleConfig::disabled().with_take_profit(0.1);
        let mut eval = config
            .build(Box::new(|tp: f64, rung: u32| 1.0 + tp * (rung + 1) as f64))
            .unwrap();
        let pos = position(100.0, 100.0);
        let deep = ExitContext {
            position: &pos,
            rung_index: 2,
            dead: false,
        };
        assert!(eval.evaluate(125.0, deep).is_none());
        assert_eq!(eval.evaluate(130.0, deep).kind(), Some(ExitKind::TakeProfit));
    }

    #[test]
    fn test_stop_loss_wins_over_overlapping_take_profit() {
        // take-profit target forced below the stop so both hold at 50
        let config = ExitRuleConfig::disabled()
            .with_stop_loss(0.5)
            .with_take_profit(0.0);
        let mut eval = config.build(Box::new(|_: f64, _: u32| 0.5)).unwrap();
        let pos = position(100.0, 100.0);
        assert_eq!(eval.evaluate(50.0, ctx(&pos)).kind(), Some(ExitKind::StopLoss));
    }

    #[test]
    fn test_validation() {
        assert!(ExitRuleConfig::default().validate().is_ok());
        assert!(ExitRuleConfig::default().with_stop_loss(1.5).validate().is_err());
        assert!(ExitRuleConfig::default()
            .with_dynamic_take_profit(0.1, 1.0)
            .validate()
            .is_err());
        assert!(ExitRuleConfig::default()
            .with_trailing_stop_loss(f64::NAN, 0.1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: ExitRuleConfig =
            serde_json::from_str(r#"{"stop_loss": {"enabled": false, "percent": 0.5}}"#).unwrap();
        assert!(!config.stop_loss.enabled);
        assert!(config.take_profit.enabled);
        assert_eq!(config.take_profit.percent, 0.05);
    }
}
