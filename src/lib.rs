//! Dip Ladder
//!
//! Position lifecycle and risk-exit decision engine for backtesting
//! buy-the-dip, scale-in policies on volatile micro-cap assets.
//!
//! The engine ([`engine::StrategyOrchestrator`]) is driven one bar at a
//! time: an activation gate enables trading, a martingale ladder sizes
//! entries, and a priority-ordered set of exit rules decides when to
//! liquidate. Bar loading, execution and reporting live in [`data`] and
//! [`backtest`].

pub mod activation;
pub mod backtest;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod ladder;
pub mod ledger;
pub mod risk;
pub mod strategies;
pub mod types;

pub use config::Config;
pub use engine::{CashAccount, EnginePhase, Fill, IntentReason, OrderIntent, Rejection, StrategyOrchestrator};
pub use error::{EngineError, EngineResult};
pub use risk::{ExitKind, RiskAction};
pub use types::*;
