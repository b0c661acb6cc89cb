//! Martingale sizing ladder
//!
//! Sizes the initial entry and every averaging add. Each successful add
//! multiplies the next rung's cash and quantity by `multiplier`, so rung
//! `n` costs `initial_cash * multiplier^n`.
//!
//! The ladder advances at sizing time: the quantity returned belongs to the
//! current rung and the stored `next_entry_*` values already describe the
//! following one.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// How the initial entry cash is chosen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialSizing {
    /// Spend a fixed cash amount
    Fixed(f64),
    /// Spend a fraction of the available cash
    FractionOfCash(f64),
}

impl InitialSizing {
    pub fn cash_for_buy(&self, available_cash: f64) -> f64 {
        match *self {
            InitialSizing::Fixed(amount) => amount,
            InitialSizing::FractionOfCash(factor) => available_cash * factor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LadderConfig {
    pub initial: InitialSizing,
    pub multiplier: f64,
    /// Maximum number of martingale adds per cycle (unbounded when `None`)
    pub max_rungs: Option<u32>,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            initial: InitialSizing::Fixed(0.1),
            multiplier: 2.0,
            max_rungs: None,
        }
    }
}

impl LadderConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.multiplier.is_finite() && self.multiplier > 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "ladder multiplier must be > 1, got {}",
                self.multiplier
            )));
        }
        match self.initial {
            InitialSizing::Fixed(amount) if !(amount.is_finite() && amount > 0.0) => {
                Err(EngineError::InvalidConfig(format!(
                    "fixed initial entry must be > 0, got {amount}"
                )))
            }
            InitialSizing::FractionOfCash(f) if !(f > 0.0 && f <= 1.0) => {
                Err(EngineError::InvalidConfig(format!(
                    "initial cash fraction must be in (0, 1], got {f}"
                )))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    Initial,
    Martingale,
}

/// Explicit sizing request; the ladder never infers the entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRequest {
    pub kind: EntryKind,
}

impl EntryRequest {
    pub fn initial() -> Self {
        Self {
            kind: EntryKind::Initial,
        }
    }

    pub fn martingale() -> Self {
        Self {
            kind: EntryKind::Martingale,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LadderState {
    pub rung_index: u32,
    pub next_entry_quantity: f64,
    pub next_entry_cash: f64,
    pub initial_entry_done: bool,
}

#[derive(Debug, Clone)]
pub struct SizingLadder {
    config: LadderConfig,
    state: LadderState,
}

impl SizingLadder {
    pub fn new(config: LadderConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: LadderState::default(),
        })
    }

    /// Size an entry and advance the ladder. Returns whole units.
    pub fn size_for_entry(
        &mut self,
        request: EntryRequest,
        available_cash: f64,
        current_price: f64,
    ) -> EngineResult<f64> {
        if !(current_price.is_finite() && current_price > 0.0) {
            return Err(EngineError::NumericDegenerate("entry price must be positive"));
        }

        match request.kind {
            EntryKind::Initial => self.size_initial(available_cash, current_price),
            EntryKind::Martingale => self.size_martingale(available_cash, current_price),
        }
    }

    fn size_initial(&mut self, available_cash: f64, price: f64) -> EngineResult<f64> {
        if self.state.initial_entry_done {
            return Err(EngineError::InvalidStateTransition(
                "initial entry requested twice in one cycle".to_string(),
            ));
        }

        let cash_for_buy = self.config.initial.cash_for_buy(available_cash);
        let quantity = (cash_for_buy / price).floor();
        if quantity <= 0.0 || cash_for_buy > available_cash {
            return Err(EngineError::InsufficientFunds {
                required: cash_for_buy.max(price),
                available: available_cash,
            });
        }

        self.state.next_entry_quantity = quantity * self.config.multiplier;
        self.state.next_entry_cash = cash_for_buy * self.config.multiplier;
        self.state.initial_entry_done = true;

        debug!(
            quantity,
            cash = cash_for_buy,
            next_cash = self.state.next_entry_cash,
            "Initial entry sized"
        );
        Ok(quantity)
    }

    fn size_martingale(&mut self, available_cash: f64, price: f64) -> EngineResult<f64> {
        if !self.state.initial_entry_done {
            return Err(EngineError::InvalidStateTransition(
                "martingale entry requested before the initial entry".to_string(),
            ));
        }
        if let Some(max_rungs) = self.config.max_rungs {
            if self.state.rung_index >= max_rungs {
                return Err(EngineError::LadderExhausted { max_rungs });
            }
        }

        let cost = self.state.next_entry_cash;
        let quantity = (cost / price).floor();
        if quantity <= 0.0 || available_cash < cost {
            return Err(EngineError::InsufficientFunds {
                required: cost,
                available: available_cash,
            });
        }

        self.state.next_entry_quantity *= self.config.multiplier;
        self.state.next_entry_cash *= self.config.multiplier;
        self.state.rung_index += 1;

        debug!(
            quantity,
            rung = self.state.rung_index,
            next_cash = self.state.next_entry_cash,
            "Martingale entry sized"
        );
        Ok(quantity)
    }

    /// Zero the ladder after a full liquidation
    pub fn reset(&mut self) {
        self.state = LadderState::default();
    }

    /// Put back a snapshot taken before a sizing call whose order was rejected
    pub fn restore(&mut self, snapshot: LadderState) {
        self.state = snapshot;
    }

    pub fn state(&self) -> LadderState {
        self.state
    }

    pub fn rung_index(&self) -> u32 {
        self.state.rung_index
    }

    pub fn config(&self) -> &LadderConfig {
        &self.config
    }
}
