//! Position ledger
//!
//! Running weighted-average entry price and quantity, rebuilt from fill
//! events. All exits in this engine are full liquidations; a sell that
//! empties the position zeroes every field.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::Side;

/// Open position state for one asset.
///
/// Invariant: `total_quantity == 0` implies `average_entry_price == 0` and
/// `peak_price_since_entry == 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub average_entry_price: f64,
    pub total_quantity: f64,
    pub peak_price_since_entry: f64,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.total_quantity > 0.0
    }

    /// `price / average_entry_price - 1`, or `None` while the average is zero
    pub fn pnl_ratio(&self, price: f64) -> Option<f64> {
        if self.average_entry_price <= 0.0 {
            return None;
        }
        Some(price / self.average_entry_price - 1.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionLedger {
    position: Position,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an executed fill
    pub fn apply_fill(&mut self, side: Side, price: f64, quantity: f64) -> EngineResult<()> {
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(EngineError::NumericDegenerate("fill quantity must be positive"));
        }
        if !(price.is_finite() && price > 0.0) {
            return Err(EngineError::NumericDegenerate("fill price must be positive"));
        }

        let pos = &mut self.position;
        match side {
            Side::Buy => {
                let prev_value = pos.average_entry_price * pos.total_quantity;
                let new_qty = pos.total_quantity + quantity;
                pos.average_entry_price = (prev_value + price * quantity) / new_qty;
                pos.total_quantity = new_qty;
                // a fresh position starts tracking its peak from the fill
                if pos.peak_price_since_entry == 0.0 {
                    pos.peak_price_since_entry = price;
                }
            }
            Side::Sell => {
                if quantity > pos.total_quantity {
                    return Err(EngineError::Oversell {
                        held: pos.total_quantity,
                        requested: quantity,
                    });
                }
                pos.total_quantity -= quantity;
                if pos.total_quantity == 0.0 {
                    self.reset();
                }
            }
        }
        Ok(())
    }

    /// Track the highest price seen while the position is open
    pub fn observe_price(&mut self, price: f64) {
        if self.position.is_open() {
            self.position.peak_price_since_entry = self.position.peak_price_since_entry.max(price);
        }
    }

    pub fn reset(&mut self) {
        self.position = Position::default();
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn is_flat(&self) -> bool {
        !self.position.is_open()
    }
}
