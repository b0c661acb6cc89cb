//! Indicators used by the entry policies, powered by the `ta` crate
//!
//! Entry policies see one bar at a time, so everything here is incremental:
//! each tracker is fed once per bar and reports `None` until warmed up.

use ta::indicators::RelativeStrengthIndex;
use ta::Next;

use crate::error::{EngineError, EngineResult};
use crate::Candle;

/// Batch RSI over a close series (`None` until `period` values were seen)
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut tracker = match RsiTracker::new(period) {
        Ok(t) => t,
        Err(_) => return vec![None; values.len()],
    };

    values.iter().map(|&v| tracker.next(v)).collect()
}

/// Incremental RSI
#[derive(Debug, Clone)]
pub struct RsiTracker {
    inner: RelativeStrengthIndex,
    period: usize,
    seen: usize,
    last: Option<f64>,
}

impl RsiTracker {
    pub fn new(period: usize) -> EngineResult<Self> {
        let inner = RelativeStrengthIndex::new(period)
            .map_err(|e| EngineError::InvalidConfig(format!("rsi period {period}: {e:?}")))?;
        Ok(Self {
            inner,
            period,
            seen: 0,
            last: None,
        })
    }

    /// Feed one close, returns the RSI once warmed up
    pub fn next(&mut self, close: f64) -> Option<f64> {
        let value = self.inner.next(close);
        self.seen += 1;
        self.last = (self.seen >= self.period).then_some(value);
        self.last
    }

    /// Last RSI value (after warm-up)
    pub fn value(&self) -> Option<f64> {
        self.last
    }
}

/// Counts consecutive green candles (close > open)
#[derive(Debug, Clone, Copy, Default)]
pub struct GreenStreak {
    count: u32,
}

impl GreenStreak {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, candle: &Candle) -> u32 {
        if candle.is_green() {
            self.count += 1;
        } else {
            self.count = 0;
        }
        self.count
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}
