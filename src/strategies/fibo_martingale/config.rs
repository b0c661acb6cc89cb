use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FiboMartingaleConfig {
    /// RSI period (default: 15)
    pub rsi_period: usize,

    /// Initial entry only while RSI is below this (default: 40)
    pub rsi_entry: f64,

    /// Retracement factors of the ATH, deepest last (default: 0.786 .. 0.236)
    pub fibo_levels: Vec<f64>,

    /// Consecutive green candles needed before an add (default: 2)
    pub green_candle_streak_required: u32,

    /// Take-profit factor increase per rung (default: 0.005)
    pub tp_step_per_rung: f64,

    /// Floor for the take-profit factor above 1 (default: 0.01)
    pub min_profit_pct: f64,
}

impl Default for FiboMartingaleConfig {
    fn default() -> Self {
        Self {
            rsi_period: 15,
            rsi_entry: 40.0,
            fibo_levels: vec![0.786, 0.618, 0.5, 0.382, 0.236],
            green_candle_streak_required: 2,
            tp_step_per_rung: 0.005,
            min_profit_pct: 0.01,
        }
    }
}
