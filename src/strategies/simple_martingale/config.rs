use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleMartingaleConfig {
    /// RSI period (default: 15)
    pub rsi_period: usize,

    /// Initial entry only while RSI is below this (default: 40)
    pub rsi_entry: f64,

    /// Add when close <= average_entry * (1 + drop) (default: -0.5)
    pub martingale_buy_drop: f64,

    /// Buys per cycle, initial included (default: 4)
    pub max_buys: u32,
}

impl Default for SimpleMartingaleConfig {
    fn default() -> Self {
        Self {
            rsi_period: 15,
            rsi_entry: 40.0,
            martingale_buy_drop: -0.5,
            max_buys: 4,
        }
    }
}
