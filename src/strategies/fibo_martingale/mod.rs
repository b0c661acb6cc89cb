//! Fibonacci Martingale
//!
//! Initial buy on an RSI dip, then averaging adds at Fibonacci retracements
//! of the all-time-high, confirmed by a green-candle streak. The take-profit
//! target rises with ladder depth.

mod config;
mod strategy;

pub use config::FiboMartingaleConfig;
pub use strategy::FiboMartingalePolicy;

use crate::strategies::EntryPolicy;
use crate::Config;
use anyhow::Result;

pub const NAME: &str = "fibo_martingale";

/// Create policy from config (called by registry)
pub fn create(config: &Config) -> Result<Box<dyn EntryPolicy>> {
    let policy_config: FiboMartingaleConfig = serde_json::from_value(config.strategy.clone())
        .map_err(|e| anyhow::anyhow!("Failed to parse {} config: {}", NAME, e))?;
    Ok(Box::new(FiboMartingalePolicy::new(policy_config)?))
}
