//! Simple Martingale
//!
//! Buys the first dip after migration (RSI below a threshold) and doubles
//! down every time price falls a fixed fraction below the running average.

mod config;
mod strategy;

pub use config::SimpleMartingaleConfig;
pub use strategy::SimpleMartingalePolicy;

use crate::strategies::EntryPolicy;
use crate::Config;
use anyhow::Result;

pub const NAME: &str = "simple_martingale";

/// Create policy from config (called by registry)
pub fn create(config: &Config) -> Result<Box<dyn EntryPolicy>> {
    let policy_config: SimpleMartingaleConfig = serde_json::from_value(config.strategy.clone())
        .map_err(|e| anyhow::anyhow!("Failed to parse {} config: {}", NAME, e))?;
    Ok(Box::new(SimpleMartingalePolicy::new(policy_config)?))
}
