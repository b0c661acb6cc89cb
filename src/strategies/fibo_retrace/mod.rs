//! Fibonacci Retrace
//!
//! Buys once price retraces to a single Fibonacci level of the ATH. The
//! level re-arms on every ATH update unless `once` is set.

mod config;
mod strategy;

pub use config::FiboRetraceConfig;
pub use strategy::FiboRetracePolicy;

use crate::strategies::EntryPolicy;
use crate::Config;
use anyhow::Result;

pub const NAME: &str = "fibo_retrace";

/// Create policy from config (called by registry)
pub fn create(config: &Config) -> Result<Box<dyn EntryPolicy>> {
    let policy_config: FiboRetraceConfig = serde_json::from_value(config.strategy.clone())
        .map_err(|e| anyhow::anyhow!("Failed to parse {} config: {}", NAME, e))?;
    Ok(Box::new(FiboRetracePolicy::new(policy_config)?))
}
