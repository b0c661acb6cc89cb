//! Configuration management
//!
//! Loads the JSON run configuration. Every section has defaults, so a config
//! file only needs the keys it changes. `DIP_LADDER_DATA_DIR` (also read
//! from `.env`) overrides `backtest.data_dir`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{EngineError, EngineResult};
use crate::ladder::LadderConfig;
use crate::risk::ExitRuleConfig;

pub const DATA_DIR_ENV: &str = "DIP_LADDER_DATA_DIR";

const DEFAULT_STRATEGY: &str = "simple_martingale";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub sizing: LadderConfig,
    pub exits: ExitRuleConfig,
    /// Policy parameters; `name` selects the policy
    pub strategy: serde_json::Value,
    pub backtest: BacktestConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            engine: EngineConfig::default(),
            sizing: LadderConfig::default(),
            exits: ExitRuleConfig::default(),
            strategy: serde_json::json!({ "name": DEFAULT_STRATEGY }),
            backtest: BacktestConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        if let Ok(data_dir) = std::env::var(DATA_DIR_ENV) {
            config.backtest.data_dir = data_dir;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Policy name from `strategy.name`
    pub fn strategy_name(&self) -> String {
        self.strategy
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_STRATEGY)
            .to_string()
    }

    pub fn set_strategy_name(&mut self, name: &str) {
        match self.strategy.as_object_mut() {
            Some(obj) => {
                obj.insert("name".to_string(), serde_json::json!(name));
            }
            None => self.strategy = serde_json::json!({ "name": name }),
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.engine.validate()?;
        self.sizing.validate()?;
        self.exits.validate()?;
        self.backtest.validate()
    }
}

/// Activation and extreme-tracking parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Normalized price above which the asset becomes tradable
    pub migration_threshold: f64,
    /// Normalized price below which a migrated asset is dead
    pub dead_threshold: f64,
    /// Close is multiplied by this before the gate sees it (1e9 turns a
    /// per-token price of a 1B-supply token into market cap)
    pub price_unit_scale: f64,
    pub ath_update_ratio: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            migration_threshold: 70_000.0,
            dead_threshold: 15_000.0,
            price_unit_scale: 1e9,
            ath_update_ratio: 1.05,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.migration_threshold.is_finite() && self.migration_threshold > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "migration_threshold must be > 0, got {}",
                self.migration_threshold
            )));
        }
        if !(self.dead_threshold > 0.0 && self.dead_threshold < self.migration_threshold) {
            return Err(EngineError::InvalidConfig(format!(
                "dead_threshold must be in (0, migration_threshold), got {}",
                self.dead_threshold
            )));
        }
        if !(self.price_unit_scale.is_finite() && self.price_unit_scale > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "price_unit_scale must be > 0, got {}",
                self.price_unit_scale
            )));
        }
        if !(self.ath_update_ratio.is_finite() && self.ath_update_ratio > 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "ath_update_ratio must be > 1, got {}",
                self.ath_update_ratio
            )));
        }
        Ok(())
    }
}

/// Per-fill commission: `size * price * percent + (bribe + priority_fee) * native_price`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionConfig {
    pub percent: f64,
    /// Fixed fees in the chain's native token
    pub bribe: f64,
    pub priority_fee: f64,
    /// Native token price in cash units
    pub native_price: f64,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        CommissionConfig {
            percent: 0.0095, // 0.95%
            bribe: 0.0001,
            priority_fee: 0.0001,
            native_price: 150.0,
        }
    }
}

impl CommissionConfig {
    pub fn fixed_fee(&self) -> f64 {
        (self.bribe + self.priority_fee) * self.native_price
    }

    /// Zero-cost model for tests and frictionless runs
    pub fn free() -> Self {
        CommissionConfig {
            percent: 0.0,
            bribe: 0.0,
            priority_fee: 0.0,
            native_price: 0.0,
        }
    }
}

/// Backtest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub data_dir: String,
    pub initial_cash: f64,
    pub commission: CommissionConfig,
    /// Fill price offset from the close, buys pay up and sells give up
    pub slippage: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            data_dir: "data".to_string(),
            initial_cash: 1000.0,
            commission: CommissionConfig::default(),
            slippage: 0.0,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.initial_cash.is_finite() && self.initial_cash > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "initial_cash must be > 0, got {}",
                self.initial_cash
            )));
        }
        let c = &self.commission;
        if !(0.0..1.0).contains(&c.percent) {
            return Err(EngineError::InvalidConfig(format!(
                "commission.percent must be in [0, 1), got {}",
                c.percent
            )));
        }
        if !(c.fixed_fee().is_finite() && c.fixed_fee() >= 0.0) {
            return Err(EngineError::InvalidConfig("commission fixed fee must be >= 0".into()));
        }
        if !(0.0..1.0).contains(&self.slippage) {
            return Err(EngineError::InvalidConfig(format!(
                "slippage must be in [0, 1), got {}",
                self.slippage
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ladder::InitialSizing;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.strategy_name(), "simple_martingale");
        assert_eq!(config.engine.migration_threshold, 70_000.0);
        assert_eq!(config.exits.stop_loss.percent, 0.99);
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{
            "engine": { "migration_threshold": 50000, "dead_threshold": 10000 },
            "sizing": { "initial": { "fraction_of_cash": 0.01 }, "multiplier": 2.0, "max_rungs": 5 },
            "strategy": { "name": "fibo_martingale", "rsi_entry": 35 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.migration_threshold, 50_000.0);
        assert_eq!(config.engine.ath_update_ratio, 1.05);
        assert_eq!(config.sizing.initial, InitialSizing::FractionOfCash(0.01));
        assert_eq!(config.sizing.max_rungs, Some(5));
        assert_eq!(config.strategy_name(), "fibo_martingale");
        assert_eq!(config.backtest.initial_cash, 1000.0);
    }

    #[test]
    fn test_inverted_thresholds_invalid() {
        let mut config = Config::default();
        config.engine.dead_threshold = 80_000.0;
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_commission_fixed_fee() {
        assert_relative_eq!(CommissionConfig::default().fixed_fee(), 0.03, epsilon = 1e-12);
        assert_eq!(CommissionConfig::free().fixed_fee(), 0.0);
    }

    #[test]
    fn test_set_strategy_name() {
        let mut config = Config::default();
        config.strategy = serde_json::json!({ "fibo_level": 0.3 });
        config.set_strategy_name("fibo_retrace");
        assert_eq!(config.strategy_name(), "fibo_retrace");
        assert_eq!(config.strategy["fibo_level"], 0.3);
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file("/nonexistent/config.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
