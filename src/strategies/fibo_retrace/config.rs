use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FiboRetraceConfig {
    /// Buy level as a fraction of the ATH (default: 0.22)
    pub fibo_level: f64,

    /// Buffer above the level that still counts as a touch (default: 0.02)
    pub tolerance: f64,

    /// Never re-arm after the first buy (default: true)
    pub once: bool,
}

impl Default for FiboRetraceConfig {
    fn default() -> Self {
        Self {
            fibo_level: 0.22,
            tolerance: 0.02,
            once: true,
        }
    }
}
