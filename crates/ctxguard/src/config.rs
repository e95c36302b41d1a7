//! Compaction configuration with sensible defaults.
//!
//! [`CompactionConfig`] is owned by the agent configuration and read-only for
//! the estimator and trigger. Invalid budgets are rejected here, at load
//! time, so the trigger never sees a zero `max_history_tokens`.
//!
//! ```toml
//! max_history_tokens = 8000
//! safety_threshold_ratio = 0.70
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::context::trigger::PREVENTIVE_THRESHOLD;
use crate::error::{Error, Result};

/// Default history budget in tokens.
const DEFAULT_MAX_HISTORY_TOKENS: usize = 128_000;

/// Budget and threshold for compaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompactionConfig {
    /// Maximum tokens the model accepts for the full history. Default: `128000`.
    pub max_history_tokens: usize,
    /// Fraction of the budget at which preventive compaction fires. Default: `0.70`.
    pub safety_threshold_ratio: f64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_history_tokens: DEFAULT_MAX_HISTORY_TOKENS,
            safety_threshold_ratio: PREVENTIVE_THRESHOLD,
        }
    }
}

impl CompactionConfig {
    /// Default config with the given history budget.
    pub fn new(max_history_tokens: usize) -> Self {
        Self::default().with_max_history_tokens(max_history_tokens)
    }

    /// Set the history budget in tokens.
    pub fn with_max_history_tokens(mut self, tokens: usize) -> Self {
        self.max_history_tokens = tokens;
        self
    }

    /// Set the fraction of the budget at which preventive compaction fires.
    pub fn with_safety_threshold_ratio(mut self, ratio: f64) -> Self {
        self.safety_threshold_ratio = ratio;
        self
    }

    /// Preventive threshold expressed in tokens.
    pub fn threshold_tokens(&self) -> f64 {
        self.max_history_tokens as f64 * self.safety_threshold_ratio
    }

    /// Reject a zero budget and thresholds outside `(0, 1)`.
    pub fn validate(&self) -> Result<()> {
        if self.max_history_tokens == 0 {
            return Err(Error::Config(
                "max_history_tokens must be a positive integer".into(),
            ));
        }
        if !(self.safety_threshold_ratio > 0.0 && self.safety_threshold_ratio < 1.0) {
            return Err(Error::Config(format!(
                "safety_threshold_ratio must be between 0 and 1 (exclusive), got {}",
                self.safety_threshold_ratio
            )));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }
}
