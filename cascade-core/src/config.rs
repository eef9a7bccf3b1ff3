//! Runtime configuration.
//!
//! Configuration is per thread: each thread runs its own reactive runtime and
//! reads its own copy, installed with [`Runtime::configure`](crate::reactive::Runtime::configure).

use serde::{Deserialize, Serialize};

use crate::error::ReactiveError;

/// Default bound on how many times one effect may run inside a single flush.
pub const DEFAULT_MAX_FLUSH_PASSES: usize = 100;

/// Tunables for the reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Maximum number of runs of a single effect within one flush. An effect
    /// that keeps re-triggering itself past this bound aborts the flush.
    pub max_flush_passes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_passes: DEFAULT_MAX_FLUSH_PASSES,
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a configuration from JSON. Missing fields take
    /// their defaults.
    pub fn from_json(json: &str) -> Result<Self, ReactiveError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ReactiveError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every field is within range.
    pub fn validate(&self) -> Result<(), ReactiveError> {
        if self.max_flush_passes == 0 {
            return Err(ReactiveError::InvalidConfig(
                "max_flush_passes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config = RuntimeConfig::from_json("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.max_flush_passes, DEFAULT_MAX_FLUSH_PASSES);
    }

    #[test]
    fn parses_explicit_values() {
        let config = RuntimeConfig::from_json(r#"{ "max_flush_passes": 7 }"#).unwrap();
        assert_eq!(config.max_flush_passes, 7);
    }

    #[test]
    fn rejects_unknown_fields_and_zero_bound() {
        assert!(matches!(
            RuntimeConfig::from_json(r#"{ "max_passes": 7 }"#),
            Err(ReactiveError::InvalidConfig(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_json(r#"{ "max_flush_passes": 0 }"#),
            Err(ReactiveError::InvalidConfig(_))
        ));
    }
}
