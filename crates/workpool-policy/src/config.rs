//! Policy configuration.
//!
//! Per-container thresholds are not configured here; they are read from each
//! container's own config map under keys derived from the metric name (see
//! [`PolicyConfig::low_threshold_key`]).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::BalancingPolicy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Name of the per-item metric whose values are treated as workrates.
    /// Also names the container threshold config keys:
    /// `{metric_name}.threshold.low` and `{metric_name}.threshold.high`.
    pub metric_name: String,

    /// Minimum spacing between rebalance passes, in milliseconds.
    #[serde(default = "default_min_period_ms")]
    pub min_period_between_execs_ms: u64,

    /// Whether a pass that pushed items off a hot container also pulls items
    /// onto it if it is cold. Off by default: one corrective direction per
    /// container per pass.
    #[serde(default)]
    pub balance_cold_pulls_with_hot_pushes: bool,
}

impl PolicyConfig {
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            metric_name: metric_name.into(),
            min_period_between_execs_ms: default_min_period_ms(),
            balance_cold_pulls_with_hot_pushes: false,
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PolicyConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Container config key holding the low workrate threshold.
    pub fn low_threshold_key(&self) -> String {
        format!("{}.threshold.low", self.metric_name)
    }

    /// Container config key holding the high workrate threshold.
    pub fn high_threshold_key(&self) -> String {
        format!("{}.threshold.high", self.metric_name)
    }

    pub fn min_period_between_execs(&self) -> Duration {
        Duration::from_millis(self.min_period_between_execs_ms)
    }
}

fn default_min_period_ms() -> u64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_key_names_derive_from_metric() {
        let config = PolicyConfig::new("msgs.per.sec");
        assert_eq!(config.low_threshold_key(), "msgs.per.sec.threshold.low");
        assert_eq!(config.high_threshold_key(), "msgs.per.sec.threshold.high");
    }

    #[test]
    fn min_period_defaults_to_100ms() {
        let config = PolicyConfig::new("rate");
        assert_eq!(config.min_period_between_execs(), Duration::from_millis(100));
        assert!(!config.balance_cold_pulls_with_hot_pushes);
    }

    #[test]
    fn parses_from_toml_with_defaults() {
        let config: PolicyConfig = toml::from_str(r#"metric_name = "rate""#).unwrap();
        assert_eq!(config.metric_name, "rate");
        assert_eq!(config.min_period_between_execs_ms, 100);

        let config: PolicyConfig = toml::from_str(
            r#"
            metric_name = "rate"
            min_period_between_execs_ms = 250
            balance_cold_pulls_with_hot_pushes = true
            "#,
        )
        .unwrap();
        assert_eq!(config.min_period_between_execs_ms, 250);
        assert!(config.balance_cold_pulls_with_hot_pushes);
    }
}
