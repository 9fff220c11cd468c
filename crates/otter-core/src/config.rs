use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Pause between head polls when the repository has no change
    /// notification.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            retry: RetryPolicy::default(),
        }
    }
}

impl NodeConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject values the node cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending field.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.poll_interval_ms > 0, "poll_interval_ms must be positive");
        self.retry.validate()
    }
}

/// Exponential backoff for transient repository failures during polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Consecutive failures tolerated before the error is surfaced.
    /// Zero retries forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), capped at
    /// `max_delay_ms`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Whether another retry is allowed after `failures` consecutive failures.
    #[must_use]
    pub const fn allows(&self, failures: u32) -> bool {
        self.max_attempts == 0 || failures < self.max_attempts
    }

    /// # Errors
    ///
    /// Returns an error naming the offending field.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.multiplier.is_finite() && self.multiplier >= 1.0,
            "retry.multiplier must be a finite number >= 1.0"
        );
        ensure!(
            self.initial_delay_ms <= self.max_delay_ms,
            "retry.initial_delay_ms must not exceed retry.max_delay_ms"
        );
        Ok(())
    }
}

/// Load node settings from a TOML file. A missing file yields the defaults.
///
/// # Errors
///
/// Fails when the file cannot be read, is not valid TOML, or holds values
/// rejected by [`NodeConfig::validate`].
pub fn load_node_config(path: &Path) -> Result<NodeConfig> {
    if !path.exists() {
        return Ok(NodeConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config = toml::from_str::<NodeConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid settings in {}", path.display()))?;
    Ok(config)
}

const fn default_poll_interval_ms() -> u64 {
    100
}

const fn default_initial_delay_ms() -> u64 {
    50
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_max_delay_ms() -> u64 {
    5_000
}

const fn default_max_attempts() -> u32 {
    8
}
