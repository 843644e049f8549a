use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Timing knobs of the per-session tick scheduler, all in milliseconds
/// unless the name says otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_retry_ms")]
    pub retry_ms: u64,
    #[serde(default = "default_max_defer_ms")]
    pub max_defer_ms: u64,
    #[serde(default = "default_typing_grace_ms")]
    pub typing_grace_ms: u64,
    #[serde(default = "default_recent_activity_grace_ms")]
    pub recent_activity_grace_ms: u64,
    #[serde(default = "default_initial_tick_ms")]
    pub initial_tick_ms: u64,
    #[serde(default = "default_post_fire_ms")]
    pub post_fire_ms: u64,
    #[serde(default = "default_duration_sec")]
    pub default_duration_sec: u64,
    /// Durations at or below this use the compressed beat set.
    #[serde(default = "default_compressed_max_duration_sec")]
    pub compressed_max_duration_sec: u64,
}

fn default_retry_ms() -> u64 {
    800
}

fn default_max_defer_ms() -> u64 {
    15_000
}

fn default_typing_grace_ms() -> u64 {
    3_000
}

fn default_recent_activity_grace_ms() -> u64 {
    4_500
}

fn default_initial_tick_ms() -> u64 {
    100
}

fn default_post_fire_ms() -> u64 {
    50
}

fn default_duration_sec() -> u64 {
    600
}

fn default_compressed_max_duration_sec() -> u64 {
    90
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_ms: default_retry_ms(),
            max_defer_ms: default_max_defer_ms(),
            typing_grace_ms: default_typing_grace_ms(),
            recent_activity_grace_ms: default_recent_activity_grace_ms(),
            initial_tick_ms: default_initial_tick_ms(),
            post_fire_ms: default_post_fire_ms(),
            default_duration_sec: default_duration_sec(),
            compressed_max_duration_sec: default_compressed_max_duration_sec(),
        }
    }
}

impl SchedulerConfig {
    /// `0` and `None` both mean the configured default.
    pub fn effective_duration(&self, requested: Option<u64>) -> u64 {
        match requested {
            Some(sec) if sec > 0 => sec,
            _ => self.default_duration_sec,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_ms == 0 {
            bail!("orchestrator.retry_ms must be greater than zero");
        }
        if self.max_defer_ms < self.retry_ms {
            bail!(
                "orchestrator.max_defer_ms ({}) must be at least retry_ms ({})",
                self.max_defer_ms,
                self.retry_ms
            );
        }
        if self.default_duration_sec == 0 {
            bail!("orchestrator.default_duration_sec must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_defaults_fill_missing_fields() {
        let config: SchedulerConfig = serde_yaml::from_str("retry_ms: 500").unwrap();
        assert_eq!(config.retry_ms, 500);
        assert_eq!(config.max_defer_ms, 15_000);
        assert_eq!(config.compressed_max_duration_sec, 90);
    }

    #[test]
    fn effective_duration_treats_zero_as_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.effective_duration(Some(0)), 600);
        assert_eq!(config.effective_duration(None), 600);
        assert_eq!(config.effective_duration(Some(75)), 75);
    }

    #[test]
    fn validate_rejects_inconsistent_timing() {
        let config = SchedulerConfig {
            retry_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SchedulerConfig {
            max_defer_ms: 100,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("max_defer_ms"));
        assert!(SchedulerConfig::default().validate().is_ok());
    }
}
