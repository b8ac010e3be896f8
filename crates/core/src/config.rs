use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Largest worker pool accepted by validation.
pub const MAX_WORKER_THREADS: usize = 1024;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

// ── Top-level config ──────────────────────────────────────────

/// Full configuration document, usually read from `taskctl.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskctlConfig {
    /// Task controller settings.
    #[serde(default)]
    pub control: ControlConfig,
}

impl TaskctlConfig {
    /// Parse config from a TOML string, apply env overrides and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.control.apply_env_overrides();
        config.control.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults with env overrides applied, for runs without a config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.control.apply_env_overrides();
        config.control.validate()?;
        Ok(config)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  control:     worker_threads={} (resolved {}), tick_interval_ms={}",
            self.control.worker_threads,
            self.control.resolved_worker_threads(),
            self.control.tick_interval_ms
        );
    }
}

// ── Control ───────────────────────────────────────────────────

/// Tunables of the task controller. Both are fixed once the scheduler is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Number of worker slots. 0 = available parallelism.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Control loop cadence in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_worker_threads() -> usize {
    0
}

fn default_tick_interval_ms() -> u64 {
    100
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl ControlConfig {
    /// Config with an explicit pool size and the default tick.
    pub fn with_workers(worker_threads: usize) -> Self {
        Self {
            worker_threads,
            ..Self::default()
        }
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Validate ranges of the tunables.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "control.tick_interval_ms must be greater than zero".into(),
            ));
        }
        if self.worker_threads > MAX_WORKER_THREADS {
            return Err(ConfigError::Invalid(format!(
                "control.worker_threads is {}, maximum is {MAX_WORKER_THREADS}",
                self.worker_threads
            )));
        }
        Ok(())
    }

    /// Apply environment variable overrides.
    ///
    /// - `TASKCTL_WORKER_THREADS` -> `control.worker_threads`
    /// - `TASKCTL_TICK_INTERVAL_MS` -> `control.tick_interval_ms`
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(env_opt);
    }

    pub(crate) fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TASKCTL_WORKER_THREADS") {
            match v.parse() {
                Ok(n) => self.worker_threads = n,
                Err(_) => tracing::warn!(value = %v, "ignoring invalid TASKCTL_WORKER_THREADS"),
            }
        }
        if let Some(v) = lookup("TASKCTL_TICK_INTERVAL_MS") {
            match v.parse() {
                Ok(ms) => self.tick_interval_ms = ms,
                Err(_) => tracing::warn!(value = %v, "ignoring invalid TASKCTL_TICK_INTERVAL_MS"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn control_config_defaults() {
        let config = ControlConfig::default();
        assert_eq!(config.worker_threads, 0);
        assert_eq!(config.tick_interval_ms, 100);
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
    }

    #[test]
    fn resolved_worker_threads() {
        let mut config = ControlConfig::default();
        // 0 means auto-detect
        assert!(config.resolved_worker_threads() > 0);

        config.worker_threads = 8;
        assert_eq!(config.resolved_worker_threads(), 8);
    }

    #[test]
    fn parse_control_table() {
        let toml = r#"
[control]
worker_threads = 3
tick_interval_ms = 25
"#;
        let cfg: TaskctlConfig = toml::from_str(toml).unwrap();
        cfg.control.validate().unwrap();
        assert_eq!(cfg.control.worker_threads, 3);
        assert_eq!(cfg.control.tick_interval(), Duration::from_millis(25));
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let cfg: TaskctlConfig = toml::from_str("[control]\nworker_threads = 2\n").unwrap();
        assert_eq!(cfg.control.worker_threads, 2);
        assert_eq!(cfg.control.tick_interval_ms, 100);

        let empty: TaskctlConfig = toml::from_str("").unwrap();
        assert_eq!(empty.control, ControlConfig::default());
    }

    #[test]
    fn zero_tick_is_rejected() {
        let config = ControlConfig {
            worker_threads: 1,
            tick_interval_ms: 0,
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tick_interval_ms"));
    }

    #[test]
    fn oversized_pool_is_rejected() {
        let config = ControlConfig::with_workers(MAX_WORKER_THREADS + 1);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = toml::from_str::<TaskctlConfig>("[control\nworker_threads = 2").unwrap_err();
        let err: ConfigError = err.into();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn overrides_replace_values() {
        let vars: HashMap<&str, &str> = [
            ("TASKCTL_WORKER_THREADS", "6"),
            ("TASKCTL_TICK_INTERVAL_MS", "10"),
        ]
        .into_iter()
        .collect();

        let mut config = ControlConfig::default();
        config.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.worker_threads, 6);
        assert_eq!(config.tick_interval_ms, 10);
    }

    #[test]
    fn unparsable_overrides_are_ignored() {
        let mut config = ControlConfig::with_workers(2);
        config.apply_overrides_from(|k| match k {
            "TASKCTL_WORKER_THREADS" => Some("many".to_string()),
            _ => None,
        });
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.tick_interval_ms, 100);
    }
}
