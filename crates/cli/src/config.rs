use std::path::Path;

use anyhow::{Context, Result};
use taskctl_core::{ControlConfig, TaskctlConfig};
use tracing::debug;

use crate::cli::CliArgs;

/// Load the config file when one is given, otherwise defaults plus
/// environment overrides. Command-line flags win over both.
pub fn load(args: &CliArgs) -> Result<TaskctlConfig> {
    let mut config = match args.config.as_deref() {
        Some(path) => {
            debug!(path, "Loading config");
            TaskctlConfig::from_file(Path::new(path))
                .with_context(|| format!("failed to load config: {path}"))?
        }
        None => {
            debug!("No config file given, using defaults");
            TaskctlConfig::from_env().context("invalid environment configuration")?
        }
    };

    apply_args(&mut config.control, args);
    config
        .control
        .validate()
        .context("invalid command-line overrides")?;
    Ok(config)
}

fn apply_args(control: &mut ControlConfig, args: &CliArgs) {
    if let Some(workers) = args.workers {
        control.worker_threads = workers;
    }
    if let Some(tick_ms) = args.tick_ms {
        control.tick_interval_ms = tick_ms;
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = CliArgs::parse_from(["taskctl", "--workers", "2", "--tick-ms", "15"]);
        let mut control = ControlConfig::with_workers(8);
        apply_args(&mut control, &args);
        assert_eq!(control.worker_threads, 2);
        assert_eq!(control.tick_interval_ms, 15);
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let args = CliArgs::parse_from(["taskctl"]);
        let mut control = ControlConfig::with_workers(8);
        apply_args(&mut control, &args);
        assert_eq!(control, ControlConfig::with_workers(8));
    }

    #[test]
    fn test_zero_tick_flag_rejected() {
        let args = CliArgs::parse_from(["taskctl", "--tick-ms", "0"]);
        assert!(load(&args).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let args = CliArgs::parse_from(["taskctl", "--config", "/nonexistent/taskctl.toml"]);
        let err = load(&args).unwrap_err();
        assert!(format!("{err:#}").contains("failed to load config"));
    }
}
