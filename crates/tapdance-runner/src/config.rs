//! Runner configuration: watchdog duration and capture-file scratch directory.
//!
//! Optional `tapdance.toml` in the current directory, environment variables
//! on top, defaults otherwise — layered the same way the build tool's own
//! `Config::load()` reads workspace metadata, just with environment
//! variables standing in for the CLI flags this harness doesn't have.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_WATCHDOG_SECS: u64 = 10;

#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    runner: Option<TomlRunnerSection>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlRunnerSection {
    watchdog_secs: Option<u64>,
    capture_dir: Option<PathBuf>,
}

/// Resolved runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Wall-clock limit for a single test's child process.
    pub watchdog: Duration,
    /// Directory in which capture files are created.
    pub capture_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            watchdog: Duration::from_secs(DEFAULT_WATCHDOG_SECS),
            capture_dir: std::env::temp_dir(),
        }
    }
}

impl RunnerConfig {
    /// Loads configuration: `tapdance.toml` (if present) supplies a base,
    /// `TAPDANCE_WATCHDOG_SECS` / `TAPDANCE_CAPTURE_DIR` override it, and
    /// defaults fill in anything neither source set.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        let toml_path = PathBuf::from("tapdance.toml");
        if toml_path.exists() {
            let content = std::fs::read_to_string(&toml_path)
                .with_context(|| format!("failed to read {}", toml_path.display()))?;
            let parsed: TomlConfig =
                toml::from_str(&content).context("failed to parse tapdance.toml")?;
            if let Some(runner) = parsed.runner {
                if let Some(secs) = runner.watchdog_secs {
                    config.watchdog = Duration::from_secs(secs);
                }
                if let Some(dir) = runner.capture_dir {
                    config.capture_dir = dir;
                }
            }
        }

        if let Some(secs) = env_u64("TAPDANCE_WATCHDOG_SECS")? {
            config.watchdog = Duration::from_secs(secs);
        }
        if let Some(dir) = std::env::var_os("TAPDANCE_CAPTURE_DIR") {
            config.capture_dir = PathBuf::from(dir);
        }

        Ok(config)
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var_os(name) {
        None => Ok(None),
        Some(raw) => {
            let s = raw
                .to_str()
                .with_context(|| format!("{name} is not valid UTF-8"))?;
            let n: u64 = s
                .parse()
                .with_context(|| format!("{name}={s:?} is not a valid integer"))?;
            Ok(Some(n))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_ten_second_watchdog_in_system_temp_dir() {
        let config = RunnerConfig::default();
        assert_eq!(config.watchdog, Duration::from_secs(10));
        assert_eq!(config.capture_dir, std::env::temp_dir());
    }
}
