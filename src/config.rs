//! Application-level configuration loading: clock cadence, liveness windows and input bounds.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "ARENA_BACK_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Period of one clock unit.
    pub clock_tick: Duration,
    /// Period of the clock-sync broadcast.
    pub sync_interval: Duration,
    /// Largest tolerated gap between two liveness acknowledgements.
    pub liveness_window: Duration,
    /// Period of the liveness check.
    pub liveness_check_interval: Duration,
    /// Time allowed for the identity claim after the upgrade.
    pub ident_timeout: Duration,
    /// Upper bound on the base minutes of a time control.
    pub max_base_minutes: u32,
    /// Upper bound on the increment seconds of a time control.
    pub max_increment_secs: u32,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        clock_tick_ms = app_config.clock_tick.as_millis() as u64,
                        liveness_window_secs = app_config.liveness_window.as_secs(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    clock_tick_ms: u64,
    sync_interval_ms: u64,
    liveness_window_secs: u64,
    liveness_check_interval_secs: u64,
    ident_timeout_secs: u64,
    max_base_minutes: u32,
    max_increment_secs: u32,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            clock_tick_ms: 1000,
            sync_interval_ms: 250,
            liveness_window_secs: 30 * 60,
            liveness_check_interval_secs: 30,
            ident_timeout_secs: 10,
            max_base_minutes: 180,
            max_increment_secs: 180,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        // Zero periods would spin the timer loops.
        Self {
            clock_tick: Duration::from_millis(value.clock_tick_ms.max(1)),
            sync_interval: Duration::from_millis(value.sync_interval_ms.max(1)),
            liveness_window: Duration::from_secs(value.liveness_window_secs),
            liveness_check_interval: Duration::from_secs(value.liveness_check_interval_secs.max(1)),
            ident_timeout: Duration::from_secs(value.ident_timeout_secs),
            max_base_minutes: value.max_base_minutes,
            max_increment_secs: value.max_increment_secs,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
