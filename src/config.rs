//! Application-level configuration loading, including countdown and room-code tuning knobs.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZDASH_BACK_CONFIG_PATH";

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Remaining seconds at which a running question countdown flips into alert mode.
    pub alert_threshold_secs: u32,
    /// Factor by which the tick interval shrinks while alert mode is active.
    pub alert_tick_divisor: u32,
    /// Number of digits in a freshly generated room code.
    pub room_code_digits: u32,
    /// How many collisions are tolerated before the code space is widened.
    pub room_code_retry_bound: u32,
    /// Base interval between countdown ticks.
    pub tick_millis: u64,
    /// Seconds a newly created session counts down before the game starts when
    /// the organizer does not provide a value.
    pub default_start_countdown_secs: u32,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded configuration from file");
                    config
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

    /// Interval between ticks while the countdown runs normally.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    /// Shortened interval between ticks once alert mode is active.
    pub fn alert_tick_interval(&self) -> Duration {
        let divisor = self.alert_tick_divisor.max(1) as u64;
        Duration::from_millis((self.tick_millis / divisor).max(50))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            alert_threshold_secs: 10,
            alert_tick_divisor: 4,
            room_code_digits: 4,
            room_code_retry_bound: 64,
            tick_millis: 1000,
            default_start_countdown_secs: 5,
        }
    }
}

/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
///
/// Every field is optional so operators only override what they need.
#[derive(Debug, Deserialize)]
struct RawConfig {
    alert_threshold_secs: Option<u32>,
    alert_tick_divisor: Option<u32>,
    room_code_digits: Option<u32>,
    room_code_retry_bound: Option<u32>,
    tick_millis: Option<u64>,
    default_start_countdown_secs: Option<u32>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            alert_threshold_secs: value
                .alert_threshold_secs
                .unwrap_or(defaults.alert_threshold_secs),
            alert_tick_divisor: value
                .alert_tick_divisor
                .unwrap_or(defaults.alert_tick_divisor)
                .max(1),
            room_code_digits: value
                .room_code_digits
                .unwrap_or(defaults.room_code_digits)
                .clamp(3, 8),
            room_code_retry_bound: value
                .room_code_retry_bound
                .unwrap_or(defaults.room_code_retry_bound)
                .max(1),
            tick_millis: value.tick_millis.unwrap_or(defaults.tick_millis).max(100),
            default_start_countdown_secs: value
                .default_start_countdown_secs
                .unwrap_or(defaults.default_start_countdown_secs)
                .max(1),
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
