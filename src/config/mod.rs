use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BufferSettings {
    /// Retention bound, in events, for one agent's buffer
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CleanupSettings {
    /// Minutes between cleanup sweeps
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// Subscriber idle timeout, in minutes
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: i64,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            timeout_minutes: default_timeout_minutes(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub buffer: BufferSettings,
    #[serde(default)]
    pub cleanup: CleanupSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            buffer: BufferSettings::default(),
            cleanup: CleanupSettings::default(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8520
}

fn default_max_events() -> usize {
    crate::event_bus::DEFAULT_MAX_EVENTS
}

fn default_interval_minutes() -> u64 {
    30
}

fn default_timeout_minutes() -> i64 {
    60
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with defaults
            .add_source(File::with_name("config/default").required(false))
            // Add environment-specific file
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local configuration file (not tracked by git)
            .add_source(File::with_name("config/local").required(false))
            // Add in settings from environment variables (with prefix AGENTBUS)
            .add_source(Environment::with_prefix("AGENTBUS").separator("_"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let settings = Settings::default();
        assert_eq!(settings.port, 8520);
        assert_eq!(settings.buffer.max_events, 1000);
        assert_eq!(settings.cleanup.interval_minutes, 30);
        assert_eq!(settings.cleanup.timeout_minutes, 60);
    }
}
