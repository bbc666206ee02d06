use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

use crate::led_logic::arbiter::CHANNEL_COUNT;

/// A single alert definition as written in the config file. Definitions are
/// immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDef {
    pub name: String,
    pub channel: usize,
    pub color: String,
    /// Lower value wins the channel; omitted values fall back to declaration
    /// order.
    #[serde(default)]
    pub priority: Option<i64>,
}

/// Fully resolved definition handed to the arbiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub name: String,
    pub channel: usize,
    pub color: String,
    pub priority: i64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("alert `{name}`: channel {channel} outside 0..={max}")]
    ChannelOutOfRange {
        name: String,
        channel: usize,
        max: usize,
    },
    #[error("alert `{0}` defined twice")]
    DuplicateAlert(String),
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "LED alert multiplexer server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "LED_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "LED_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "LED_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "LED_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    /// Alert definitions only come from the config file, never the command
    /// line.
    #[clap(skip)]
    #[serde(default)]
    pub alerts: Vec<AlertDef>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            alerts: if other.alerts.is_empty() {
                self.alerts
            } else {
                other.alerts
            },
        }
    }

    /// Apply declaration-order default priorities and validate channel range
    /// and name uniqueness. A definition that can never fire correctly is a
    /// startup error, not a warning.
    pub fn resolved_alerts(&self) -> Result<Vec<Alert>, ConfigError> {
        let mut next_default = 0;
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(self.alerts.len());
        for def in &self.alerts {
            if def.channel >= CHANNEL_COUNT {
                return Err(ConfigError::ChannelOutOfRange {
                    name: def.name.clone(),
                    channel: def.channel,
                    max: CHANNEL_COUNT - 1,
                });
            }
            if !seen.insert(def.name.clone()) {
                return Err(ConfigError::DuplicateAlert(def.name.clone()));
            }
            let priority = match def.priority {
                Some(priority) => priority,
                None => {
                    let priority = next_default;
                    next_default += 1;
                    priority
                }
            };
            resolved.push(Alert {
                name: def.name.clone(),
                channel: def.channel,
                color: def.color.clone(),
                priority,
            });
        }
        Ok(resolved)
    }
}

pub fn load_config() -> Config {
    // 1. Defaults
    let default_config = Config {
        port: Some(9099),
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        ..Default::default()
    };

    // 2. Config file (server_led.conf) if present. The file path itself can
    //    be overridden on the command line or via LED_CONFIG_PATH.
    let cli_args = Config::parse();
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_led.conf"));

    let mut current_config = default_config;
    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
                Ok(file_config) => current_config = current_config.merge(file_config),
                Err(e) => log::warn!(
                    "Failed to parse config file {}: {}",
                    config_file_path.display(),
                    e
                ),
            },
            Err(e) => log::warn!(
                "Failed to read config file {}: {}",
                config_file_path.display(),
                e
            ),
        }
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    // 3. Environment variables and CLI arguments override the file.
    current_config.merge(cli_args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn def(name: &str, channel: usize, priority: Option<i64>) -> AlertDef {
        AlertDef {
            name: name.to_string(),
            channel,
            color: "red".to_string(),
            priority,
        }
    }

    #[test]
    fn default_priorities_follow_declaration_order() {
        let config = Config {
            alerts: vec![
                def("build-failed", 0, None),
                def("meeting-soon", 0, Some(5)),
                def("mail-unread", 1, None),
            ],
            ..Default::default()
        };
        let resolved = config.resolved_alerts().unwrap();
        assert_eq!(resolved[0].priority, 0);
        assert_eq!(resolved[1].priority, 5);
        assert_eq!(resolved[2].priority, 1);
    }

    #[test]
    fn rejects_out_of_range_channels() {
        let config = Config {
            alerts: vec![def("bad", CHANNEL_COUNT, None)],
            ..Default::default()
        };
        assert!(matches!(
            config.resolved_alerts(),
            Err(ConfigError::ChannelOutOfRange { channel, .. }) if channel == CHANNEL_COUNT
        ));
    }

    #[test]
    fn rejects_duplicate_names() {
        let config = Config {
            alerts: vec![def("twice", 0, None), def("twice", 1, None)],
            ..Default::default()
        };
        assert!(matches!(
            config.resolved_alerts(),
            Err(ConfigError::DuplicateAlert(name)) if name == "twice"
        ));
    }

    #[test]
    fn later_layers_override_earlier_ones() {
        let defaults = Config {
            port: Some(9099),
            log_level: Some("info".to_string()),
            ..Default::default()
        };
        let file = Config {
            port: Some(9100),
            alerts: vec![def("build-failed", 0, None)],
            ..Default::default()
        };
        let cli = Config {
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        let merged = defaults.merge(file).merge(cli);
        assert_eq!(merged.port, Some(9100));
        assert_eq!(merged.log_level.as_deref(), Some("debug"));
        assert_eq!(merged.alerts.len(), 1);
    }

    #[test]
    fn parses_a_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "port": 9100,
                "logLevel": "debug",
                "alerts": [
                    {{ "name": "build-failed", "channel": 0, "color": "red" }},
                    {{ "name": "meeting-soon", "channel": 0, "color": "blue", "priority": 7 }}
                ]
            }}"#
        )
        .unwrap();

        let parsed: Config =
            serde_json::from_str(&fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(parsed.port, Some(9100));
        assert_eq!(parsed.log_level.as_deref(), Some("debug"));
        assert_eq!(parsed.alerts.len(), 2);
        assert_eq!(parsed.alerts[1].priority, Some(7));
    }
}
