use log::{warn, LevelFilter};
use serde::{Deserialize, Serialize};

use crate::device::constants::{DEFAULT_NAME_FILTERS, DEFAULT_SCAN_SECONDS, DEVICE_INFO_DEADLINE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    /// Case-insensitive substrings an advertised name must contain (any of).
    pub name_filters: Vec<String>,
    pub duration_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            name_filters: DEFAULT_NAME_FILTERS.iter().map(|f| f.to_string()).collect(),
            duration_secs: DEFAULT_SCAN_SECONDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HandshakeConfig {
    /// Upper bound for each transport call of the handshake. None leaves it to the transport.
    pub step_timeout_ms: Option<u64>,
    pub device_info_timeout_ms: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        HandshakeConfig {
            step_timeout_ms: None,
            device_info_timeout_ms: DEVICE_INFO_DEADLINE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub log_level: String,
    pub scan: ScanConfig,
    pub handshake: HandshakeConfig,
}

impl Config {
    pub fn log_level_filter(&self) -> LevelFilter {
        match self.log_level.parse::<LevelFilter>() {
            Ok(level) => level,
            Err(_) => {
                warn!("Unknown log level {:?} in config, using info", self.log_level);
                LevelFilter::Info
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: "info".to_string(),
            scan: ScanConfig::default(),
            handshake: HandshakeConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_is_completed_with_defaults() {
        let config: Config = serde_json::from_str(r#"{"handshake": {"stepTimeoutMs": 2000}}"#).unwrap();

        assert_eq!(config.handshake.step_timeout_ms, Some(2000));
        assert_eq!(config.handshake.device_info_timeout_ms, DEVICE_INFO_DEADLINE);
        assert_eq!(config.scan.name_filters, vec!["wp", "sig"]);
        assert_eq!(config.log_level_filter(), LevelFilter::Info);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("\"nameFilters\""));
        assert!(json.contains("\"deviceInfoTimeoutMs\""));
    }

    #[test]
    fn bad_log_level_falls_back_to_info() {
        let config = Config { log_level: "chatty".to_string(), ..Config::default() };
        assert_eq!(config.log_level_filter(), LevelFilter::Info);

        let config = Config { log_level: "debug".to_string(), ..Config::default() };
        assert_eq!(config.log_level_filter(), LevelFilter::Debug);
    }
}
