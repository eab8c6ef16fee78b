//! Configuration management for Envoy Fleet
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files.

use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

mod defaults;

/// Environment variable that points at an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "ENVOY_FLEET_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,

    /// Gateways known up front (seed the discovery table)
    pub gateways: Vec<GatewayConfig>,

    /// Network discovery of gateways
    pub discovery: DiscoveryConfig,

    /// Managed device behaviour
    pub devices: DevicesConfig,

    /// Device state persistence
    pub persistence: PersistenceConfig,

    /// Envoy / Enlighten client settings
    pub envoy: EnvoyConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Web server binding configuration
    pub web: WebConfig,
}

/// A statically configured gateway
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Stable gateway id (the Envoy serial number)
    pub id: String,

    /// Host name or IP address on the local network
    pub address: String,

    /// Optional per-gateway Enlighten username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Optional per-gateway Enlighten password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Browse the local network with mDNS (requires the `mdns` feature)
    pub mdns: bool,

    /// mDNS service type announced by the gateways
    pub service_type: String,
}

/// Managed device behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    /// Reset the accumulated energy counter when a serial is paired again
    pub reset_energy_on_repair: bool,
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Path of the JSON state file
    pub path: String,
}

/// Envoy client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvoyConfig {
    /// Enlighten login endpoint
    pub login_url: String,

    /// Token issuing endpoint
    pub token_url: String,

    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Directory or file path for the rolling log
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Serve the HTTP API
    pub enabled: bool,

    /// Bind address
    pub host: String,

    /// TCP port
    pub port: u16,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the environment override or the default locations
    pub fn load() -> Result<Self> {
        let config = Self::locate()?;
        config.validate()?;
        Ok(config)
    }

    fn locate() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV)
            && !path.is_empty()
        {
            return Self::from_file(path);
        }

        let default_paths = [
            "envoy_fleet.yaml",
            "/data/envoy_fleet.yaml",
            "/etc/envoy-fleet/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(FleetError::validation(
                "poll_interval_ms",
                "Must be greater than 0",
            ));
        }

        let mut seen = HashSet::new();
        for (idx, gw) in self.gateways.iter().enumerate() {
            if gw.id.trim().is_empty() {
                return Err(FleetError::validation(
                    format!("gateways[{}].id", idx),
                    "Gateway id cannot be empty",
                ));
            }
            if gw.address.trim().is_empty() {
                return Err(FleetError::validation(
                    format!("gateways[{}].address", idx),
                    "Gateway address cannot be empty",
                ));
            }
            if !seen.insert(gw.id.as_str()) {
                return Err(FleetError::validation(
                    format!("gateways[{}].id", idx),
                    format!("Duplicate gateway id {}", gw.id),
                ));
            }
        }

        if self.web.port == 0 {
            return Err(FleetError::validation(
                "web.port",
                "Port must be greater than 0",
            ));
        }

        if self.persistence.path.is_empty() {
            return Err(FleetError::validation(
                "persistence.path",
                "State file path cannot be empty",
            ));
        }

        crate::logging::parse_log_level(&self.logging.level)
            .map_err(|_| FleetError::validation("logging.level", "Unknown log level"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_interval_ms, 60_000);
        assert!(config.gateways.is_empty());
        assert!(!config.devices.reset_energy_on_repair);
        assert_eq!(config.discovery.service_type, "_enphase-envoy._tcp.local.");
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.gateways.push(GatewayConfig {
            id: "122233445566".to_string(),
            address: String::new(),
            username: None,
            password: None,
        });
        assert!(config.validate().is_err());

        config = Config::default();
        config.logging.level = "LOUD".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_gateway_ids_rejected() {
        let mut config = Config::default();
        let gw = GatewayConfig {
            id: "122233445566".to_string(),
            address: "10.0.0.5".to_string(),
            username: None,
            password: None,
        };
        config.gateways = vec![gw.clone(), gw];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate gateway id"));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "poll_interval_ms: 30000\ngateways:\n  - id: A\n    address: 10.0.0.5\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.poll_interval_ms, 30_000);
        assert_eq!(config.gateways[0].address, "10.0.0.5");
        assert_eq!(config.web.port, 8088);
    }
}
