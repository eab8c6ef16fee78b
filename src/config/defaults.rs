use super::*;

/// Fixed gateway polling interval
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 60_000;

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mdns: false,
            service_type: "_enphase-envoy._tcp.local.".to_string(),
        }
    }
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            reset_energy_on_repair: false,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: "/data/envoy_fleet_state.json".to_string(),
        }
    }
}

impl Default for EnvoyConfig {
    fn default() -> Self {
        Self {
            login_url: "https://enlighten.enphaseenergy.com/login/login.json".to_string(),
            token_url: "https://entrez.enphaseenergy.com/tokens".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/envoy-fleet.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8088,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            gateways: Vec::new(),
            discovery: DiscoveryConfig::default(),
            devices: DevicesConfig::default(),
            persistence: PersistenceConfig::default(),
            envoy: EnvoyConfig::default(),
            logging: LoggingConfig::default(),
            web: WebConfig::default(),
        }
    }
}
