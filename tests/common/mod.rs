#![allow(dead_code)]

use async_trait::async_trait;
use envoy_fleet::config::{Config, GatewayConfig};
use envoy_fleet::device::{DeviceSettings, ManagedDevice};
use envoy_fleet::discovery::DiscoveryTable;
use envoy_fleet::driver::FleetDriver;
use envoy_fleet::error::{FleetError, Result};
use envoy_fleet::gateway::{
    Credentials, GatewayClient, GatewayConnector, InverterInfo, InverterProduction,
};
use envoy_fleet::host::DeviceHost;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub const PASSWORD: &str = "secret";

#[derive(Default)]
struct GatewayState {
    /// Production per endpoint id
    readings: HashMap<String, Vec<(String, f64)>>,
    /// Endpoint ids whose fetches fail with a transport error
    failing: HashSet<String>,
    /// Addresses that refuse connections
    unreachable: HashSet<String>,
    /// (id, address, username) per connect call
    connects: Vec<(String, String, String)>,
    production_fetches: usize,
}

/// In-memory stand-in for the Envoy gateways and the vendor cloud
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<GatewayState>>,
    /// Yield once inside `connect` so concurrent callers interleave
    yield_on_connect: bool,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose `connect` suspends once before answering
    pub fn yielding() -> Self {
        Self {
            yield_on_connect: true,
            ..Self::default()
        }
    }

    pub fn set_readings(&self, endpoint_id: &str, readings: &[(&str, f64)]) {
        self.state.lock().unwrap().readings.insert(
            endpoint_id.to_string(),
            readings.iter().map(|(s, w)| (s.to_string(), *w)).collect(),
        );
    }

    pub fn fail_fetches(&self, endpoint_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(endpoint_id.to_string());
    }

    pub fn set_unreachable(&self, address: &str) {
        self.state
            .lock()
            .unwrap()
            .unreachable
            .insert(address.to_string());
    }

    pub fn connects(&self) -> Vec<(String, String, String)> {
        self.state.lock().unwrap().connects.clone()
    }

    pub fn production_fetches(&self) -> usize {
        self.state.lock().unwrap().production_fetches
    }
}

struct FakeClient {
    id: String,
    state: Arc<Mutex<GatewayState>>,
}

#[async_trait]
impl GatewayClient for FakeClient {
    async fn fetch_inventory(&self) -> Result<Vec<InverterInfo>> {
        let state = self.state.lock().unwrap();
        if state.failing.contains(&self.id) {
            return Err(FleetError::network("connection reset"));
        }
        Ok(state
            .readings
            .get(&self.id)
            .map(|r| {
                r.iter()
                    .map(|(serial, _)| InverterInfo {
                        serial_number: serial.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_production(&self) -> Result<Vec<InverterProduction>> {
        let mut state = self.state.lock().unwrap();
        state.production_fetches += 1;
        if state.failing.contains(&self.id) {
            return Err(FleetError::timeout("gateway did not answer"));
        }
        Ok(state
            .readings
            .get(&self.id)
            .map(|r| {
                r.iter()
                    .map(|(serial, watts)| InverterProduction {
                        serial_number: serial.clone(),
                        last_report_watts: *watts,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl GatewayConnector for FakeConnector {
    async fn verify_credentials(&self, credentials: &Credentials) -> Result<()> {
        if credentials.password == PASSWORD {
            Ok(())
        } else {
            Err(FleetError::auth("Invalid credentials"))
        }
    }

    async fn connect(
        &self,
        credentials: &Credentials,
        address: &str,
        id: &str,
    ) -> Result<Box<dyn GatewayClient>> {
        {
            let mut state = self.state.lock().unwrap();
            state.connects.push((
                id.to_string(),
                address.to_string(),
                credentials.username.clone(),
            ));
            if state.unreachable.contains(address) {
                return Err(FleetError::network(format!("{} unreachable", address)));
            }
        }
        if self.yield_on_connect {
            tokio::task::yield_now().await;
        }
        self.verify_credentials(credentials).await?;
        Ok(Box::new(FakeClient {
            id: id.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

#[derive(Default)]
struct HostState {
    devices: Vec<ManagedDevice>,
    settings: HashMap<String, DeviceSettings>,
    capabilities: HashMap<(String, String), f64>,
    store: HashMap<(String, String), f64>,
    available: HashMap<String, bool>,
    forgotten: Vec<String>,
    broken: HashSet<String>,
}

/// Host that keeps everything in memory
#[derive(Clone, Default)]
pub struct MemoryHost {
    state: Arc<Mutex<HostState>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host that already knows these devices at startup
    pub fn with_devices(devices: Vec<ManagedDevice>) -> Self {
        let host = Self::new();
        host.state.lock().unwrap().devices = devices;
        host
    }

    /// Every push for this serial fails
    pub fn break_device(&self, serial: &str) {
        self.state
            .lock()
            .unwrap()
            .broken
            .insert(serial.to_string());
    }

    pub fn capability(&self, serial: &str, capability: &str) -> Option<f64> {
        self.state
            .lock()
            .unwrap()
            .capabilities
            .get(&(serial.to_string(), capability.to_string()))
            .copied()
    }

    pub fn store_value(&self, serial: &str, key: &str) -> Option<f64> {
        self.state
            .lock()
            .unwrap()
            .store
            .get(&(serial.to_string(), key.to_string()))
            .copied()
    }

    pub fn settings(&self, serial: &str) -> Option<DeviceSettings> {
        self.state.lock().unwrap().settings.get(serial).cloned()
    }

    pub fn is_available(&self, serial: &str) -> Option<bool> {
        self.state.lock().unwrap().available.get(serial).copied()
    }

    pub fn forgotten(&self) -> Vec<String> {
        self.state.lock().unwrap().forgotten.clone()
    }

    fn check(&self, serial: &str) -> Result<()> {
        if self.state.lock().unwrap().broken.contains(serial) {
            Err(FleetError::io("host rejected the update"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DeviceHost for MemoryHost {
    async fn load_devices(&self) -> Result<Vec<ManagedDevice>> {
        Ok(self.state.lock().unwrap().devices.clone())
    }

    async fn save_device(&self, device: &ManagedDevice) -> Result<()> {
        self.check(&device.serial)?;
        let mut state = self.state.lock().unwrap();
        state
            .settings
            .insert(device.serial.clone(), device.settings.clone());
        state.store.insert(
            (device.serial.clone(), "meter_power_wh".to_string()),
            device.state.energy_wh,
        );
        Ok(())
    }

    async fn forget_device(&self, serial: &str) -> Result<()> {
        self.state.lock().unwrap().forgotten.push(serial.to_string());
        Ok(())
    }

    async fn set_settings(&self, serial: &str, settings: &DeviceSettings) -> Result<()> {
        self.check(serial)?;
        self.state
            .lock()
            .unwrap()
            .settings
            .insert(serial.to_string(), settings.clone());
        Ok(())
    }

    async fn set_capability_value(&self, serial: &str, capability: &str, value: f64) -> Result<()> {
        self.check(serial)?;
        self.state
            .lock()
            .unwrap()
            .capabilities
            .insert((serial.to_string(), capability.to_string()), value);
        Ok(())
    }

    async fn set_store_value(&self, serial: &str, key: &str, value: f64) -> Result<()> {
        self.check(serial)?;
        self.state
            .lock()
            .unwrap()
            .store
            .insert((serial.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn set_available(&self, serial: &str) -> Result<()> {
        self.check(serial)?;
        self.state
            .lock()
            .unwrap()
            .available
            .insert(serial.to_string(), true);
        Ok(())
    }

    async fn set_unavailable(&self, serial: &str, _reason: &str) -> Result<()> {
        self.check(serial)?;
        self.state
            .lock()
            .unwrap()
            .available
            .insert(serial.to_string(), false);
        Ok(())
    }
}

pub fn settings(endpoint_id: &str, address: &str) -> DeviceSettings {
    DeviceSettings {
        username: "owner@example.com".to_string(),
        password: PASSWORD.to_string(),
        address: address.to_string(),
        id: endpoint_id.to_string(),
    }
}

pub fn device(serial: &str, endpoint_id: &str, address: &str) -> ManagedDevice {
    ManagedDevice::new(serial, settings(endpoint_id, address))
}

/// Discovery table knowing the given `(id, address)` gateways
pub fn table(gateways: &[(&str, &str)]) -> Arc<DiscoveryTable> {
    let table = DiscoveryTable::new();
    for (id, address) in gateways {
        table.announce(id, address);
    }
    Arc::new(table)
}

/// Discovery table with one gateway carrying its own account
pub fn table_with_account(id: &str, address: &str, username: &str) -> Arc<DiscoveryTable> {
    Arc::new(DiscoveryTable::from_gateways(&[GatewayConfig {
        id: id.to_string(),
        address: address.to_string(),
        username: Some(username.to_string()),
        password: Some(PASSWORD.to_string()),
    }]))
}

pub fn config() -> Config {
    Config::default()
}

pub fn driver(
    connector: &FakeConnector,
    discovery: &Arc<DiscoveryTable>,
    host: &MemoryHost,
) -> FleetDriver {
    driver_with_config(config(), connector, discovery, host)
}

pub fn driver_with_config(
    config: Config,
    connector: &FakeConnector,
    discovery: &Arc<DiscoveryTable>,
    host: &MemoryHost,
) -> FleetDriver {
    try_driver_with_config(config, connector, discovery, host).unwrap()
}

pub fn try_driver_with_config(
    config: Config,
    connector: &FakeConnector,
    discovery: &Arc<DiscoveryTable>,
    host: &MemoryHost,
) -> Result<FleetDriver> {
    FleetDriver::new(
        config,
        Arc::new(connector.clone()),
        discovery.clone(),
        Arc::new(host.clone()),
    )
}
