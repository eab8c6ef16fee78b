//! Managed devices and their per-device energy accumulator

use crate::gateway::Credentials;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Settings stored with a device at pairing time
///
/// `address` and the credentials are a redundant copy of the endpoint's,
/// used to detect drift; `id` binds the device to its endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeviceSettings {
    pub username: String,
    pub password: String,
    pub address: String,
    pub id: String,
}

impl DeviceSettings {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }
}

impl std::fmt::Debug for DeviceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSettings")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("address", &self.address)
            .field("id", &self.id)
            .finish()
    }
}

/// Live values of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeviceState {
    /// Instantaneous power in W
    pub power_w: f64,
    /// Accumulated energy in Wh
    pub energy_wh: f64,
    pub available: bool,
}

impl DeviceState {
    /// State restored with a previously accumulated counter
    pub fn with_energy(energy_wh: f64) -> Self {
        Self {
            energy_wh: energy_wh.max(0.0),
            ..Self::default()
        }
    }

    /// Apply one poll reading, assuming exactly `interval` elapsed since the
    /// previous one. Returns the energy added in Wh.
    pub fn apply_reading(&mut self, watts: f64, interval: Duration) -> f64 {
        self.power_w = watts;
        // Negative readings update power but never wind the counter back
        let increment = (watts * interval.as_millis() as f64 / MS_PER_HOUR).max(0.0);
        self.energy_wh += increment;
        self.available = true;
        increment
    }

    pub fn mark_unavailable(&mut self) {
        self.available = false;
    }

    pub fn reset_energy(&mut self) {
        self.energy_wh = 0.0;
    }

    /// Accumulated energy in kWh
    pub fn energy_kwh(&self) -> f64 {
        self.energy_wh / 1000.0
    }
}

/// A logical device bound to one inverter serial
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedDevice {
    pub serial: String,
    pub name: String,
    pub settings: DeviceSettings,
    pub state: DeviceState,
}

impl ManagedDevice {
    pub fn new<S: Into<String>>(serial: S, settings: DeviceSettings) -> Self {
        let serial = serial.into();
        Self {
            name: format!("IQ {}", serial),
            serial,
            settings,
            state: DeviceState::default(),
        }
    }

    /// Endpoint the device is currently bound to
    pub fn endpoint_id(&self) -> &str {
        &self.settings.id
    }
}

/// Managed devices keyed by serial number
#[derive(Debug, Default)]
pub struct DeviceSet {
    devices: BTreeMap<String, ManagedDevice>,
}

impl DeviceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by serial; returns the replaced device
    pub fn insert(&mut self, device: ManagedDevice) -> Option<ManagedDevice> {
        self.devices.insert(device.serial.clone(), device)
    }

    pub fn remove(&mut self, serial: &str) -> Option<ManagedDevice> {
        self.devices.remove(serial)
    }

    pub fn get(&self, serial: &str) -> Option<&ManagedDevice> {
        self.devices.get(serial)
    }

    pub fn get_mut(&mut self, serial: &str) -> Option<&mut ManagedDevice> {
        self.devices.get_mut(serial)
    }

    pub fn contains(&self, serial: &str) -> bool {
        self.devices.contains_key(serial)
    }

    /// Serials of the devices bound to `endpoint_id`
    pub fn bound_to(&self, endpoint_id: &str) -> Vec<String> {
        self.devices
            .values()
            .filter(|d| d.endpoint_id() == endpoint_id)
            .map(|d| d.serial.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManagedDevice> {
        self.devices.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ManagedDevice> {
        self.devices.values_mut()
    }

    pub fn serials(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
