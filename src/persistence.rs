//! Persistence layer for device state
//!
//! This module handles saving and loading the managed devices (settings,
//! store values, last capability values) across restarts.

use crate::device::DeviceSettings;
use crate::error::{FleetError, Result};
use crate::logging::get_logger;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One persisted device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub serial: String,
    pub name: String,
    pub settings: DeviceSettings,

    /// Free-form per-device store (energy counter lives here)
    #[serde(default)]
    pub store: BTreeMap<String, serde_json::Value>,

    /// Last value pushed per capability
    #[serde(default)]
    pub capabilities: BTreeMap<String, f64>,

    #[serde(default)]
    pub available: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable_reason: Option<String>,
}

impl DeviceRecord {
    pub fn new(serial: &str, name: &str, settings: DeviceSettings) -> Self {
        Self {
            serial: serial.to_string(),
            name: name.to_string(),
            settings,
            store: BTreeMap::new(),
            capabilities: BTreeMap::new(),
            available: false,
            unavailable_reason: None,
        }
    }
}

/// Persistent state structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistentState {
    /// Devices keyed by serial
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceRecord>,
}

/// Persistence manager
pub struct PersistenceManager {
    file_path: String,
    state: PersistentState,
    logger: crate::logging::StructuredLogger,
}

impl PersistenceManager {
    /// Create a new persistence manager
    pub fn new(file_path: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
            state: PersistentState::default(),
            logger: get_logger("persistence"),
        }
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Load state from disk; a missing file leaves the defaults in place
    pub fn load(&mut self) -> Result<()> {
        let path = Path::new(&self.file_path);

        if !path.exists() {
            self.logger
                .info("No persistent state file found, using defaults");
            return Ok(());
        }

        let contents = std::fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            self.logger.info("Persistent state file is empty, using defaults");
            return Ok(());
        }
        self.state = serde_json::from_str(&contents)?;
        self.logger.info(&format!(
            "Loaded persistent state with {} devices",
            self.state.devices.len()
        ));

        Ok(())
    }

    /// Save state to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = Path::new(&self.file_path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.file_path, contents)?;
        self.logger.debug("Saved persistent state to disk");

        Ok(())
    }

    pub fn state(&self) -> &PersistentState {
        &self.state
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.state.devices.values()
    }

    pub fn device(&self, serial: &str) -> Option<&DeviceRecord> {
        self.state.devices.get(serial)
    }

    /// Insert or replace a device record, keeping its store and capabilities
    /// when one already exists
    pub fn upsert_device(&mut self, record: DeviceRecord) {
        match self.state.devices.get_mut(&record.serial) {
            Some(existing) => {
                existing.name = record.name;
                existing.settings = record.settings;
                existing.store.extend(record.store);
                existing.capabilities.extend(record.capabilities);
            }
            None => {
                self.state.devices.insert(record.serial.clone(), record);
            }
        }
    }

    /// Remove a device; returns whether it existed
    pub fn remove_device(&mut self, serial: &str) -> bool {
        self.state.devices.remove(serial).is_some()
    }

    fn device_mut(&mut self, serial: &str) -> Result<&mut DeviceRecord> {
        self.state
            .devices
            .get_mut(serial)
            .ok_or_else(|| FleetError::validation("device", format!("Unknown device {}", serial)))
    }

    pub fn set_settings(&mut self, serial: &str, settings: &DeviceSettings) -> Result<()> {
        self.device_mut(serial)?.settings = settings.clone();
        Ok(())
    }

    /// Get a typed value from a device store
    pub fn get_store_value<T: for<'de> Deserialize<'de>>(&self, serial: &str, key: &str) -> Option<T> {
        self.state
            .devices
            .get(serial)
            .and_then(|d| d.store.get(key))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Set a value in a device store
    pub fn set_store_value<T: Serialize>(&mut self, serial: &str, key: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.device_mut(serial)?.store.insert(key.to_string(), value);
        Ok(())
    }

    pub fn set_capability(&mut self, serial: &str, capability: &str, value: f64) -> Result<()> {
        self.device_mut(serial)?
            .capabilities
            .insert(capability.to_string(), value);
        Ok(())
    }

    pub fn set_available(&mut self, serial: &str, available: bool, reason: Option<&str>) -> Result<()> {
        let record = self.device_mut(serial)?;
        record.available = available;
        record.unavailable_reason = reason.map(str::to_string);
        Ok(())
    }
}
