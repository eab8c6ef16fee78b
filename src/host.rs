//! Device/persistence host boundary
//!
//! The host instantiates devices and stores what the driver pushes to them.
//! Every call is fire-and-forget from the driver's point of view: a failure
//! is logged as an update propagation error and never retried.

use crate::device::{DeviceSettings, DeviceState, ManagedDevice};
use crate::error::Result;
use crate::persistence::{DeviceRecord, PersistenceManager};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Instantaneous power capability (W)
pub const CAP_MEASURE_POWER: &str = "measure_power";
/// Accumulated energy capability (kWh)
pub const CAP_METER_POWER: &str = "meter_power";
/// Store key of the energy counter (Wh)
pub const STORE_METER_WH: &str = "meter_power_wh";

/// Contract of the device/persistence host
#[async_trait]
pub trait DeviceHost: Send + Sync {
    /// Devices the host already knows about, with their stored counters
    async fn load_devices(&self) -> Result<Vec<ManagedDevice>>;

    /// Create or update a device with its settings and energy counter
    async fn save_device(&self, device: &ManagedDevice) -> Result<()>;

    async fn forget_device(&self, serial: &str) -> Result<()>;

    async fn set_settings(&self, serial: &str, settings: &DeviceSettings) -> Result<()>;

    async fn set_capability_value(&self, serial: &str, capability: &str, value: f64) -> Result<()>;

    async fn set_store_value(&self, serial: &str, key: &str, value: f64) -> Result<()>;

    async fn set_available(&self, serial: &str) -> Result<()>;

    async fn set_unavailable(&self, serial: &str, reason: &str) -> Result<()>;
}

/// Host backed by the JSON state file
pub struct FileDeviceHost {
    persistence: Mutex<PersistenceManager>,
}

impl FileDeviceHost {
    /// Open the state file at `path`, tolerating a missing file
    pub fn open(path: &str) -> Result<Self> {
        let mut persistence = PersistenceManager::new(path);
        persistence.load()?;
        Ok(Self {
            persistence: Mutex::new(persistence),
        })
    }

    pub async fn record(&self, serial: &str) -> Option<DeviceRecord> {
        self.persistence.lock().await.device(serial).cloned()
    }
}

#[async_trait]
impl DeviceHost for FileDeviceHost {
    async fn load_devices(&self) -> Result<Vec<ManagedDevice>> {
        let persistence = self.persistence.lock().await;
        Ok(persistence
            .devices()
            .map(|record| {
                let energy_wh = persistence
                    .get_store_value::<f64>(&record.serial, STORE_METER_WH)
                    .unwrap_or(0.0);
                let mut state = DeviceState::with_energy(energy_wh);
                state.power_w = record
                    .capabilities
                    .get(CAP_MEASURE_POWER)
                    .copied()
                    .unwrap_or(0.0);
                ManagedDevice {
                    serial: record.serial.clone(),
                    name: record.name.clone(),
                    settings: record.settings.clone(),
                    state,
                }
            })
            .collect())
    }

    async fn save_device(&self, device: &ManagedDevice) -> Result<()> {
        let mut persistence = self.persistence.lock().await;
        persistence.upsert_device(DeviceRecord::new(
            &device.serial,
            &device.name,
            device.settings.clone(),
        ));
        persistence.set_store_value(&device.serial, STORE_METER_WH, device.state.energy_wh)?;
        persistence.save()
    }

    async fn forget_device(&self, serial: &str) -> Result<()> {
        let mut persistence = self.persistence.lock().await;
        if persistence.remove_device(serial) {
            persistence.save()?;
        }
        Ok(())
    }

    async fn set_settings(&self, serial: &str, settings: &DeviceSettings) -> Result<()> {
        let mut persistence = self.persistence.lock().await;
        persistence.set_settings(serial, settings)?;
        persistence.save()
    }

    async fn set_capability_value(&self, serial: &str, capability: &str, value: f64) -> Result<()> {
        let mut persistence = self.persistence.lock().await;
        persistence.set_capability(serial, capability, value)?;
        persistence.save()
    }

    async fn set_store_value(&self, serial: &str, key: &str, value: f64) -> Result<()> {
        let mut persistence = self.persistence.lock().await;
        persistence.set_store_value(serial, key, value)?;
        persistence.save()
    }

    async fn set_available(&self, serial: &str) -> Result<()> {
        let mut persistence = self.persistence.lock().await;
        persistence.set_available(serial, true, None)?;
        persistence.save()
    }

    async fn set_unavailable(&self, serial: &str, reason: &str) -> Result<()> {
        let mut persistence = self.persistence.lock().await;
        persistence.set_available(serial, false, Some(reason))?;
        persistence.save()
    }
}
