use crate::device::{DeviceSettings, ManagedDevice};
use crate::error::Result;
use crate::gateway::SessionState;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Main driver state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DriverState {
    /// Driver is initializing
    Initializing,
    /// Driver is running normally
    Running,
    /// Driver is shutting down
    ShuttingDown,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Established endpoints whose production fetch succeeded
    pub endpoints_polled: usize,
    /// Established endpoints whose fetch failed and degraded
    pub endpoints_failed: usize,
    /// Serials that received a reading, in serial order
    pub devices_updated: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSnapshot {
    pub id: String,
    pub address: String,
    pub session: String,
    pub last_error: Option<String>,
    pub devices: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub serial: String,
    pub name: String,
    pub endpoint_id: String,
    pub power_w: f64,
    pub energy_kwh: f64,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub timestamp: String,
    pub driver_state: String,
    pub polling: bool,
    pub poll_interval_ms: u64,
    pub total_polls: u64,
    pub last_tick: Option<TickReport>,
    pub endpoints: Vec<EndpointSnapshot>,
    pub devices: Vec<DeviceSnapshot>,
}

/// Commands accepted by the driver from external components (web, etc.)
#[derive(Debug)]
pub enum DriverCommand {
    /// Add (or re-pair) a device and start it
    AddDevice {
        device: ManagedDevice,
        reply: oneshot::Sender<Result<SessionState>>,
    },
    /// Replace a device's settings and restart it
    UpdateSettings {
        serial: String,
        settings: DeviceSettings,
        reply: oneshot::Sender<Result<SessionState>>,
    },
    /// Remove a device; replies whether it existed
    RemoveDevice {
        serial: String,
        reply: oneshot::Sender<bool>,
    },
    /// Run one reconciliation pass out of band
    PollNow { reply: oneshot::Sender<TickReport> },
    Shutdown,
}
