use super::types::{DeviceSnapshot, DriverState, EndpointSnapshot, FleetSnapshot};
use super::FleetDriver;
use crate::config::Config;
use std::sync::Arc;

/// Snapshot published before the driver has started
pub(super) fn empty(config: &Config) -> FleetSnapshot {
    FleetSnapshot {
        timestamp: chrono::Utc::now().to_rfc3339(),
        driver_state: format!("{:?}", DriverState::Initializing),
        polling: false,
        poll_interval_ms: config.poll_interval_ms,
        total_polls: 0,
        last_tick: None,
        endpoints: Vec::new(),
        devices: Vec::new(),
    }
}

impl FleetDriver {
    pub fn build_snapshot(&self) -> FleetSnapshot {
        let endpoints = self
            .registry
            .endpoints()
            .into_iter()
            .map(|endpoint| {
                let session = self.registry.session_state(&endpoint.id);
                EndpointSnapshot {
                    devices: self.devices.bound_to(&endpoint.id).len(),
                    session: session.as_str().to_string(),
                    last_error: self
                        .registry
                        .session(&endpoint.id)
                        .and_then(|s| s.last_error()),
                    id: endpoint.id,
                    address: endpoint.address,
                }
            })
            .collect();

        let devices = self
            .devices
            .iter()
            .map(|d| DeviceSnapshot {
                serial: d.serial.clone(),
                name: d.name.clone(),
                endpoint_id: d.endpoint_id().to_string(),
                power_w: d.state.power_w,
                energy_kwh: d.state.energy_kwh(),
                available: d.state.available,
            })
            .collect();

        FleetSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            driver_state: format!("{:?}", self.state),
            polling: self.scheduler.is_running(),
            poll_interval_ms: self.config.poll_interval_ms,
            total_polls: self.total_polls,
            last_tick: self.last_tick.clone(),
            endpoints,
            devices,
        }
    }

    /// Publish the current snapshot to watchers
    pub(crate) fn publish_snapshot(&self) {
        let snapshot = Arc::new(self.build_snapshot());
        // send_replace keeps the value even with no receivers
        self.snapshot_tx.send_replace(snapshot);
    }
}
