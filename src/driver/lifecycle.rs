//! Device lifecycle: startup, add/update/remove, address changes

use super::FleetDriver;
use crate::device::{DeviceSettings, ManagedDevice};
use crate::discovery::{AddressChange, DiscoveryEvent};
use crate::error::{FleetError, Result};
use crate::gateway::SessionState;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

impl FleetDriver {
    /// Load devices from the host, subscribe to discovery and start every
    /// device, the way the host initializes them after a restart
    pub async fn start(&mut self) -> Result<()> {
        let devices = self.host.load_devices().await?;
        self.logger
            .info(&format!("Loaded {} managed devices", devices.len()));
        for device in devices {
            self.devices.insert(device);
        }

        if let Some(rx) = self.discovery.subscribe_discovered() {
            self.forward_events(rx, "new gateways".to_string(), |event| event);
        }
        self.refresh_endpoints();
        self.state = super::DriverState::Running;

        for serial in self.devices.serials() {
            self.device_started(&serial).await;
        }
        self.publish_snapshot();
        Ok(())
    }

    /// Merge discovery's view into the registry and subscribe once to every
    /// endpoint not yet subscribed
    pub(crate) fn refresh_endpoints(&mut self) {
        self.registry.observe_endpoints(self.discovery.as_ref());
        for endpoint in self.registry.endpoints() {
            if self.subscribed.contains(&endpoint.id) {
                continue;
            }
            let Some(rx) = self.discovery.subscribe(&endpoint.id) else {
                continue;
            };
            let id = endpoint.id.clone();
            self.forward_events(rx, format!("endpoint {}", id), move |event| {
                (id.clone(), event)
            });
            self.logger
                .debug(&format!("Subscribed to discovery events of {}", endpoint.id));
            self.subscribed.insert(endpoint.id);
        }
    }

    /// Pump a discovery broadcast into the driver's event queue
    fn forward_events<T, F>(&mut self, rx: broadcast::Receiver<T>, label: String, tag: F)
    where
        T: Clone + Send + 'static,
        F: Fn(T) -> (String, DiscoveryEvent) + Send + 'static,
    {
        let tx = self.events_tx.clone();
        let logger = self.logger.clone();
        self.forwarders.push(tokio::spawn(async move {
            let mut stream = BroadcastStream::new(rx);
            while let Some(item) = stream.next().await {
                match item {
                    Ok(event) => {
                        if tx.send(tag(event)).is_err() {
                            break;
                        }
                    }
                    Err(e) => logger.warn(&format!(
                        "Discovery events for {} lagged: {}",
                        label, e
                    )),
                }
            }
        }));
    }

    /// A gateway showed up in discovery. Subscribe to it and adopt any
    /// address discovery knows that the registry does not, which is the case
    /// for endpoints first registered from a device's stored settings.
    pub(crate) async fn on_gateway_discovered(&mut self, endpoint_id: &str) {
        self.logger
            .debug(&format!("Discovery reported gateway {}", endpoint_id));
        self.refresh_endpoints();
        for (id, address) in self.registry.address_drift(self.discovery.as_ref()) {
            let change = self.on_address_changed(&id, &address).await;
            // A session that failed at the stale address gets one retry here
            if change != (AddressChange::Moved { session_reset: false }) {
                continue;
            }
            if let Some(serial) = self.devices.bound_to(&id).into_iter().next() {
                self.device_started(&serial).await;
            }
        }
    }

    /// Bring a device's endpoint session up and make sure polling runs.
    ///
    /// Called when a device is added, its settings change or its endpoint
    /// moved. Establishes when the session is not established or the
    /// device's credentials differ from the session's. Returns the session
    /// state of the device's endpoint.
    pub async fn device_started(&mut self, serial: &str) -> SessionState {
        let Some(device) = self.devices.get(serial) else {
            self.logger
                .warn(&format!("Start requested for unknown device {}", serial));
            return SessionState::Absent;
        };
        let settings = device.settings.clone();
        let endpoint_id = settings.id.clone();

        self.refresh_endpoints();
        self.registry
            .ensure_endpoint(&endpoint_id, &settings.address);

        let Some((endpoint, session)) = self.registry.entry(&endpoint_id) else {
            return SessionState::Absent;
        };
        let address = endpoint.address.clone();
        // Devices without a stored account fall back to the endpoint's
        let credentials = match &endpoint.credentials {
            Some(fallback) if settings.username.is_empty() => fallback.clone(),
            _ => settings.credentials(),
        };
        let drifted = session
            .credentials()
            .is_some_and(|current| current != credentials);

        if session.is_established() && !drifted {
            if !self.scheduler.is_running() {
                self.scheduler.start(self.poll_interval);
            }
        } else {
            if drifted {
                self.logger.info(&format!(
                    "Credentials of device {} differ from endpoint {}, re-authenticating",
                    serial, endpoint_id
                ));
            }
            let state = session
                .establish(self.connector.as_ref(), &address, &credentials)
                .await;
            if state != SessionState::Established {
                if let SessionState::Failed(reason) = &state {
                    self.logger.warn(&format!(
                        "Device {} not started, endpoint {} failed: {}",
                        serial, endpoint_id, reason
                    ));
                }
                self.publish_snapshot();
                return state;
            }

            self.registry
                .set_credentials(&endpoint_id, credentials.clone());
            let shared = DeviceSettings {
                username: credentials.username,
                password: credentials.password,
                address,
                id: endpoint_id.clone(),
            };
            self.propagate_settings(&endpoint_id, &shared).await;
            self.scheduler.start(self.poll_interval);
        }

        self.poll_once().await;
        self.registry.session_state(&endpoint_id)
    }

    /// Copy the endpoint's working settings into every device bound to it
    async fn propagate_settings(&mut self, endpoint_id: &str, settings: &DeviceSettings) {
        for serial in self.devices.bound_to(endpoint_id) {
            let Some(device) = self.devices.get_mut(&serial) else {
                continue;
            };
            if device.settings == *settings {
                continue;
            }
            device.settings = settings.clone();
            let result = self.host.set_settings(&serial, settings).await;
            self.report_propagation(&serial, result);
        }
    }

    /// Forget a removed device.
    ///
    /// Sessions of endpoints left without devices are torn down and the
    /// scheduler stops with the last device. Repeated calls are no-ops.
    /// Returns whether the device was managed.
    pub fn device_stopped(&mut self, serial: &str) -> bool {
        let removed = self.devices.remove(serial).is_some();
        if removed {
            self.logger.info(&format!("Device {} stopped", serial));
        }

        self.release_idle_endpoints();
        if self.devices.is_empty() {
            self.scheduler.stop();
        }
        self.publish_snapshot();
        removed
    }

    fn release_idle_endpoints(&mut self) {
        for endpoint in self.registry.endpoints() {
            if self.registry.session_state(&endpoint.id) == SessionState::Absent {
                continue;
            }
            if self.devices.bound_to(&endpoint.id).is_empty() {
                self.logger.info(&format!(
                    "No devices left on endpoint {}, releasing session",
                    endpoint.id
                ));
                self.registry.teardown(&endpoint.id);
            }
        }
    }

    /// Apply an address pushed by discovery and restart the bound devices
    /// when their session had to be dropped
    pub async fn on_address_changed(&mut self, endpoint_id: &str, address: &str) -> AddressChange {
        let session_reset = match self.registry.on_address_changed(endpoint_id, address) {
            AddressChange::Moved { session_reset } => session_reset,
            other => return other,
        };

        let bound = self.devices.bound_to(endpoint_id);
        for serial in &bound {
            let Some(device) = self.devices.get_mut(serial) else {
                continue;
            };
            device.settings.address = address.to_string();
            let settings = device.settings.clone();
            let result = self.host.set_settings(serial, &settings).await;
            self.report_propagation(serial, result);
        }

        if session_reset {
            for serial in &bound {
                self.device_started(serial).await;
            }
        }
        self.publish_snapshot();
        AddressChange::Moved { session_reset }
    }

    /// Add a paired device, or replace one paired again under the same serial
    pub async fn add_device(&mut self, mut device: ManagedDevice) -> Result<SessionState> {
        if device.serial.trim().is_empty() {
            return Err(FleetError::validation("serial", "Serial number is required"));
        }
        if device.settings.id.trim().is_empty() {
            return Err(FleetError::validation("id", "Gateway id is required"));
        }

        if let Some(existing) = self.devices.get(&device.serial) {
            if self.config.devices.reset_energy_on_repair {
                self.logger.info(&format!(
                    "Device {} paired again, energy counter reset",
                    device.serial
                ));
                device.state.reset_energy();
            } else {
                device.state = existing.state.clone();
            }
            let previous = existing.endpoint_id().to_string();
            self.devices.insert(device.clone());
            if previous != device.endpoint_id() {
                self.release_idle_endpoints();
            }
        } else {
            self.logger.info(&format!(
                "Adding device {} on endpoint {}",
                device.serial,
                device.endpoint_id()
            ));
            self.devices.insert(device.clone());
        }

        let result = self.host.save_device(&device).await;
        self.report_propagation(&device.serial, result);

        Ok(self.device_started(&device.serial).await)
    }

    /// Replace a device's settings and restart it.
    ///
    /// A new address for the same endpoint is applied to the endpoint as if
    /// discovery had reported it; a new id re-points the device.
    pub async fn update_settings(
        &mut self,
        serial: &str,
        settings: DeviceSettings,
    ) -> Result<SessionState> {
        if settings.id.trim().is_empty() {
            return Err(FleetError::validation("id", "Gateway id is required"));
        }
        let Some(device) = self.devices.get_mut(serial) else {
            return Err(FleetError::validation(
                "device",
                format!("Unknown device {}", serial),
            ));
        };
        let previous = std::mem::replace(&mut device.settings, settings.clone());

        let result = self.host.set_settings(serial, &settings).await;
        self.report_propagation(serial, result);

        if previous.id != settings.id {
            self.logger.info(&format!(
                "Device {} moved from endpoint {} to {}",
                serial, previous.id, settings.id
            ));
            self.release_idle_endpoints();
        } else if previous.address != settings.address
            && !settings.address.is_empty()
            && self
                .registry
                .endpoint(&settings.id)
                .is_some_and(|e| e.address != settings.address)
        {
            self.registry
                .on_address_changed(&settings.id, &settings.address);
        }

        Ok(self.device_started(serial).await)
    }

    /// Remove a device from the fleet and from the host
    pub async fn remove_device(&mut self, serial: &str) -> bool {
        let removed = self.device_stopped(serial);
        if removed {
            let result = self.host.forget_device(serial).await;
            self.report_propagation(serial, result);
        }
        removed
    }

    pub(crate) fn report_propagation(&self, serial: &str, result: Result<()>) {
        if let Err(e) = result {
            let err = FleetError::update_propagation(serial, e.to_string());
            self.logger.warn(&err.to_string());
        }
    }
}
