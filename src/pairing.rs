//! Pairing flow
//!
//! Pairing is a two-step conversation: the user logs in with their vendor
//! account, then picks inverters from the inventory of every discovered
//! gateway. Nothing here touches the driver; the chosen candidates are
//! handed to it as new devices.

use crate::device::{DeviceSettings, ManagedDevice};
use crate::discovery::DiscoverySource;
use crate::error::{FleetError, Result};
use crate::gateway::{Credentials, GatewayConnector};
use crate::logging::{StructuredLogger, get_logger};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An inverter the user can add
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingCandidate {
    pub name: String,
    pub serial: String,
    pub settings: DeviceSettings,
}

impl PairingCandidate {
    fn new(serial: String, credentials: &Credentials, address: &str, id: &str) -> Self {
        Self {
            name: format!("IQ {}", serial),
            serial,
            settings: DeviceSettings {
                username: credentials.username.clone(),
                password: credentials.password.clone(),
                address: address.to_string(),
                id: id.to_string(),
            },
        }
    }
}

impl From<PairingCandidate> for ManagedDevice {
    fn from(candidate: PairingCandidate) -> Self {
        let mut device = ManagedDevice::new(candidate.serial, candidate.settings);
        device.name = candidate.name;
        device
    }
}

/// One pairing conversation
pub struct PairingSession {
    connector: Arc<dyn GatewayConnector>,
    discovery: Arc<dyn DiscoverySource>,
    credentials: Option<Credentials>,
    logger: StructuredLogger,
}

impl PairingSession {
    pub fn new(connector: Arc<dyn GatewayConnector>, discovery: Arc<dyn DiscoverySource>) -> Self {
        Self {
            connector,
            discovery,
            credentials: None,
            logger: get_logger("pairing"),
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.credentials.is_some()
    }

    /// Verify the account; the credentials are kept only when they work
    pub async fn login(&mut self, username: &str, password: &str) -> bool {
        let credentials = Credentials::new(username, password);
        match self.connector.verify_credentials(&credentials).await {
            Ok(()) => {
                self.logger.info("Pairing login succeeded");
                self.credentials = Some(credentials);
                true
            }
            Err(e) => {
                self.logger.warn(&format!("Pairing login failed: {}", e));
                self.credentials = None;
                false
            }
        }
    }

    /// Inverters of every discovered gateway, in gateway id order.
    /// Gateways configured with their own account are queried with it and
    /// their candidates carry it; the others use the login account.
    /// Gateways that cannot be reached are skipped.
    pub async fn list_devices(&self) -> Result<Vec<PairingCandidate>> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| FleetError::auth("Login required before listing devices"))?;

        let mut results: Vec<_> = self.discovery.discovery_results().into_values().collect();
        results.sort_by(|a, b| a.id.cmp(&b.id));

        let mut candidates = Vec::new();
        for gateway in results {
            let account = gateway.credentials.as_ref().unwrap_or(credentials);
            let client = match self
                .connector
                .connect(account, &gateway.address, &gateway.id)
                .await
            {
                Ok(client) => client,
                Err(e) => {
                    self.logger.warn(&format!(
                        "Skipping gateway {} at {}: {}",
                        gateway.id, gateway.address, e
                    ));
                    continue;
                }
            };
            match client.fetch_inventory().await {
                Ok(inventory) => {
                    self.logger.info(&format!(
                        "Gateway {} lists {} inverters",
                        gateway.id,
                        inventory.len()
                    ));
                    candidates.extend(inventory.into_iter().map(|inv| {
                        PairingCandidate::new(
                            inv.serial_number,
                            account,
                            &gateway.address,
                            &gateway.id,
                        )
                    }));
                }
                Err(e) => self.logger.warn(&format!(
                    "Inventory of gateway {} unavailable: {}",
                    gateway.id, e
                )),
            }
        }
        Ok(candidates)
    }
}
