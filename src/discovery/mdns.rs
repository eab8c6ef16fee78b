//! mDNS browser feeding the discovery table
//!
//! Envoys announce themselves as `_enphase-envoy._tcp`; the `serialnum` TXT
//! property is the stable gateway id.

use super::DiscoveryTable;
use crate::error::{FleetError, Result};
use crate::logging::{StructuredLogger, get_logger};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::sync::Arc;

const SERIAL_PROPERTY: &str = "serialnum";

/// Background mDNS browse that announces resolved gateways
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    logger: StructuredLogger,
}

impl MdnsBrowser {
    /// Start browsing for `service_type`; resolved services go to `table`
    pub fn start(service_type: &str, table: Arc<DiscoveryTable>) -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| FleetError::discovery(format!("mDNS daemon failed: {}", e)))?;
        let receiver = daemon
            .browse(service_type)
            .map_err(|e| FleetError::discovery(format!("mDNS browse failed: {}", e)))?;

        let logger = get_logger("mdns");
        let task_logger = logger.clone();
        let service_type = service_type.to_string();
        tokio::task::spawn_blocking(move || {
            while let Ok(event) = receiver.recv() {
                if let ServiceEvent::ServiceResolved(info) = event {
                    match endpoint_from_service(&info, &service_type) {
                        Some((id, address)) => {
                            table.announce(&id, &address);
                        }
                        None => task_logger.debug(&format!(
                            "Ignoring service {} without address",
                            info.get_fullname()
                        )),
                    }
                }
            }
            task_logger.debug("mDNS browse channel closed");
        });

        logger.info("mDNS gateway discovery started");
        Ok(Self { daemon, logger })
    }

    pub fn shutdown(&self) {
        if let Err(e) = self.daemon.shutdown() {
            self.logger
                .warn(&format!("mDNS daemon shutdown failed: {}", e));
        }
    }
}

fn endpoint_from_service(info: &ServiceInfo, service_type: &str) -> Option<(String, String)> {
    let addresses = info.get_addresses();
    let address = addresses
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addresses.iter().next())?
        .to_string();
    let id = info
        .get_property_val_str(SERIAL_PROPERTY)
        .filter(|s| !s.is_empty())
        .map_or_else(
            || instance_id(info.get_fullname(), service_type),
            str::to_string,
        );
    Some((id, address))
}

/// Instance label of a full service name, e.g. `envoy.<service_type>` -> `envoy`
pub fn instance_id(fullname: &str, service_type: &str) -> String {
    fullname
        .strip_suffix(service_type)
        .map(|s| s.trim_end_matches('.'))
        .filter(|s| !s.is_empty())
        .unwrap_or(fullname)
        .to_string()
}
