//! Gateway discovery
//!
//! The discovery collaborator knows which gateways exist and where they are.
//! [`DiscoveryTable`] is the in-process implementation: seeded from the
//! configured gateways and fed by the mDNS browser when enabled. The
//! [`DiscoveryRegistry`] on top of it owns the sessions.

use crate::config::GatewayConfig;
use crate::gateway::Credentials;
use crate::logging::{StructuredLogger, get_logger};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

#[cfg(feature = "mdns")]
pub mod mdns;
pub mod registry;

pub use registry::{AddressChange, DiscoveryRegistry};

const EVENT_CAPACITY: usize = 16;

/// A discovered gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayEndpoint {
    /// Stable id, immutable once discovered
    pub id: String,
    /// Current network address; may change at runtime
    pub address: String,
    /// Optional per-endpoint credentials
    #[serde(skip)]
    pub credentials: Option<Credentials>,
}

impl GatewayEndpoint {
    pub fn new<I: Into<String>, A: Into<String>>(id: I, address: A) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

impl From<&GatewayConfig> for GatewayEndpoint {
    fn from(gw: &GatewayConfig) -> Self {
        let endpoint = GatewayEndpoint::new(gw.id.clone(), gw.address.clone());
        match (&gw.username, &gw.password) {
            (Some(u), Some(p)) => endpoint.with_credentials(Credentials::new(u.clone(), p.clone())),
            _ => endpoint,
        }
    }
}

/// Notification pushed per endpoint by the discovery collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    AddressChanged { address: String },
    /// First sighting of a gateway by the source
    Discovered { address: String },
}

/// Snapshot entry of [`DiscoverySource::discovery_results`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResult {
    pub id: String,
    pub address: String,
    pub credentials: Option<Credentials>,
}

/// Contract of the discovery collaborator
pub trait DiscoverySource: Send + Sync {
    /// Current set of known gateways keyed by id
    fn discovery_results(&self) -> HashMap<String, DiscoveryResult>;

    /// Event stream for one gateway; `None` for unknown ids
    fn subscribe(&self, endpoint_id: &str) -> Option<broadcast::Receiver<DiscoveryEvent>>;

    /// Gateways seen for the first time, as `(id, Discovered)`; `None` when
    /// the source never grows
    fn subscribe_discovered(&self) -> Option<broadcast::Receiver<(String, DiscoveryEvent)>> {
        None
    }
}

struct TableEntry {
    address: String,
    credentials: Option<Credentials>,
    events: broadcast::Sender<DiscoveryEvent>,
}

impl TableEntry {
    fn new(endpoint: GatewayEndpoint) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            address: endpoint.address,
            credentials: endpoint.credentials,
            events,
        }
    }
}

/// In-memory discovery source
pub struct DiscoveryTable {
    entries: RwLock<HashMap<String, TableEntry>>,
    discovered: broadcast::Sender<(String, DiscoveryEvent)>,
    logger: StructuredLogger,
}

impl Default for DiscoveryTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryTable {
    pub fn new() -> Self {
        let (discovered, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            discovered,
            logger: get_logger("discovery"),
        }
    }

    /// Table seeded with statically configured gateways
    pub fn from_gateways(gateways: &[GatewayConfig]) -> Self {
        let table = Self::new();
        for gw in gateways {
            let endpoint = GatewayEndpoint::from(gw);
            table.insert(endpoint);
        }
        table
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, TableEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, TableEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, endpoint: GatewayEndpoint) {
        self.write().insert(endpoint.id.clone(), TableEntry::new(endpoint));
    }

    /// Record that gateway `id` was seen at `address`.
    ///
    /// New gateways emit `Discovered` on the table-wide channel; a known
    /// gateway at a new address emits `AddressChanged` to its subscribers.
    /// Returns true when the address of a known gateway changed.
    pub fn announce(&self, id: &str, address: &str) -> bool {
        let mut entries = self.write();
        if let Some(entry) = entries.get_mut(id) {
            if entry.address == address {
                return false;
            }
            self.logger.info(&format!(
                "Gateway {} moved from {} to {}",
                id, entry.address, address
            ));
            entry.address = address.to_string();
            // No subscribers is fine
            let _ = entry.events.send(DiscoveryEvent::AddressChanged {
                address: address.to_string(),
            });
            return true;
        }

        self.logger
            .info(&format!("Discovered gateway {} at {}", id, address));
        entries.insert(id.to_string(), TableEntry::new(GatewayEndpoint::new(id, address)));
        let _ = self.discovered.send((
            id.to_string(),
            DiscoveryEvent::Discovered {
                address: address.to_string(),
            },
        ));
        false
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl DiscoverySource for DiscoveryTable {
    fn discovery_results(&self) -> HashMap<String, DiscoveryResult> {
        self.read()
            .iter()
            .map(|(id, entry)| {
                (
                    id.clone(),
                    DiscoveryResult {
                        id: id.clone(),
                        address: entry.address.clone(),
                        credentials: entry.credentials.clone(),
                    },
                )
            })
            .collect()
    }

    fn subscribe(&self, endpoint_id: &str) -> Option<broadcast::Receiver<DiscoveryEvent>> {
        self.read().get(endpoint_id).map(|e| e.events.subscribe())
    }

    fn subscribe_discovered(&self) -> Option<broadcast::Receiver<(String, DiscoveryEvent)>> {
        Some(self.discovered.subscribe())
    }
}
