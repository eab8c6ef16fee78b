//! Registry of known gateway endpoints and their sessions
//!
//! The registry is the only owner of [`GatewaySession`]s: one per endpoint,
//! created with the endpoint and never outliving it. Endpoints are never
//! removed.

use super::{DiscoverySource, GatewayEndpoint};
use crate::error::Result;
use crate::gateway::{GatewaySession, ProductionReading, SessionState};
use crate::logging::{StructuredLogger, get_logger};
use futures::future::join_all;
use std::collections::BTreeMap;

/// Outcome of an address-change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressChange {
    /// No endpoint with that id; nothing happened
    Unknown,
    /// Address identical to the current one
    Unchanged,
    /// Address updated; `session_reset` when an established session was dropped
    Moved { session_reset: bool },
}

#[derive(Debug)]
struct EndpointEntry {
    endpoint: GatewayEndpoint,
    session: GatewaySession,
}

/// Known endpoints keyed by stable id
#[derive(Debug)]
pub struct DiscoveryRegistry {
    endpoints: BTreeMap<String, EndpointEntry>,
    logger: StructuredLogger,
}

impl Default for DiscoveryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self {
            endpoints: BTreeMap::new(),
            logger: get_logger("registry"),
        }
    }

    /// Merge the source's current view and return a snapshot of all endpoints.
    ///
    /// Endpoints seen for the first time are registered with an absent
    /// session. Addresses of known endpoints only change through
    /// [`Self::on_address_changed`].
    pub fn observe_endpoints(&mut self, source: &dyn DiscoverySource) -> Vec<GatewayEndpoint> {
        for (id, result) in source.discovery_results() {
            if self.endpoints.contains_key(&id) {
                continue;
            }
            let mut endpoint = GatewayEndpoint::new(id.clone(), result.address);
            endpoint.credentials = result.credentials;
            self.insert(endpoint);
        }
        self.endpoints()
    }

    /// Known endpoints whose address in `source` differs from the registry's,
    /// as `(id, discovered address)`.
    ///
    /// This covers endpoints first registered from a device's settings that
    /// discovery only found later; callers feed each pair to
    /// [`Self::on_address_changed`].
    pub fn address_drift(&self, source: &dyn DiscoverySource) -> Vec<(String, String)> {
        let mut drift: Vec<_> = source
            .discovery_results()
            .into_values()
            .filter(|result| {
                self.endpoints
                    .get(&result.id)
                    .is_some_and(|e| e.endpoint.address != result.address)
            })
            .map(|result| (result.id, result.address))
            .collect();
        drift.sort();
        drift
    }

    /// Snapshot of registered endpoints
    pub fn endpoints(&self) -> Vec<GatewayEndpoint> {
        self.endpoints.values().map(|e| e.endpoint.clone()).collect()
    }

    /// Register an endpoint known only from a device's stored settings.
    /// Existing endpoints are left untouched.
    pub fn ensure_endpoint(&mut self, id: &str, address: &str) {
        if !self.endpoints.contains_key(id) {
            self.insert(GatewayEndpoint::new(id, address));
        }
    }

    fn insert(&mut self, endpoint: GatewayEndpoint) {
        self.logger.info(&format!(
            "Registered endpoint {} at {}",
            endpoint.id, endpoint.address
        ));
        let session = GatewaySession::new(&endpoint.id);
        self.endpoints
            .insert(endpoint.id.clone(), EndpointEntry { endpoint, session });
    }

    pub fn contains(&self, id: &str) -> bool {
        self.endpoints.contains_key(id)
    }

    pub fn endpoint(&self, id: &str) -> Option<&GatewayEndpoint> {
        self.endpoints.get(id).map(|e| &e.endpoint)
    }

    pub fn session(&self, id: &str) -> Option<&GatewaySession> {
        self.endpoints.get(id).map(|e| &e.session)
    }

    /// Session state for an endpoint, `Absent` when unknown
    pub fn session_state(&self, id: &str) -> SessionState {
        self.session(id)
            .map_or(SessionState::Absent, GatewaySession::state)
    }

    /// Endpoint plus its session, for establishing
    pub fn entry(&self, id: &str) -> Option<(&GatewayEndpoint, &GatewaySession)> {
        self.endpoints.get(id).map(|e| (&e.endpoint, &e.session))
    }

    /// Apply an address pushed by discovery.
    ///
    /// An established session is dropped when the address really changed so
    /// the next establishment authenticates against the new address.
    pub fn on_address_changed(&mut self, id: &str, new_address: &str) -> AddressChange {
        let Some(entry) = self.endpoints.get_mut(id) else {
            self.logger.debug(&format!(
                "Address change for unknown endpoint {} ignored",
                id
            ));
            return AddressChange::Unknown;
        };
        if entry.endpoint.address == new_address {
            return AddressChange::Unchanged;
        }

        self.logger.info(&format!(
            "Endpoint {} address changed from {} to {}",
            id, entry.endpoint.address, new_address
        ));
        entry.endpoint.address = new_address.to_string();

        let session_reset = entry.session.is_established();
        if session_reset {
            entry.session.teardown();
        }
        AddressChange::Moved { session_reset }
    }

    /// Set the endpoint's credentials after a successful establishment
    pub fn set_credentials(&mut self, id: &str, credentials: crate::gateway::Credentials) {
        if let Some(entry) = self.endpoints.get_mut(id) {
            entry.endpoint.credentials = Some(credentials);
        }
    }

    /// Return one endpoint's session to `Absent`
    pub fn teardown(&self, id: &str) {
        if let Some(entry) = self.endpoints.get(id) {
            entry.session.teardown();
        }
    }

    /// Return every session to `Absent`
    pub fn teardown_all(&self) {
        for entry in self.endpoints.values() {
            entry.session.teardown();
        }
    }

    /// Ids of endpoints whose session is established
    pub fn established_ids(&self) -> Vec<String> {
        self.endpoints
            .values()
            .filter(|e| e.session.is_established())
            .map(|e| e.endpoint.id.clone())
            .collect()
    }

    /// Fetch production from every established session concurrently.
    ///
    /// Returns once every fetch finished or failed; non-established
    /// endpoints are not contacted.
    pub async fn fetch_all_production(&self) -> Vec<(String, Result<Vec<ProductionReading>>)> {
        let fetches = self
            .endpoints
            .values()
            .filter(|e| e.session.is_established())
            .map(|e| async move {
                let result = e.session.fetch_production().await;
                (e.endpoint.id.clone(), result)
            });
        join_all(fetches).await
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
