//! Authenticated session with one gateway endpoint
//!
//! A session is a small state machine (`Absent -> Connecting -> Established`,
//! with `Failed` on rejected credentials or transport errors). Callers inspect
//! the resulting state instead of handling errors from `establish`.

use super::{Credentials, GatewayClient, GatewayConnector, InverterInfo, ProductionReading};
use crate::error::{FleetError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lifecycle state of a gateway session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionState {
    /// No session; establishing is allowed
    Absent,
    /// Authentication in flight
    Connecting,
    /// Authenticated and usable for fetches
    Established,
    /// Last establish or fetch failed
    Failed(String),
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Absent => "absent",
            SessionState::Connecting => "connecting",
            SessionState::Established => "established",
            SessionState::Failed(_) => "failed",
        }
    }
}

struct Inner {
    state: SessionState,
    client: Option<Arc<dyn GatewayClient>>,
    credentials: Option<Credentials>,
    address: Option<String>,
    /// A connect call is outstanding, even if its session was torn down
    in_flight: bool,
    /// Bumped by teardown; stale results compare against it
    generation: u64,
}

/// Session owned by the discovery registry for one endpoint
pub struct GatewaySession {
    endpoint_id: String,
    inner: Mutex<Inner>,
    logger: StructuredLogger,
}

impl std::fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySession")
            .field("endpoint_id", &self.endpoint_id)
            .field("state", &self.state())
            .finish()
    }
}

impl GatewaySession {
    /// Create an absent session for an endpoint
    pub fn new(endpoint_id: &str) -> Self {
        Self {
            endpoint_id: endpoint_id.to_string(),
            inner: Mutex::new(Inner {
                state: SessionState::Absent,
                client: None,
                credentials: None,
                address: None,
                in_flight: false,
                generation: 0,
            }),
            logger: get_logger_with_context(LogContext::new("session").with_endpoint(endpoint_id)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    pub fn is_established(&self) -> bool {
        self.lock().state == SessionState::Established
    }

    /// Error recorded by the last failure, if the session is `Failed`
    pub fn last_error(&self) -> Option<String> {
        match &self.lock().state {
            SessionState::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Credentials of the current or last attempted establishment
    pub fn credentials(&self) -> Option<Credentials> {
        self.lock().credentials.clone()
    }

    /// Address the session was established against
    pub fn address(&self) -> Option<String> {
        self.lock().address.clone()
    }

    /// Authenticate against `address` and move to `Established` or `Failed`.
    ///
    /// A call made while another establishment is in flight is ignored and
    /// reports `Connecting`. Never returns an error; inspect the state.
    pub async fn establish(
        &self,
        connector: &dyn GatewayConnector,
        address: &str,
        credentials: &Credentials,
    ) -> SessionState {
        let generation = {
            let mut inner = self.lock();
            if inner.in_flight {
                self.logger
                    .debug("Establish ignored, another authentication is in flight");
                return SessionState::Connecting;
            }
            inner.state = SessionState::Connecting;
            inner.in_flight = true;
            inner.client = None;
            inner.credentials = Some(credentials.clone());
            inner.address = Some(address.to_string());
            inner.generation
        };

        self.logger
            .info(&format!("Authenticating against gateway at {}", address));
        let result = connector
            .connect(credentials, address, &self.endpoint_id)
            .await;

        let mut inner = self.lock();
        inner.in_flight = false;
        if inner.generation != generation {
            // Torn down while connecting; the result belongs to a dead session
            self.logger
                .debug("Discarding establish result for a torn down session");
            inner.state = SessionState::Absent;
            return inner.state.clone();
        }
        match result {
            Ok(client) => {
                inner.client = Some(Arc::from(client));
                inner.state = SessionState::Established;
                self.logger.info("Gateway session established");
            }
            Err(e) => {
                inner.client = None;
                inner.state = SessionState::Failed(e.to_string());
                if e.is_auth() {
                    self.logger.warn(&format!("Gateway rejected credentials: {}", e));
                } else {
                    self.logger
                        .error(&format!("Failed to establish gateway session: {}", e));
                }
            }
        }
        inner.state.clone()
    }

    /// Inverter serials known to the gateway
    pub async fn fetch_inventory(&self) -> Result<Vec<InverterInfo>> {
        let (client, generation) = self.ready_client()?;
        match client.fetch_inventory().await {
            Ok(inventory) => Ok(inventory),
            Err(e) => Err(self.degrade(generation, &e)),
        }
    }

    /// Current production per inverter.
    ///
    /// A transport failure moves the session to `Failed`; the caller must not
    /// retry within the same tick.
    pub async fn fetch_production(&self) -> Result<Vec<ProductionReading>> {
        let (client, generation) = self.ready_client()?;
        match client.fetch_production().await {
            Ok(production) => {
                self.logger.trace(&format!(
                    "Fetched {} production readings",
                    production.len()
                ));
                Ok(production.into_iter().map(ProductionReading::from).collect())
            }
            Err(e) => Err(self.degrade(generation, &e)),
        }
    }

    /// Drop the client and return to `Absent`.
    ///
    /// With a connect still outstanding the session stays `Connecting` until
    /// that call returns, then becomes `Absent` and its result is discarded.
    pub fn teardown(&self) {
        let mut inner = self.lock();
        inner.generation = inner.generation.wrapping_add(1);
        if inner.state != SessionState::Absent {
            self.logger.info("Gateway session torn down");
        }
        inner.state = if inner.in_flight {
            SessionState::Connecting
        } else {
            SessionState::Absent
        };
        inner.client = None;
        inner.credentials = None;
        inner.address = None;
    }

    fn ready_client(&self) -> Result<(Arc<dyn GatewayClient>, u64)> {
        let inner = self.lock();
        match (&inner.state, &inner.client) {
            (SessionState::Established, Some(client)) => Ok((Arc::clone(client), inner.generation)),
            _ => Err(FleetError::session_not_ready(&self.endpoint_id)),
        }
    }

    fn degrade(&self, generation: u64, err: &FleetError) -> FleetError {
        let message = err.to_string();
        let mut inner = self.lock();
        if inner.generation == generation && inner.state == SessionState::Established {
            inner.state = SessionState::Failed(message.clone());
            inner.client = None;
        }
        self.logger
            .error(&format!("Gateway fetch failed, session degraded: {}", message));
        FleetError::session(&self.endpoint_id, message)
    }
}
