//! Gateway client contract
//!
//! The core never talks HTTP itself: it drives gateways through the
//! [`GatewayConnector`] / [`GatewayClient`] pair. The Envoy implementation
//! lives in [`envoy`]; tests plug in fakes.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(feature = "envoy")]
pub mod envoy;
pub mod session;

pub use session::{GatewaySession, SessionState};

/// Username/password pair used against the gateway and the vendor cloud
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One inverter as listed in the gateway inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InverterInfo {
    pub serial_number: String,
}

/// Latest production report of one inverter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InverterProduction {
    pub serial_number: String,
    pub last_report_watts: f64,
}

/// A reading valid only for the tick that produced it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductionReading {
    pub serial: String,
    pub watts: f64,
}

impl From<InverterProduction> for ProductionReading {
    fn from(p: InverterProduction) -> Self {
        Self {
            serial: p.serial_number,
            watts: p.last_report_watts,
        }
    }
}

/// An authenticated handle on one gateway
#[async_trait::async_trait]
pub trait GatewayClient: Send + Sync {
    /// Inverters known to the gateway
    async fn fetch_inventory(&self) -> Result<Vec<InverterInfo>>;

    /// Instantaneous production per inverter
    async fn fetch_production(&self) -> Result<Vec<InverterProduction>>;
}

/// Factory that authenticates and hands out [`GatewayClient`]s
#[async_trait::async_trait]
pub trait GatewayConnector: Send + Sync {
    /// Check credentials against the vendor account, without a gateway.
    async fn verify_credentials(&self, credentials: &Credentials) -> Result<()>;

    /// Authenticate against the gateway `id` reachable at `address`.
    /// Rejected credentials must surface as `FleetError::Auth`.
    async fn connect(
        &self,
        credentials: &Credentials,
        address: &str,
        id: &str,
    ) -> Result<Box<dyn GatewayClient>>;
}
