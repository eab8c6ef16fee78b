//! Enphase Envoy gateway client
//!
//! Token flow for current firmware: log in to Enlighten with the account
//! credentials, request a gateway-scoped token for the Envoy serial, then use
//! that token as a bearer against the gateway's local HTTPS API. The gateway
//! serves a self-signed certificate.

use super::{Credentials, GatewayClient, GatewayConnector, InverterInfo, InverterProduction};
use crate::config::EnvoyConfig;
use crate::error::{FleetError, Result};
use crate::logging::{StructuredLogger, get_logger};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

const INVENTORY_PATH: &str = "/inventory.json";
const PRODUCTION_PATH: &str = "/api/v1/production/inverters";
const CHECK_JWT_PATH: &str = "/auth/check_jwt";
const MICROINVERTER_TYPE: &str = "PCU";

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InventoryGroup {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    devices: Vec<InventoryDevice>,
}

#[derive(Debug, Deserialize)]
struct InventoryDevice {
    serial_num: String,
}

#[derive(Debug, Deserialize)]
struct InverterReport {
    #[serde(rename = "serialNumber")]
    serial_number: String,
    #[serde(rename = "lastReportWatts", default)]
    last_report_watts: f64,
}

/// Parse `/inventory.json`, keeping microinverters only
pub fn parse_inventory(body: &str) -> Result<Vec<InverterInfo>> {
    let groups: Vec<InventoryGroup> = serde_json::from_str(body)?;
    Ok(groups
        .into_iter()
        .filter(|g| g.kind == MICROINVERTER_TYPE)
        .flat_map(|g| g.devices)
        .map(|d| InverterInfo {
            serial_number: d.serial_num,
        })
        .collect())
}

/// Parse `/api/v1/production/inverters`
pub fn parse_production(body: &str) -> Result<Vec<InverterProduction>> {
    let reports: Vec<InverterReport> = serde_json::from_str(body)?;
    Ok(reports
        .into_iter()
        .map(|r| InverterProduction {
            serial_number: r.serial_number,
            last_report_watts: r.last_report_watts,
        })
        .collect())
}

/// Connector that authenticates through Enlighten
pub struct EnvoyConnector {
    cloud: reqwest::Client,
    config: EnvoyConfig,
    logger: StructuredLogger,
}

impl EnvoyConnector {
    pub fn new(config: &EnvoyConfig) -> Result<Self> {
        let cloud = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            cloud,
            config: config.clone(),
            logger: get_logger("envoy"),
        })
    }

    async fn login(&self, credentials: &Credentials) -> Result<String> {
        let response = self
            .cloud
            .post(&self.config.login_url)
            .form(&[
                ("user[email]", credentials.username.as_str()),
                ("user[password]", credentials.password.as_str()),
            ])
            .send()
            .await?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(FleetError::auth("Enlighten rejected the credentials"));
        }
        let response = response.error_for_status()?;
        let body: LoginResponse = response.json().await?;
        match body.session_id {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(FleetError::auth(format!(
                "Enlighten login failed: {}",
                body.message.unwrap_or_else(|| "no session".to_string())
            ))),
        }
    }

    async fn gateway_token(
        &self,
        session_id: &str,
        serial: &str,
        username: &str,
    ) -> Result<String> {
        let response = self
            .cloud
            .post(&self.config.token_url)
            .json(&serde_json::json!({
                "session_id": session_id,
                "serial_num": serial,
                "username": username,
            }))
            .send()
            .await?;
        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(FleetError::auth(format!(
                "No token issued for gateway {}",
                serial
            )));
        }
        let token = response.error_for_status()?.text().await?;
        let token = token.trim().to_string();
        if token.is_empty() {
            return Err(FleetError::auth(format!(
                "Empty token for gateway {}",
                serial
            )));
        }
        Ok(token)
    }

    fn local_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(Duration::from_millis(self.config.request_timeout_ms))
            .danger_accept_invalid_certs(true)
            .build()?)
    }
}

#[async_trait::async_trait]
impl GatewayConnector for EnvoyConnector {
    async fn verify_credentials(&self, credentials: &Credentials) -> Result<()> {
        self.login(credentials).await.map(|_| ())
    }

    async fn connect(
        &self,
        credentials: &Credentials,
        address: &str,
        id: &str,
    ) -> Result<Box<dyn GatewayClient>> {
        let session_id = self.login(credentials).await?;
        let token = self
            .gateway_token(&session_id, id, &credentials.username)
            .await?;

        let client = EnvoyClient {
            http: self.local_client()?,
            base_url: format!("https://{}", address),
            token,
        };
        client.check_token().await?;
        self.logger
            .debug(&format!("Envoy {} accepted token at {}", id, address));
        Ok(Box::new(client))
    }
}

/// Authenticated client for one Envoy
pub struct EnvoyClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl EnvoyClient {
    async fn get(&self, path: &str) -> Result<String> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(FleetError::auth(format!("Gateway refused {}", path)));
        }
        Ok(response.error_for_status()?.text().await?)
    }

    async fn check_token(&self) -> Result<()> {
        self.get(CHECK_JWT_PATH).await.map(|_| ())
    }
}

#[async_trait::async_trait]
impl GatewayClient for EnvoyClient {
    async fn fetch_inventory(&self) -> Result<Vec<InverterInfo>> {
        let body = self.get(INVENTORY_PATH).await?;
        parse_inventory(&body)
    }

    async fn fetch_production(&self) -> Result<Vec<InverterProduction>> {
        let body = self.get(PRODUCTION_PATH).await?;
        parse_production(&body)
    }
}
