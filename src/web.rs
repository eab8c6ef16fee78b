//! Axum-based HTTP server
//!
//! Handlers never touch the driver directly: reads come from the snapshot
//! watch and writes go through the [`DriverHandle`] command channel.

use crate::device::DeviceSettings;
use crate::driver::DriverHandle;
use crate::error::FleetError;
use crate::pairing::{PairingCandidate, PairingSession};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub driver: DriverHandle,
    pub pairing: Arc<Mutex<PairingSession>>,
}

impl AppState {
    pub fn new(driver: DriverHandle, pairing: PairingSession) -> Self {
        Self {
            driver,
            pairing: Arc::new(Mutex::new(pairing)),
        }
    }
}

#[derive(Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

fn error_response(err: FleetError) -> Response {
    let status = match &err {
        FleetError::Auth { .. } => StatusCode::UNAUTHORIZED,
        FleetError::Validation { field, .. } if field == "device" => StatusCode::NOT_FOUND,
        FleetError::Validation { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(serde_json::json!({"error": err.to_string()}))).into_response()
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.driver.snapshot().as_ref().clone())
}

async fn pairing_login(State(state): State<AppState>, Json(body): Json<LoginBody>) -> Response {
    let mut pairing = state.pairing.lock().await;
    if pairing.login(&body.username, &body.password).await {
        (StatusCode::OK, Json(serde_json::json!({"ok": true}))).into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"ok": false})),
        )
            .into_response()
    }
}

async fn pairing_devices(State(state): State<AppState>) -> Response {
    let pairing = state.pairing.lock().await;
    match pairing.list_devices().await {
        Ok(candidates) => Json(candidates).into_response(),
        Err(e) => error_response(e),
    }
}

async fn add_device(
    State(state): State<AppState>,
    Json(candidate): Json<PairingCandidate>,
) -> Response {
    match state.driver.add_device(candidate.into()).await {
        Ok(session) => (
            StatusCode::CREATED,
            Json(serde_json::json!({"ok": true, "session": session})),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn update_settings(
    State(state): State<AppState>,
    Path(serial): Path<String>,
    Json(settings): Json<DeviceSettings>,
) -> Response {
    match state.driver.update_settings(&serial, settings).await {
        Ok(session) => Json(serde_json::json!({"ok": true, "session": session})).into_response(),
        Err(e) => error_response(e),
    }
}

async fn remove_device(State(state): State<AppState>, Path(serial): Path<String>) -> Response {
    match state.driver.remove_device(&serial).await {
        Ok(true) => Json(serde_json::json!({"ok": true})).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("Unknown device {}", serial)})),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn poll_now(State(state): State<AppState>) -> Response {
    match state.driver.poll_now().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/pairing/login", post(pairing_login))
        .route("/api/pairing/devices", get(pairing_devices))
        .route("/api/devices", post(add_device))
        .route("/api/devices/{serial}/settings", put(update_settings))
        .route("/api/devices/{serial}", delete(remove_device))
        .route("/api/poll", post(poll_now))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let router = build_router(state);

    let logger = crate::logging::get_logger("web");
    logger.info(&format!(
        "Starting web server; requested host={}, port={}",
        host, port
    ));

    let addr = match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port),
        Err(_) => {
            logger.warn(&format!("Invalid host '{}'; falling back to 127.0.0.1", host));
            ([127, 0, 0, 1], port).into()
        }
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    logger.info(&format!(
        "Web server listening at http://{}:{}",
        local_addr.ip(),
        local_addr.port()
    ));

    axum::serve(listener, router).await?;
    Ok(())
}
