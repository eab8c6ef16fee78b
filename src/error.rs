//! Error types and handling for Envoy Fleet
//!
//! This module defines the error types used throughout the application.
//! Failures are contained to the smallest unit (one endpoint, one device);
//! the variants below tell callers which unit failed.

use thiserror::Error;

/// Result type alias for Envoy Fleet operations
pub type Result<T> = std::result::Result<T, FleetError>;

/// Main error type for Envoy Fleet
#[derive(Debug, Error)]
pub enum FleetError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Credentials rejected while authenticating against a gateway or the cloud
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// A fetch was attempted on a session that is not established
    #[error("Session not ready for endpoint {endpoint_id}")]
    SessionNotReady { endpoint_id: String },

    /// Transport failure during an established session's fetch
    #[error("Session error on endpoint {endpoint_id}: {message}")]
    Session {
        endpoint_id: String,
        message: String,
    },

    /// Failure to push a value to the device/persistence host
    #[error("Update propagation error for device {serial}: {message}")]
    UpdatePropagation { serial: String, message: String },

    /// Discovery collaborator errors
    #[error("Discovery error: {message}")]
    Discovery { message: String },

    /// Network-related errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl FleetError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        FleetError::Config {
            message: message.into(),
        }
    }

    /// Create a new authentication error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        FleetError::Auth {
            message: message.into(),
        }
    }

    /// Create a new session-not-ready error
    pub fn session_not_ready<S: Into<String>>(endpoint_id: S) -> Self {
        FleetError::SessionNotReady {
            endpoint_id: endpoint_id.into(),
        }
    }

    /// Create a new session (transport) error
    pub fn session<S: Into<String>, M: Into<String>>(endpoint_id: S, message: M) -> Self {
        FleetError::Session {
            endpoint_id: endpoint_id.into(),
            message: message.into(),
        }
    }

    /// Create a new update propagation error
    pub fn update_propagation<S: Into<String>, M: Into<String>>(serial: S, message: M) -> Self {
        FleetError::UpdatePropagation {
            serial: serial.into(),
            message: message.into(),
        }
    }

    /// Create a new discovery error
    pub fn discovery<S: Into<String>>(message: S) -> Self {
        FleetError::Discovery {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        FleetError::Network {
            message: message.into(),
        }
    }

    /// Create a new serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        FleetError::Serialization {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        FleetError::Io {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        FleetError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        FleetError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        FleetError::Generic {
            message: message.into(),
        }
    }

    /// Whether this error came from rejected credentials
    pub fn is_auth(&self) -> bool {
        matches!(self, FleetError::Auth { .. })
    }
}

impl From<std::io::Error> for FleetError {
    fn from(err: std::io::Error) -> Self {
        FleetError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for FleetError {
    fn from(err: serde_yaml::Error) -> Self {
        FleetError::serialization(err.to_string())
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::serialization(err.to_string())
    }
}

#[cfg(feature = "envoy")]
impl From<reqwest::Error> for FleetError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FleetError::timeout(err.to_string())
        } else {
            FleetError::network(err.to_string())
        }
    }
}
