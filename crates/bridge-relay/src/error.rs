//! Relay error types.

use thiserror::Error;

/// Relay error type.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The account has no devices to bridge
    #[error("No devices found for the account")]
    NoDevices,

    /// Connecting would use an expired access token
    #[error("Access token is missing or expired")]
    TokenExpired,

    /// Broker kept refusing the connection
    #[error("{broker} MQTT connection refused: {code}")]
    BrokerConnect { broker: &'static str, code: String },

    /// A relayed message could not be published on the opposite broker
    #[error("Failed to relay message on {topic}: {reason}")]
    Forward { topic: String, reason: String },

    /// The opposite session was never wired in
    #[error("Relay target for {0} session is not wired")]
    NotWired(&'static str),

    /// The session's event pump has exited
    #[error("Event pump for {0} session has stopped")]
    PumpStopped(&'static str),

    /// MQTT client request could not be queued
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// Unsupported quality of service level
    #[error("Invalid quality of service level {0}")]
    InvalidQos(u8),

    /// TLS setup error
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// Token lifecycle error
    #[error("Authentication error: {0}")]
    Auth(#[from] cloud_auth::AuthError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using RelayError.
pub type RelayResult<T> = Result<T, RelayError>;
