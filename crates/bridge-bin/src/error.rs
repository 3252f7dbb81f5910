//! Bridge-level errors.

use thiserror::Error;

/// Anything that stops the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] bridge_config::ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] cloud_auth::AuthError),

    #[error("Relay error: {0}")]
    Relay(#[from] bridge_relay::RelayError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
