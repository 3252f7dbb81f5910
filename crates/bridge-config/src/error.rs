//! Configuration error types.

use thiserror::Error;

/// Error raised while assembling or validating the bridge configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Brand code not present in the brand table
    #[error("Unknown brand code '{0}' (expected one of WX, KR, LX, SM)")]
    UnknownBrand(String),

    /// A tuning value failed validation
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// IO error while reading a tuning file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;
