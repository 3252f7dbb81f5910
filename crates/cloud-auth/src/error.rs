//! Authentication and REST error types.

use thiserror::Error;

/// Error raised by token exchanges and directory calls.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Token endpoint answered without one of the required fields
    #[error("Authentication for {username} failed: response is missing '{field}'")]
    MissingToken {
        username: String,
        field: &'static str,
    },

    /// Every attempt ended in a gateway timeout
    #[error("No connection to the cloud API after {attempts} attempts")]
    Connectivity { attempts: u32 },

    /// Non-retryable HTTP status
    #[error("HTTP {status} from {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },

    /// Token lifetime outside the representable range
    #[error("Token lifetime of {0} seconds is out of range")]
    InvalidExpiry(i64),

    /// No token has been acquired yet
    #[error("Not authenticated")]
    NotAuthenticated,

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Brand or tuning problem
    #[error("Configuration error: {0}")]
    Config(#[from] bridge_config::ConfigError),
}

impl AuthError {
    /// Returns true if a later attempt might succeed without operator action.
    ///
    /// Only network-level failures qualify; every HTTP status that reached
    /// the caller was already classified by the retry policy.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Connectivity { .. } => true,
            AuthError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
