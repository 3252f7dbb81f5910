//! Cloud account access for the mower bridge.
//!
//! - [`Authenticator`]: password and refresh grants against the brand's
//!   identity provider, owning the [`TokenStore`]
//! - [`RestClient`]: shared JSON transport with gateway-timeout backoff
//! - [`FleetDirectory`]: the account's devices with their broker topics

mod authenticator;
mod directory;
mod error;
mod rest;
mod token;
mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use authenticator::Authenticator;
pub use directory::{Device, DeviceModel, DeviceTopics, FleetDirectory};
pub use error::{AuthError, AuthResult};
pub use rest::{RestClient, RetryPolicy};
pub use token::{TokenState, TokenStore};
pub use transport::{ApiRequest, ApiResponse, ApiTransport, HttpMethod, ReqwestTransport};
