//! Cloud broker identity derived from the current access token.

use crate::{CredentialSource, RelayError, RelayResult};
use chrono::{DateTime, Utc};
use cloud_auth::{Device, TokenState, TokenStore};
use std::sync::Arc;
use uuid::Uuid;

/// Username for the cloud broker's custom authorizer.
///
/// The token is rewritten from URL-safe base64 back to the standard alphabet,
/// split into its three JWT parts, and each part is percent-escaped with `/`
/// kept as is.
pub fn cloud_username(access_token: &str) -> String {
    let normalized = access_token.replace('_', "/").replace('-', "+");
    let mut parts = normalized.split('.').map(quote);
    let header = parts.next().unwrap_or_default();
    let payload = parts.next().unwrap_or_default();
    let signature = parts.next().unwrap_or_default();

    format!(
        "bot?jwt={header}.{payload}&x-amz-customauthorizer-name=''&x-amz-customauthorizer-signature={signature}"
    )
}

fn quote(part: &str) -> String {
    urlencoding::encode(part).replace("%2F", "/")
}

/// Credential source for the cloud pump. Reads the store on every dial and
/// yields nothing while the token is missing or expired.
pub fn cloud_credential_source(tokens: TokenStore) -> CredentialSource {
    Arc::new(move || {
        let state = tokens.current()?;
        if state.is_expired(Utc::now()) {
            return None;
        }
        Some((cloud_username(&state.access_token), String::new()))
    })
}

/// Everything needed to dial the cloud broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudConnectParams {
    pub endpoint: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
}

impl CloudConnectParams {
    /// Derive connection parameters for `devices` using `token`.
    ///
    /// Fails without devices or with an expired token. All devices share the
    /// first device's broker endpoint.
    pub fn derive(
        brand_code: &str,
        devices: &[Device],
        token: &TokenState,
        instance_id: Uuid,
        now: DateTime<Utc>,
        port: u16,
    ) -> RelayResult<Self> {
        let first = devices.first().ok_or(RelayError::NoDevices)?;
        if token.is_expired(now) {
            return Err(RelayError::TokenExpired);
        }

        Ok(Self {
            endpoint: first.mqtt_endpoint.clone(),
            port,
            client_id: format!("{brand_code}/USER/{}/bot/{instance_id}", first.user_id),
            username: cloud_username(&token.access_token),
        })
    }
}
