//! OAuth token acquisition and refresh.

use crate::{ApiRequest, ApiTransport, AuthError, AuthResult, RestClient, TokenState, TokenStore};
use bridge_config::{BrandConfig, Credentials};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

const TOKEN_SCOPE: &str = "*";

#[derive(Debug, Serialize)]
#[serde(tag = "grant_type", rename_all = "snake_case")]
enum TokenGrant<'a> {
    Password {
        client_id: &'a str,
        scope: &'a str,
        username: &'a str,
        password: &'a str,
    },
    RefreshToken {
        client_id: &'a str,
        scope: &'a str,
        refresh_token: &'a str,
    },
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<f64>,
}

/// Exchanges account credentials for tokens and keeps them fresh.
///
/// The authenticator is the only writer of its [`TokenStore`]; everything
/// else reads snapshots through [`Authenticator::tokens`].
pub struct Authenticator<T> {
    rest: RestClient<T>,
    token_url: Url,
    client_id: &'static str,
    credentials: Credentials,
    store: TokenStore,
}

impl<T: ApiTransport> Authenticator<T> {
    pub fn new(
        rest: RestClient<T>,
        brand: &BrandConfig,
        credentials: Credentials,
    ) -> AuthResult<Self> {
        Ok(Self {
            rest,
            token_url: brand.token_url()?,
            client_id: brand.client_id,
            credentials,
            store: TokenStore::new(),
        })
    }

    /// Password grant with the account credentials.
    pub async fn acquire(&self) -> AuthResult<Arc<TokenState>> {
        debug!(username = %self.credentials.username, "Requesting access token");
        let grant = TokenGrant::Password {
            client_id: self.client_id,
            scope: TOKEN_SCOPE,
            username: &self.credentials.username,
            password: &self.credentials.password,
        };
        let state = self.exchange(&grant).await?;
        info!(expires_at = %state.expires_at, "Access token acquired");
        Ok(state)
    }

    /// Refresh grant with the refresh token of `current`.
    pub async fn refresh(&self, current: &TokenState) -> AuthResult<Arc<TokenState>> {
        debug!(expired_at = %current.expires_at, "Refreshing access token");
        let grant = TokenGrant::RefreshToken {
            client_id: self.client_id,
            scope: TOKEN_SCOPE,
            refresh_token: &current.refresh_token,
        };
        let state = self.exchange(&grant).await?;
        info!(expires_at = %state.expires_at, "Access token refreshed");
        Ok(state)
    }

    /// Refresh whatever state is currently stored.
    pub async fn refresh_current(&self) -> AuthResult<Arc<TokenState>> {
        let current = self.store.current().ok_or(AuthError::NotAuthenticated)?;
        self.refresh(&current).await
    }

    /// True when no token exists or the stored one expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.store.is_expired(now)
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.store
    }

    pub fn rest(&self) -> &RestClient<T> {
        &self.rest
    }

    async fn exchange(&self, grant: &TokenGrant<'_>) -> AuthResult<Arc<TokenState>> {
        let request = ApiRequest::post(self.token_url.clone(), serde_json::to_value(grant)?);
        let response: TokenResponse = serde_json::from_value(self.rest.request(request).await?)?;

        let missing = |field: &'static str| AuthError::MissingToken {
            username: self.credentials.username.clone(),
            field,
        };
        let access_token = non_empty(response.access_token).ok_or_else(|| missing("access_token"))?;
        let refresh_token =
            non_empty(response.refresh_token).ok_or_else(|| missing("refresh_token"))?;
        let expires_in = response.expires_in.ok_or_else(|| missing("expires_in"))?;

        // Float to int casts saturate; the calendar bound is checked in issued_at
        let state = TokenState::issued_at(access_token, refresh_token, expires_in as i64, Utc::now())?;
        Ok(self.store.replace(state))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
