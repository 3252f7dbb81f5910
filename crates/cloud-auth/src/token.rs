//! Credential store.
//!
//! The store holds the current [`TokenState`] behind a `watch` channel:
//! a single writer (the authenticator) replaces the whole value at once, and
//! every reader gets an `Arc` snapshot in which access token, refresh token
//! and expiry always belong together.

use crate::{AuthError, AuthResult};
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Access/refresh token pair and the instant the access token expires.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenState {
    /// Build a state from a token response received at `now`. Fails when
    /// the lifetime does not fit the calendar.
    pub fn issued_at(
        access_token: String,
        refresh_token: String,
        expires_in_secs: i64,
        now: DateTime<Utc>,
    ) -> AuthResult<Self> {
        let expires_at = TimeDelta::try_seconds(expires_in_secs)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or(AuthError::InvalidExpiry(expires_in_secs))?;
        Ok(Self {
            access_token,
            refresh_token,
            expires_at,
        })
    }

    /// True iff `now >= expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenState")
            .field("access_token", &format_args!("<{} bytes>", self.access_token.len()))
            .field("refresh_token", &format_args!("<{} bytes>", self.refresh_token.len()))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Shared, consistently readable holder of the current token state.
#[derive(Clone)]
pub struct TokenStore {
    tx: Arc<watch::Sender<Option<Arc<TokenState>>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Snapshot of the current state, if any token was acquired.
    pub fn current(&self) -> Option<Arc<TokenState>> {
        self.tx.borrow().clone()
    }

    /// Replace the state. The stored expiry never moves backwards.
    pub fn replace(&self, mut next: TokenState) -> Arc<TokenState> {
        self.tx.send_modify(|slot| {
            if let Some(previous) = slot.as_deref() {
                next.expires_at = next.expires_at.max(previous.expires_at);
            }
            *slot = Some(Arc::new(next.clone()));
        });
        Arc::new(next)
    }

    /// True when no token exists or the current one has expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.current().map_or(true, |state| state.is_expired(now))
    }

    /// Receiver notified on every replacement.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<TokenState>>> {
        self.tx.subscribe()
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn state(access: &str, expires_at: DateTime<Utc>) -> TokenState {
        TokenState {
            access_token: access.to_string(),
            refresh_token: format!("{access}-refresh"),
            expires_at,
        }
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let token = TokenState::issued_at("a".into(), "r".into(), 3600, now).unwrap();

        assert!(!token.is_expired(now));
        assert!(token.is_expired(now + Duration::seconds(3601)));
        assert!(token.is_expired(now + Duration::seconds(3600)));
    }

    #[test]
    fn out_of_range_lifetime_is_an_error() {
        let now = Utc::now();
        for lifetime in [i64::MAX, i64::MIN, 1_000_000_000_000_000_000] {
            let result = TokenState::issued_at("a".into(), "r".into(), lifetime, now);
            assert!(matches!(result, Err(AuthError::InvalidExpiry(l)) if l == lifetime));
        }
    }

    #[test]
    fn empty_store_counts_as_expired() {
        let store = TokenStore::new();
        assert!(store.current().is_none());
        assert!(store.is_expired(Utc::now()));
    }

    #[test]
    fn replace_swaps_both_tokens_together() {
        let now = Utc::now();
        let store = TokenStore::new();
        store.replace(state("first", now + Duration::seconds(60)));
        let reader = store.current().unwrap();

        store.replace(state("second", now + Duration::seconds(120)));

        assert_eq!(reader.access_token, "first");
        assert_eq!(reader.refresh_token, "first-refresh");
        let current = store.current().unwrap();
        assert_eq!(current.access_token, "second");
        assert_eq!(current.refresh_token, "second-refresh");
    }

    #[test]
    fn expiry_never_moves_backwards() {
        let now = Utc::now();
        let store = TokenStore::new();
        store.replace(state("long", now + Duration::seconds(3600)));
        let stored = store.replace(state("short", now + Duration::seconds(60)));

        assert_eq!(stored.access_token, "short");
        assert_eq!(stored.expires_at, now + Duration::seconds(3600));
    }

    #[tokio::test]
    async fn subscribers_see_replacements() {
        let store = TokenStore::new();
        let mut rx = store.subscribe();
        store.replace(state("fresh", Utc::now()));

        rx.changed().await.unwrap();
        let seen = rx.borrow().clone().unwrap();
        assert_eq!(seen.access_token, "fresh");
    }

    #[test]
    fn debug_hides_tokens() {
        let rendered = format!("{:?}", state("secret-access", Utc::now()));
        assert!(!rendered.contains("secret-access"));
    }
}
