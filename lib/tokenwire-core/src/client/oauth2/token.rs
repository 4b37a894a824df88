//! OAuth2 token types and storage.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Body of a successful token endpoint response.
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token_expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    owner_id: Option<String>,
}

/// An OAuth2 token set: access token, optional refresh token, and expiry.
///
/// Tokens are immutable once built and replaced as a whole on every grant.
/// They serialize so they can be cached and injected into another client
/// with [`AuthClient::set_token`](super::AuthClient::set_token).
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Token {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[zeroize(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<Timestamp>,
    #[zeroize(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token_expires_at: Option<Timestamp>,
    #[zeroize(skip)]
    #[serde(default = "default_token_type")]
    token_type: String,
    #[zeroize(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    #[zeroize(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner_id: Option<String>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// `now + offset`, saturating to [`Timestamp::MAX`].
fn offset_from(now: Timestamp, offset: Duration) -> Timestamp {
    SignedDuration::try_from(offset)
        .ok()
        .and_then(|offset| now.checked_add(offset).ok())
        .unwrap_or(Timestamp::MAX)
}

impl Token {
    /// Creates a bearer token without expiry nor refresh token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            refresh_token_expires_at: None,
            token_type: default_token_type(),
            scope: None,
            owner_id: None,
        }
    }

    pub(crate) fn from_response(response: TokenResponse, issued_at: Timestamp) -> Self {
        let at = |secs: u64| offset_from(issued_at, Duration::from_secs(secs));
        Self {
            expires_at: response.expires_in.map(at),
            refresh_token_expires_at: response.refresh_token_expires_in.map(at),
            token_type: response.token_type.unwrap_or_else(default_token_type),
            scope: response.scope,
            owner_id: response.owner_id,
            refresh_token: response.refresh_token,
            access_token: response.access_token,
        }
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Sets the access token expiry relative to now.
    #[must_use]
    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_at = Some(offset_from(Timestamp::now(), expires_in));
        self
    }

    /// Sets the absolute access token expiry.
    #[must_use]
    pub fn with_expires_at(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Sets the absolute refresh token expiry.
    #[must_use]
    pub fn with_refresh_token_expires_at(mut self, expires_at: Timestamp) -> Self {
        self.refresh_token_expires_at = Some(expires_at);
        self
    }

    /// Sets the granted scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Returns the access token value.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Returns the refresh token if available.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Returns when the access token expires, if known.
    pub fn expires_at(&self) -> Option<Timestamp> {
        self.expires_at
    }

    /// Returns when the refresh token expires, if known.
    pub fn refresh_token_expires_at(&self) -> Option<Timestamp> {
        self.refresh_token_expires_at
    }

    /// Returns the token type, usually `bearer`.
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Returns the granted scope.
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Returns the owner (user) identifier reported by the token endpoint.
    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    /// Checks if the access token is expired.
    ///
    /// Returns `false` if the token has no expiration time.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Timestamp::now() >= exp)
    }

    /// Returns `true` if the access token expires within the given threshold.
    pub fn expires_within(&self, threshold: Duration) -> bool {
        self.expires_at
            .is_some_and(|exp| offset_from(Timestamp::now(), threshold) >= exp)
    }

    /// Checks if the refresh token is known to be expired.
    pub fn is_refresh_token_expired(&self) -> bool {
        self.refresh_token_expires_at
            .is_some_and(|exp| Timestamp::now() >= exp)
    }

    /// Returns `true` if a refresh grant can be attempted with this token.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some() && !self.is_refresh_token_expired()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("refresh_token_expires_at", &self.refresh_token_expires_at)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Thread-safe holder of the current token.
///
/// The token is stored as an immutable `Arc<Token>` snapshot: a replacement
/// swaps the whole snapshot, so readers never observe a partially updated
/// token. The lock is never held across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    inner: Arc<RwLock<Option<Arc<Token>>>>,
}

impl TokenStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current token snapshot, expired or not.
    pub fn get(&self) -> Option<Arc<Token>> {
        self.inner.read().clone()
    }

    /// Replaces the current token and returns the new snapshot.
    pub fn replace(&self, token: Token) -> Arc<Token> {
        let token = Arc::new(token);
        *self.inner.write() = Some(Arc::clone(&token));
        token
    }

    /// Replaces the token only while `expected` is still the current snapshot.
    ///
    /// A refreshed token must not resurrect a store that was cleared or
    /// re-authorized while the refresh grant was in flight.
    pub(crate) fn replace_if_current(&self, expected: &Arc<Token>, token: Token) -> Arc<Token> {
        let token = Arc::new(token);
        let mut slot = self.inner.write();
        if slot
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, expected))
        {
            *slot = Some(Arc::clone(&token));
        }
        token
    }

    /// Forgets the current token.
    pub fn clear(&self) {
        *self.inner.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> TokenResponse {
        serde_json::from_str(json).expect("valid token response")
    }

    #[test]
    fn should_create_token() {
        let token = Token::new("access-token-123");
        assert_eq!(token.access_token(), "access-token-123");
        assert!(token.refresh_token().is_none());
        assert!(!token.is_expired());
        assert!(!token.can_refresh());
    }

    #[test]
    fn should_build_token_from_response() {
        let issued_at = Timestamp::from_second(1_700_000_000).expect("valid timestamp");
        let token = Token::from_response(
            response(
                r#"{
                    "access_token": "at",
                    "token_type": "bearer",
                    "expires_in": 3600,
                    "refresh_token": "rt",
                    "refresh_token_expires_in": 604800,
                    "scope": "ReadAccounts",
                    "owner_id": "42",
                    "endpoint_id": "ignored"
                }"#,
            ),
            issued_at,
        );

        assert_eq!(token.access_token(), "at");
        assert_eq!(token.refresh_token(), Some("rt"));
        assert_eq!(
            token.expires_at(),
            Some(Timestamp::from_second(1_700_003_600).expect("valid timestamp"))
        );
        assert_eq!(
            token.refresh_token_expires_at(),
            Some(Timestamp::from_second(1_700_604_800).expect("valid timestamp"))
        );
        assert_eq!(token.scope(), Some("ReadAccounts"));
        assert_eq!(token.owner_id(), Some("42"));
    }

    #[test]
    fn should_detect_expired_token() {
        let token = Token::new("token").with_expires_in(Duration::ZERO);
        assert!(token.is_expired());
    }

    #[test]
    fn should_detect_refresh_needed() {
        let token = Token::new("token").with_expires_in(Duration::from_secs(30));

        assert!(token.expires_within(Duration::from_secs(60)));
        assert!(!token.expires_within(Duration::from_secs(10)));
    }

    #[test]
    fn should_not_refresh_with_expired_refresh_token() {
        let token = Token::new("token")
            .with_refresh_token("refresh")
            .with_refresh_token_expires_at(Timestamp::UNIX_EPOCH);

        assert!(token.is_refresh_token_expired());
        assert!(!token.can_refresh());
    }

    #[test]
    fn should_redact_debug_output() {
        let token = Token::new("secret-token").with_refresh_token("secret-refresh");
        let debug_str = format!("{token:?}");
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("secret-token"));
        assert!(!debug_str.contains("secret-refresh"));
    }

    #[test]
    fn should_survive_serialization_for_reuse() {
        let token = Token::new("at")
            .with_refresh_token("rt")
            .with_expires_in(Duration::from_secs(3600));

        let json = serde_json::to_string(&token).expect("serialize token");
        let reused: Token = serde_json::from_str(&json).expect("deserialize token");

        assert_eq!(reused.access_token(), "at");
        assert_eq!(reused.refresh_token(), Some("rt"));
        assert_eq!(reused.expires_at(), token.expires_at());
        assert_eq!(reused.token_type(), "bearer");
    }

    #[test]
    fn should_swap_snapshots() {
        let store = TokenStore::new();
        assert!(store.get().is_none());

        let first = store.replace(Token::new("first"));
        let held = store.get().expect("token stored");
        assert!(Arc::ptr_eq(&first, &held));

        store.replace(Token::new("second"));
        assert_eq!(held.access_token(), "first");
        assert_eq!(
            store.get().expect("token stored").access_token(),
            "second"
        );

        store.clear();
        assert!(store.get().is_none());
    }

    #[test]
    fn should_not_overwrite_replaced_snapshot() {
        let store = TokenStore::new();
        let stale = store.replace(Token::new("stale"));
        store.replace(Token::new("authorized"));

        let refreshed = store.replace_if_current(&stale, Token::new("refreshed"));

        assert_eq!(refreshed.access_token(), "refreshed");
        assert_eq!(
            store.get().expect("token stored").access_token(),
            "authorized"
        );
    }
}
