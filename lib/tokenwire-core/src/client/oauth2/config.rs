//! OAuth2 configuration.

use std::time::Duration;

use url::Url;

use super::error::AuthError;
use crate::client::ClientCredentials;

/// Default path of the token endpoint.
pub const DEFAULT_TOKEN_PATH: &str = "/restapi/oauth/token";

/// Default path of the revoke endpoint.
pub const DEFAULT_REVOKE_PATH: &str = "/restapi/oauth/revoke";

/// Default threshold for token refresh: only an expired token is refreshed
/// before being sent.
pub(crate) const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::ZERO;

/// Token endpoint configuration of an [`AuthClient`](super::AuthClient).
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub(crate) credentials: ClientCredentials,
    pub(crate) token_url: Url,
    pub(crate) revoke_url: Url,
    pub(crate) refresh_threshold: Duration,
    pub(crate) timeout: Option<Duration>,
}

impl AuthConfig {
    /// Creates a configuration for the default endpoints of `server_url`.
    ///
    /// # Errors
    ///
    /// Fails when the endpoint URLs cannot be derived from `server_url`.
    pub fn new(credentials: ClientCredentials, server_url: &Url) -> Result<Self, AuthError> {
        Self::with_paths(credentials, server_url, DEFAULT_TOKEN_PATH, DEFAULT_REVOKE_PATH)
    }

    /// Creates a configuration with custom token and revoke paths.
    ///
    /// # Errors
    ///
    /// Fails when a path cannot be joined onto `server_url`.
    pub fn with_paths(
        credentials: ClientCredentials,
        server_url: &Url,
        token_path: &str,
        revoke_path: &str,
    ) -> Result<Self, AuthError> {
        let join = |path: &str| {
            server_url
                .join(path)
                .map_err(|err| AuthError::ConfigurationError {
                    reason: format!("invalid endpoint path {path:?}: {err}"),
                })
        };

        Ok(Self {
            credentials,
            token_url: join(token_path)?,
            revoke_url: join(revoke_path)?,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            timeout: None,
        })
    }

    /// Sets how long before expiry a token is refreshed before being sent.
    ///
    /// Such an early refresh is best effort: when it fails, the still valid
    /// token is sent anyway.
    #[must_use]
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Sets the timeout of every token and revoke request.
    #[must_use]
    pub fn with_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.timeout = timeout.into();
        self
    }

    /// Returns the token endpoint URL.
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// Returns the revoke endpoint URL.
    pub fn revoke_url(&self) -> &Url {
        &self.revoke_url
    }

    /// Returns the client credentials.
    pub fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }
}
