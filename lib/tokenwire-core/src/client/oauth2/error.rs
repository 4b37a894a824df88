//! OAuth2-specific error types.

/// Errors that can occur during OAuth2 authentication.
///
/// The type is `Clone` because a single refresh outcome is shared by every
/// request that waited on it.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Error, derive_more::Display)]
pub enum AuthError {
    /// The token endpoint rejected the username, extension, or password.
    #[display("Invalid credentials: {message}")]
    InvalidCredentials {
        /// Message returned by the token endpoint.
        message: String,
    },

    /// The refresh token was rejected; the caller must authorize again from credentials.
    #[display("Refresh token rejected: {message}")]
    InvalidGrant {
        /// Message returned by the token endpoint.
        message: String,
    },

    /// No token with a refresh token has been obtained yet.
    #[display("No refresh token available, authorize first")]
    NoRefreshToken,

    /// Network error during token request, including timeouts.
    #[display("Network error during OAuth2 request: {reason}")]
    NetworkError {
        /// Description of the network error.
        reason: String,
    },

    /// The token endpoint failed (5xx, throttling).
    #[display("Token endpoint error ({status}): {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Message returned by the token endpoint.
        message: String,
    },

    /// Invalid OAuth2 response from the token endpoint.
    #[display("Invalid OAuth2 token response: {reason}")]
    InvalidTokenResponse {
        /// Description of what was invalid.
        reason: String,
    },

    /// Configuration error.
    #[display("OAuth2 configuration error: {reason}")]
    ConfigurationError {
        /// Description of the configuration issue.
        reason: String,
    },
}

impl AuthError {
    pub(crate) fn network(error: &reqwest::Error) -> Self {
        Self::NetworkError {
            reason: error.to_string(),
        }
    }
}
