use super::oauth2::AuthError;

/// Errors that can occur when using the [`RestClient`](super::RestClient).
///
/// Authorization failures, server failures, and transport failures are
/// distinct variants so callers can react to each of them.
#[derive(Debug, derive_more::Error, derive_more::Display, derive_more::From)]
pub enum ApiError {
    /// No token was ever obtained; the request was not sent.
    #[display("Not authorized: authorize or set a token first")]
    NotAuthorized,

    /// The access token was still rejected after the single refresh and retry.
    #[display("Unauthorized: access token rejected")]
    Unauthorized,

    /// HTTP client error from the underlying reqwest library.
    ///
    /// Occurs when network requests fail, timeouts occur, or connection issues arise.
    #[display("Network error: {_0}")]
    NetworkError(reqwest::Error),

    /// Server answered with a non-success status other than 401.
    #[display("Server error ({status}): {message}")]
    #[from(skip)]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// Token refresh failed during a request.
    #[display("Authentication failed: {_0}")]
    Auth(AuthError),

    /// Invalid client configuration.
    #[display("Configuration error: {reason}")]
    #[from(skip)]
    ConfigurationError {
        /// Description of the configuration issue.
        reason: String,
    },

    /// URL parsing error when constructing request URLs.
    UrlError(url::ParseError),

    /// Invalid HTTP header name.
    InvalidHeaderName(http::header::InvalidHeaderName),

    /// Invalid HTTP header value.
    InvalidHeaderValue(http::header::InvalidHeaderValue),

    /// JSON serialization error of a request body or query.
    JsonValueError(serde_json::Error),

    /// Query or form serialization error.
    QuerySerializationError(serde_urlencoded::ser::Error),

    /// Query parameter value type is not supported.
    #[display(
        "Unsupported query parameter value: objects are not supported for query parameters. Got: {value}"
    )]
    #[from(skip)]
    UnsupportedQueryParameterValue {
        /// The unsupported value that was provided.
        value: serde_json::Value,
    },

    /// JSON response deserialization failure.
    #[display("Failed to deserialize JSON at '{path}': {error}\n{body}")]
    #[from(skip)]
    JsonError {
        /// Path of the field that failed to deserialize.
        path: String,
        /// The underlying JSON parsing error.
        error: serde_json::Error,
        /// The response body that failed to parse.
        body: String,
    },
}

impl ApiError {
    /// Returns the HTTP status of a server error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ServerError { status, .. } => Some(*status),
            Self::Unauthorized => Some(401),
            Self::NetworkError(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    /// Returns `true` when the token must be obtained again from credentials.
    pub fn requires_authorization(&self) -> bool {
        matches!(
            self,
            Self::NotAuthorized
                | Self::Unauthorized
                | Self::Auth(AuthError::InvalidGrant { .. } | AuthError::NoRefreshToken)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<ApiError>();
        assert_sync::<ApiError>();
    }

    #[test]
    fn should_convert_auth_error() {
        let error = ApiError::from(AuthError::InvalidGrant {
            message: "revoked".to_string(),
        });

        assert!(error.requires_authorization());
        assert_eq!(
            error.to_string(),
            "Authentication failed: Refresh token rejected: revoked"
        );
    }

    #[test]
    fn should_expose_server_status() {
        let error = ApiError::ServerError {
            status: 503,
            message: "maintenance".to_string(),
        };

        assert_eq!(error.status(), Some(503));
        assert!(!error.requires_authorization());
        assert_eq!(error.to_string(), "Server error (503): maintenance");
    }
}
