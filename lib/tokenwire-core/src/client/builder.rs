use std::env;
use std::time::Duration;

use http::HeaderValue;
use url::Url;

use super::oauth2::{
    AuthClient, AuthConfig, DEFAULT_REFRESH_THRESHOLD, DEFAULT_REVOKE_PATH, DEFAULT_TOKEN_PATH,
    Token,
};
use super::{ApiError, ClientCredentials, RestClient, SecureString};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_APP_NAME: &str = "tokenwire";

/// Builder for [`RestClient`] instances.
///
/// # Default Configuration
///
/// - **Timeout**: 30 seconds per request
/// - **Token endpoint**: `/restapi/oauth/token`
/// - **Revoke endpoint**: `/restapi/oauth/revoke`
/// - **Refresh threshold**: zero, only expired tokens are refreshed before use
/// - **App**: `tokenwire/<crate version>`, sent as `X-User-Agent`
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tokenwire_core::RestClient;
///
/// # fn example() -> Result<(), tokenwire_core::ApiError> {
/// let client = RestClient::builder()
///     .with_server_url("https://platform.example.com")?
///     .with_client_credentials("client-id", "client-secret")
///     .with_app("my-app", "1.2.0")
///     .with_timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RestClientBuilder {
    http: Option<reqwest::Client>,
    server_url: Option<Url>,
    client_id: Option<String>,
    client_secret: Option<SecureString>,
    timeout: Option<Duration>,
    app_name: String,
    app_version: String,
    token_path: String,
    revoke_path: String,
    refresh_threshold: Duration,
    token: Option<Token>,
}

impl Default for RestClientBuilder {
    fn default() -> Self {
        Self {
            http: None,
            server_url: None,
            client_id: None,
            client_secret: None,
            timeout: Some(DEFAULT_TIMEOUT),
            app_name: DEFAULT_APP_NAME.to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            token_path: DEFAULT_TOKEN_PATH.to_string(),
            revoke_path: DEFAULT_REVOKE_PATH.to_string(),
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            token: None,
        }
    }
}

impl RestClientBuilder {
    /// Reads the client credentials and server URL from the environment.
    ///
    /// With `prefix = "TOKENWIRE"`, the variables are `TOKENWIRE_CLIENT_ID`,
    /// `TOKENWIRE_CLIENT_SECRET` and `TOKENWIRE_SERVER_URL`.
    ///
    /// # Errors
    ///
    /// Fails when a variable is missing or the URL is invalid.
    pub fn from_env(prefix: &str) -> Result<Self, ApiError> {
        let var = |name: &str| {
            let key = format!("{prefix}_{name}");
            env::var(&key).map_err(|err| ApiError::ConfigurationError {
                reason: format!("{key}: {err}"),
            })
        };

        Self::default()
            .with_client_credentials(var("CLIENT_ID")?, var("CLIENT_SECRET")?)
            .with_server_url(&var("SERVER_URL")?)
    }

    /// Sets the platform server URL, for example `https://platform.example.com`.
    ///
    /// # Errors
    ///
    /// Fails when the URL cannot be parsed or cannot be a base URL.
    pub fn with_server_url(mut self, server_url: &str) -> Result<Self, ApiError> {
        let url = Url::parse(server_url)?;
        if url.cannot_be_a_base() {
            return Err(ApiError::ConfigurationError {
                reason: format!("server URL {server_url:?} cannot be a base URL"),
            });
        }
        self.server_url = Some(url);
        Ok(self)
    }

    /// Sets the application client credentials.
    #[must_use]
    pub fn with_client_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<SecureString>,
    ) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Sets the default per-request timeout, `None` to disable it.
    #[must_use]
    pub fn with_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.timeout = timeout.into();
        self
    }

    /// Sets the application name and version sent as `X-User-Agent`.
    #[must_use]
    pub fn with_app(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.app_name = name.into();
        self.app_version = version.into();
        self
    }

    /// Uses a preconfigured HTTP client (proxy, TLS, connection pool).
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Overrides the token endpoint path.
    #[must_use]
    pub fn with_token_path(mut self, path: impl Into<String>) -> Self {
        self.token_path = path.into();
        self
    }

    /// Overrides the revoke endpoint path.
    #[must_use]
    pub fn with_revoke_path(mut self, path: impl Into<String>) -> Self {
        self.revoke_path = path.into();
        self
    }

    /// Sets how long before expiry a token is refreshed before being sent.
    ///
    /// Defaults to zero. A failed early refresh does not fail the call.
    #[must_use]
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Starts the client with a previously obtained token.
    #[must_use]
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Fails when the server URL or the client credentials are missing, or
    /// when the endpoints or the user agent are invalid.
    pub fn build(self) -> Result<RestClient, ApiError> {
        let Self {
            http,
            server_url,
            client_id,
            client_secret,
            timeout,
            app_name,
            app_version,
            token_path,
            revoke_path,
            refresh_threshold,
            token,
        } = self;

        let server = server_url.ok_or_else(|| ApiError::ConfigurationError {
            reason: "missing server URL".to_string(),
        })?;
        let (Some(client_id), Some(client_secret)) = (client_id, client_secret) else {
            return Err(ApiError::ConfigurationError {
                reason: "missing client credentials".to_string(),
            });
        };
        let credentials = ClientCredentials::new(client_id, client_secret);
        // Fail fast on credentials that cannot be sent.
        credentials.to_basic_header()?;

        let config = AuthConfig::with_paths(credentials, &server, &token_path, &revoke_path)?
            .with_refresh_threshold(refresh_threshold)
            .with_timeout(timeout);
        let user_agent = HeaderValue::from_str(&format!("{app_name}/{app_version}"))?;

        let http = match http {
            Some(http) => http,
            None => {
                let mut builder = reqwest::Client::builder();
                if let Some(timeout) = timeout {
                    builder = builder.timeout(timeout);
                }
                builder.build()?
            }
        };
        let auth = AuthClient::new(http.clone(), config);
        if let Some(token) = token {
            auth.set_token(token);
        }

        Ok(RestClient {
            http,
            server,
            auth,
            timeout,
            user_agent,
        })
    }
}
