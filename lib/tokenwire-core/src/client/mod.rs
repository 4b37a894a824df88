use std::sync::Arc;
use std::time::Duration;

use http::{HeaderValue, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

mod builder;
pub use self::builder::RestClientBuilder;

mod call;
pub use self::call::ApiCall;

mod query;
pub use self::query::CallQuery;

mod result;
pub(crate) use self::result::error_message;
pub use self::result::CallResult;

mod auth;
pub use self::auth::{ClientCredentials, SecureString};

pub mod oauth2;
pub use self::oauth2::{AuthClient, AuthConfig, AuthError, Token, TokenStore};

mod error;
pub use self::error::ApiError;

/// Authenticated REST client.
///
/// Every call carries the current access token. A call answered with `401`
/// triggers one token refresh, shared with every concurrent call that hit the
/// same expiry, and is retried once with the new token.
///
/// Cloning is cheap; clones share the token and the connection pool.
///
/// # Example
///
/// ```rust,no_run
/// use tokenwire_core::RestClient;
/// # use serde::Deserialize;
/// # #[derive(Deserialize)]
/// # struct Extension { id: u64 }
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = RestClient::builder()
///     .with_server_url("https://platform.example.com")?
///     .with_client_credentials("client-id", "client-secret")
///     .build()?;
///
/// client.authorize("+16505550100", "101", "password").await?;
///
/// let extension: Extension = client
///     .get_json("/restapi/v1.0/account/~/extension/~")
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, derive_more::Debug)]
pub struct RestClient {
    #[debug(skip)]
    http: reqwest::Client,
    server: Url,
    auth: AuthClient,
    timeout: Option<Duration>,
    user_agent: HeaderValue,
}

impl RestClient {
    /// Creates a builder.
    pub fn builder() -> RestClientBuilder {
        RestClientBuilder::default()
    }

    /// Returns the server URL.
    pub fn server_url(&self) -> &Url {
        &self.server
    }

    /// Returns the OAuth2 client.
    pub fn auth(&self) -> &AuthClient {
        &self.auth
    }

    /// Performs a password grant and stores the resulting token.
    ///
    /// # Errors
    ///
    /// See [`AuthClient::authorize`].
    pub async fn authorize(
        &self,
        username: &str,
        extension: &str,
        password: &str,
    ) -> Result<Arc<Token>, AuthError> {
        self.auth.authorize(username, extension, password).await
    }

    /// Refreshes the current token.
    ///
    /// # Errors
    ///
    /// See [`AuthClient::refresh`].
    pub async fn refresh(&self) -> Result<Arc<Token>, AuthError> {
        self.auth.refresh().await
    }

    /// Revokes the current token.
    ///
    /// # Errors
    ///
    /// See [`AuthClient::revoke`].
    pub async fn revoke(&self) -> Result<(), AuthError> {
        self.auth.revoke().await
    }

    /// Returns the current token snapshot.
    pub fn token(&self) -> Option<Arc<Token>> {
        self.auth.current_token()
    }

    /// Injects a previously obtained token.
    pub fn set_token(&self, token: Token) -> Arc<Token> {
        self.auth.set_token(token)
    }

    /// Forgets the current token.
    pub fn clear_token(&self) {
        self.auth.clear_token();
    }

    /// Starts a call with the given method and path relative to the server URL.
    pub fn call(&self, method: Method, path: impl Into<String>) -> ApiCall {
        ApiCall::build(self.clone(), method, path)
    }

    /// Starts a GET call.
    pub fn get(&self, path: impl Into<String>) -> ApiCall {
        self.call(Method::GET, path)
    }

    /// Starts a POST call.
    pub fn post(&self, path: impl Into<String>) -> ApiCall {
        self.call(Method::POST, path)
    }

    /// Starts a PUT call.
    pub fn put(&self, path: impl Into<String>) -> ApiCall {
        self.call(Method::PUT, path)
    }

    /// Starts a PATCH call.
    pub fn patch(&self, path: impl Into<String>) -> ApiCall {
        self.call(Method::PATCH, path)
    }

    /// Starts a DELETE call.
    pub fn delete(&self, path: impl Into<String>) -> ApiCall {
        self.call(Method::DELETE, path)
    }

    /// GETs `path` and deserializes the JSON response.
    ///
    /// # Errors
    ///
    /// Returns the call error or the deserialization error.
    pub async fn get_json<R>(&self, path: &str) -> Result<R, ApiError>
    where
        R: DeserializeOwned,
    {
        self.get(path).await?.as_json()
    }

    /// POSTs a JSON body to `path` and deserializes the JSON response.
    ///
    /// # Errors
    ///
    /// Returns the call error or the (de)serialization error.
    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.post(path).json(body)?.await?.as_json()
    }

    /// PUTs a JSON body to `path` and deserializes the JSON response.
    ///
    /// # Errors
    ///
    /// Returns the call error or the (de)serialization error.
    pub async fn put_json<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.put(path).json(body)?.await?.as_json()
    }

    /// PATCHes `path` with a JSON body and deserializes the JSON response.
    ///
    /// # Errors
    ///
    /// Returns the call error or the (de)serialization error.
    pub async fn patch_json<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.patch(path).json(body)?.await?.as_json()
    }

    /// DELETEs `path` and deserializes the JSON response.
    ///
    /// Use [`delete`](Self::delete) for empty responses.
    ///
    /// # Errors
    ///
    /// Returns the call error or the deserialization error.
    pub async fn delete_json<R>(&self, path: &str) -> Result<R, ApiError>
    where
        R: DeserializeOwned,
    {
        self.delete(path).await?.as_json()
    }

    pub(crate) fn build_url(&self, path: &str, query: &CallQuery) -> Result<Url, ApiError> {
        let url = format!(
            "{}/{}",
            self.server.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut url = url.parse::<Url>()?;

        if !query.is_empty() {
            let query_string = query.to_query_string()?;
            let query_string = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{query_string}"),
                _ => query_string,
            };
            url.set_query(Some(&query_string));
        }

        Ok(url)
    }
}
