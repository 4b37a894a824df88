//! OAuth2 token provider for acquiring and refreshing tokens.

use std::fmt;
use std::sync::{Arc, Weak};

use futures::FutureExt as _;
use futures::future::{self, BoxFuture, Shared};
use http::StatusCode;
use jiff::Timestamp;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, warn};

use super::config::AuthConfig;
use super::error::AuthError;
use super::token::{Token, TokenResponse, TokenStore};
use crate::client::error_message;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

type RefreshFuture = Shared<BoxFuture<'static, Result<Arc<Token>, AuthError>>>;

/// The refresh grant currently in flight, shared by every waiting caller.
struct InFlight {
    generation: u64,
    future: RefreshFuture,
}

#[derive(Default)]
struct RefreshSlot {
    next_generation: u64,
    current: Option<InFlight>,
}

/// Grant exchanged at the token endpoint.
enum Grant<'a> {
    Password {
        username: &'a str,
        extension: &'a str,
        password: &'a str,
    },
    Refresh {
        refresh_token: &'a str,
    },
}

impl Grant<'_> {
    fn params(&self) -> Vec<(&str, &str)> {
        match self {
            Self::Password {
                username,
                extension,
                password,
            } => {
                let mut params = vec![("grant_type", "password"), ("username", *username)];
                if !extension.is_empty() {
                    params.push(("extension", *extension));
                }
                params.push(("password", *password));
                params
            }
            Self::Refresh { refresh_token } => vec![
                ("grant_type", "refresh_token"),
                ("refresh_token", *refresh_token),
            ],
        }
    }

    fn reject(&self, status: StatusCode, message: String) -> AuthError {
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return AuthError::ServerError {
                status: status.as_u16(),
                message,
            };
        }
        match self {
            Self::Password { .. } => AuthError::InvalidCredentials { message },
            Self::Refresh { .. } => AuthError::InvalidGrant { message },
        }
    }
}

/// HTTP side of the token endpoint, detached from the token store.
#[derive(Clone)]
struct TokenEndpoint {
    http: reqwest::Client,
    config: Arc<AuthConfig>,
}

impl TokenEndpoint {
    async fn exchange(&self, grant: &Grant<'_>) -> Result<Token, AuthError> {
        let body = serde_urlencoded::to_string(grant.params()).map_err(|err| {
            AuthError::ConfigurationError {
                reason: format!("cannot encode grant: {err}"),
            }
        })?;
        let issued_at = Timestamp::now();
        let (status, text) = self.post(self.config.token_url.clone(), body).await?;

        if !status.is_success() {
            return Err(grant.reject(status, error_message(&text)));
        }

        let response = serde_json::from_str::<TokenResponse>(&text).map_err(|err| {
            AuthError::InvalidTokenResponse {
                reason: err.to_string(),
            }
        })?;
        Ok(Token::from_response(response, issued_at))
    }

    async fn post(&self, url: url::Url, body: String) -> Result<(StatusCode, String), AuthError> {
        let (name, value) = self.config.credentials.to_basic_header()?;
        debug!(%url, "sending token request...");
        let mut request = self
            .http
            .post(url)
            .header(name, value)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .header(ACCEPT, "application/json")
            .body(body);
        if let Some(timeout) = self.config.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|err| AuthError::network(&err))?;

        let status = response.status();
        debug!(%status, "...receiving token response");
        let text = response
            .text()
            .await
            .map_err(|err| AuthError::network(&err))?;
        Ok((status, text))
    }

    async fn refresh(&self, observed: &Token) -> Result<Token, AuthError> {
        let Some(refresh_token) = observed.refresh_token() else {
            return Err(AuthError::NoRefreshToken);
        };
        if observed.is_refresh_token_expired() {
            return Err(AuthError::InvalidGrant {
                message: "refresh token expired".to_string(),
            });
        }
        self.exchange(&Grant::Refresh { refresh_token }).await
    }
}

/// OAuth2 client owning the [`TokenStore`].
///
/// Cloning is cheap and every clone shares the same token and the same
/// in-flight refresh.
///
/// # Refresh coalescing
///
/// Callers that observe an expired or rejected token all join a single
/// refresh grant. A caller whose observed token was already replaced gets
/// the replacement without any new grant, so a single-use refresh token is
/// never spent twice.
#[derive(Clone)]
pub struct AuthClient {
    endpoint: TokenEndpoint,
    store: TokenStore,
    refresh: Arc<Mutex<RefreshSlot>>,
}

impl AuthClient {
    /// Creates a client without any token.
    pub fn new(http: reqwest::Client, config: AuthConfig) -> Self {
        Self {
            endpoint: TokenEndpoint {
                http,
                config: Arc::new(config),
            },
            store: TokenStore::new(),
            refresh: Arc::default(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AuthConfig {
        &self.endpoint.config
    }

    /// Returns the underlying token store.
    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Performs a password grant and stores the resulting token.
    ///
    /// The `extension` is only sent when not empty.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] when the endpoint rejects the
    /// credentials, [`AuthError::NetworkError`] or [`AuthError::ServerError`]
    /// otherwise. The previous token is left untouched on failure.
    pub async fn authorize(
        &self,
        username: &str,
        extension: &str,
        password: &str,
    ) -> Result<Arc<Token>, AuthError> {
        let grant = Grant::Password {
            username,
            extension,
            password,
        };
        let token = self.endpoint.exchange(&grant).await?;
        debug!("authorized with password grant");
        Ok(self.store.replace(token))
    }

    /// Performs a refresh grant with the current refresh token.
    ///
    /// Joins the refresh already in flight, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoRefreshToken`] when no token with a refresh token
    /// was obtained, [`AuthError::InvalidGrant`] when the refresh token is
    /// rejected, [`AuthError::NetworkError`] or [`AuthError::ServerError`]
    /// otherwise.
    pub async fn refresh(&self) -> Result<Arc<Token>, AuthError> {
        let Some(observed) = self.store.get() else {
            return Err(AuthError::NoRefreshToken);
        };
        self.refresh_stale(&observed).await
    }

    /// Refreshes on behalf of a caller that found `observed` unusable.
    ///
    /// If the store already holds another token, that token is returned as is.
    pub(crate) fn refresh_stale(&self, observed: &Arc<Token>) -> RefreshFuture {
        let mut slot = self.refresh.lock();

        match self.store.get() {
            None => return future::ready(Err(AuthError::NoRefreshToken)).boxed().shared(),
            Some(current) if !Arc::ptr_eq(&current, observed) => {
                debug!("token already replaced, skipping refresh");
                return future::ready(Ok(current)).boxed().shared();
            }
            Some(_) => {}
        }

        if let Some(in_flight) = &slot.current {
            debug!(generation = in_flight.generation, "joining in-flight refresh");
            return in_flight.future.clone();
        }

        let generation = slot.next_generation;
        slot.next_generation = slot.next_generation.wrapping_add(1);

        let endpoint = self.endpoint.clone();
        let store = self.store.clone();
        let observed = Arc::clone(observed);
        let refresh = Arc::downgrade(&self.refresh);
        let future = async move {
            let result = endpoint
                .refresh(&observed)
                .await
                .map(|token| store.replace_if_current(&observed, token));
            match &result {
                Ok(_) => debug!(generation, "token refreshed"),
                Err(error) => warn!(generation, %error, "token refresh failed"),
            }
            release(&refresh, generation);
            result
        }
        .boxed()
        .shared();

        slot.current = Some(InFlight {
            generation,
            future: future.clone(),
        });
        future
    }

    /// Returns the current token snapshot, expired or not.
    pub fn current_token(&self) -> Option<Arc<Token>> {
        self.store.get()
    }

    /// Injects a previously obtained token without any network call.
    pub fn set_token(&self, token: Token) -> Arc<Token> {
        self.store.replace(token)
    }

    /// Forgets the current token.
    pub fn clear_token(&self) {
        self.store.clear();
    }

    /// Revokes the current access token and clears the store.
    ///
    /// Does nothing when no token is stored.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NetworkError`] or [`AuthError::ServerError`]; the
    /// token is kept when the revocation fails.
    pub async fn revoke(&self) -> Result<(), AuthError> {
        let Some(token) = self.store.get() else {
            return Ok(());
        };
        let body = serde_urlencoded::to_string([("token", token.access_token())]).map_err(
            |err| AuthError::ConfigurationError {
                reason: format!("cannot encode revocation: {err}"),
            },
        )?;

        let (status, text) = self
            .endpoint
            .post(self.endpoint.config.revoke_url.clone(), body)
            .await?;
        if !status.is_success() {
            return Err(AuthError::ServerError {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        self.store.clear();
        debug!("token revoked");
        Ok(())
    }
}

fn release(refresh: &Weak<Mutex<RefreshSlot>>, generation: u64) {
    let Some(refresh) = refresh.upgrade() else {
        return;
    };
    let mut slot = refresh.lock();
    if slot
        .current
        .as_ref()
        .is_some_and(|in_flight| in_flight.generation == generation)
    {
        slot.current = None;
    }
}

impl fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthClient")
            .field("config", &self.endpoint.config)
            .field("token", &self.store.get())
            .finish_non_exhaustive()
    }
}
