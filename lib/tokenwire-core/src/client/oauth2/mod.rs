//! OAuth2 token acquisition, storage, and refresh.
//!
//! The [`AuthClient`] performs the password and refresh grants against the
//! platform token endpoint and owns the [`TokenStore`] holding the current
//! [`Token`]. Client credentials are always sent as HTTP Basic authentication.
//!
//! # Example
//!
//! ```rust,ignore
//! use tokenwire_core::RestClient;
//!
//! let client = RestClient::builder()
//!     .with_server_url("https://platform.example.com")?
//!     .with_client_credentials("client-id", "client-secret")
//!     .build()?;
//!
//! client.authorize("+16505550100", "", "password").await?;
//!
//! // Cache the token for another process
//! let cached = serde_json::to_string(&*client.token().expect("authorized"))?;
//! ```

mod config;
mod error;
mod provider;
mod token;

pub use self::config::{AuthConfig, DEFAULT_REVOKE_PATH, DEFAULT_TOKEN_PATH};
pub(crate) use self::config::DEFAULT_REFRESH_THRESHOLD;
pub use self::error::AuthError;
pub use self::provider::AuthClient;
pub use self::token::{Token, TokenStore};
