//! # Tokenwire Core
//!
//! Authenticated REST client for OAuth2-protected platform APIs, with managed
//! push subscriptions.
//!
//! - **[`RestClient`]** - issues API calls with the current access token,
//!   refreshes an expired token once for every concurrent caller and retries
//!   the call once
//! - **[`SubscriptionManager`](subscription::SubscriptionManager)** - keeps a
//!   push subscription alive and delivers its notifications in order
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tokenwire_core::{CallQuery, RestClient};
//! # use serde::Deserialize;
//! # #[derive(Deserialize)]
//! # struct CallLog { records: Vec<serde_json::Value> }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RestClient::builder()
//!     .with_server_url("https://platform.example.com")?
//!     .with_client_credentials("client-id", "client-secret")
//!     .build()?;
//!
//! client.authorize("+16505550100", "101", "password").await?;
//!
//! let query = CallQuery::new()
//!     .add_param("view", &"Simple")?
//!     .add_param("perPage", &10)?;
//! let call_log: CallLog = client
//!     .get("/restapi/v1.0/account/~/extension/~/call-log")
//!     .with_call_query(query)
//!     .await? // Direct await using IntoFuture
//!     .as_json()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Reusing a token
//!
//! A [`Token`] serializes with serde, so it can be cached and handed to
//! another client without a new password grant:
//!
//! ```rust,no_run
//! # use tokenwire_core::{RestClient, Token};
//! # fn example(client: &RestClient, cached: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let token: Token = serde_json::from_str(cached)?;
//! client.set_token(token);
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! The crate logs through [`tracing`]: token grants and refreshes at `debug`,
//! subscription lifecycle at `info`, retries at `warn` and lapses at `error`.
//! Secrets are never logged.

mod client;

pub mod subscription;

pub use self::client::oauth2;
pub use self::client::{
    ApiCall, ApiError, AuthClient, AuthConfig, AuthError, CallQuery, CallResult,
    ClientCredentials, RestClient, RestClientBuilder, SecureString, Token, TokenStore,
};
