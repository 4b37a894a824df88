//! Push delivery channel.
//!
//! A [`PushTransport`] opens the channel advertised by a subscription and
//! yields raw frames; decoding and dispatch happen in the manager.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::client::SecureString;

/// Stream of raw frames received on a delivery channel.
///
/// The stream ends when the channel is closed and yields an error when it breaks.
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// Delivery channel coordinates returned with a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryEndpoint {
    /// Address of the channel, for example a `wss://` URL.
    pub address: String,
    /// Key identifying the subscriber on the channel.
    pub subscriber_key: Option<SecureString>,
}

/// Delivery channel errors.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Error, derive_more::Display)]
pub enum TransportError {
    /// The delivery address cannot be used.
    #[display("Invalid delivery address {address:?}: {reason}")]
    InvalidAddress {
        /// The rejected address.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The channel could not be opened.
    #[display("Cannot connect delivery channel: {reason}")]
    Connect {
        /// Description of the failure.
        reason: String,
    },

    /// The channel broke while receiving.
    #[display("Delivery channel broken: {reason}")]
    Receive {
        /// Description of the failure.
        reason: String,
    },
}

/// Opens delivery channels.
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    /// Connects to `endpoint` and returns the stream of received frames.
    async fn connect(&self, endpoint: &DeliveryEndpoint) -> Result<FrameStream, TransportError>;
}

#[cfg(feature = "websocket")]
pub use self::websocket::WebSocketTransport;

#[cfg(feature = "websocket")]
mod websocket {
    use async_trait::async_trait;
    use futures::StreamExt as _;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;
    use tracing::debug;
    use url::Url;

    use super::{DeliveryEndpoint, FrameStream, PushTransport, TransportError};
    use crate::client::AuthClient;

    /// WebSocket delivery channel.
    ///
    /// The current access token is appended to the address as the
    /// `access_token` query parameter on every (re)connection.
    #[derive(Debug, Clone)]
    pub struct WebSocketTransport {
        auth: AuthClient,
    }

    impl WebSocketTransport {
        /// Creates a transport authenticating with the tokens of `auth`.
        pub fn new(auth: AuthClient) -> Self {
            Self { auth }
        }

        pub(crate) fn connect_url(&self, endpoint: &DeliveryEndpoint) -> Result<Url, TransportError> {
            let mut url =
                Url::parse(&endpoint.address).map_err(|err| TransportError::InvalidAddress {
                    address: endpoint.address.clone(),
                    reason: err.to_string(),
                })?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(TransportError::InvalidAddress {
                    address: endpoint.address.clone(),
                    reason: "expected a ws:// or wss:// URL".to_string(),
                });
            }
            if let Some(token) = self.auth.current_token() {
                url.query_pairs_mut()
                    .append_pair("access_token", token.access_token());
            }
            Ok(url)
        }
    }

    #[async_trait]
    impl PushTransport for WebSocketTransport {
        async fn connect(&self, endpoint: &DeliveryEndpoint) -> Result<FrameStream, TransportError> {
            let url = self.connect_url(endpoint)?;
            let (stream, _response) =
                connect_async(url.as_str())
                    .await
                    .map_err(|err| TransportError::Connect {
                        reason: err.to_string(),
                    })?;
            debug!(address = %endpoint.address, "delivery channel connected");

            let frames = stream.filter_map(|message| async move {
                match message {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(Message::Binary(data)) => String::from_utf8(data).ok().map(Ok),
                    Ok(_) => None,
                    Err(err) => Some(Err(TransportError::Receive {
                        reason: err.to_string(),
                    })),
                }
            });
            Ok(frames.boxed())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::client::{AuthConfig, ClientCredentials, Token};

        fn transport() -> WebSocketTransport {
            let server = Url::parse("https://platform.example.com").expect("valid url");
            let config = AuthConfig::new(ClientCredentials::new("id", "secret"), &server)
                .expect("valid config");
            WebSocketTransport::new(AuthClient::new(reqwest::Client::new(), config))
        }

        fn endpoint(address: &str) -> DeliveryEndpoint {
            DeliveryEndpoint {
                address: address.to_string(),
                subscriber_key: None,
            }
        }

        #[test]
        fn should_append_access_token() {
            let transport = transport();
            transport.auth.set_token(Token::new("my token"));

            let url = transport
                .connect_url(&endpoint("wss://ws.example.com/ws?version=1"))
                .expect("valid url");

            insta::assert_snapshot!(url, @"wss://ws.example.com/ws?version=1&access_token=my+token");
        }

        #[test]
        fn should_reject_http_address() {
            let result = transport().connect_url(&endpoint("https://ws.example.com/ws"));
            assert!(matches!(result, Err(TransportError::InvalidAddress { .. })));
        }
    }
}
