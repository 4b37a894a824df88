//! Managed push subscriptions.
//!
//! A [`SubscriptionManager`] creates a subscription on the platform, renews it
//! before it expires and delivers its notifications through a push channel.
//! Server calls go through the [`SubscriptionApi`] trait, implemented by
//! [`RestClient`](crate::RestClient); delivery channels are opened by a
//! [`PushTransport`], a WebSocket with the default `websocket` feature.
//!
//! Renewal failures are retried with backoff while the subscription is still
//! alive. Once it lapsed, a replacement is created (see
//! [`SubscriptionConfig::with_recreate_on_expiry`]) and exactly one
//! [`SubscriptionNotice`] reports what happened.

mod api;
mod channel;
mod config;
mod dispatch;
mod error;
mod event;
mod manager;
mod state;
mod transport;

pub use self::api::{
    DeliveryModeInfo, DeliveryModeRequest, SUBSCRIPTION_PATH, SubscriptionApi, SubscriptionInfo,
    SubscriptionRequest,
};
pub use self::config::{
    BackoffPolicy, DEFAULT_RENEW_RATIO, DEFAULT_TRANSPORT_TYPE, SubscriptionConfig,
};
pub use self::error::SubscriptionError;
pub use self::event::{NotificationEvent, SubscriptionNotice};
pub use self::manager::SubscriptionManager;
pub use self::state::{DeliveryMode, Subscription, SubscriptionStatus};
#[cfg(feature = "websocket")]
pub use self::transport::WebSocketTransport;
pub use self::transport::{DeliveryEndpoint, FrameStream, PushTransport, TransportError};
