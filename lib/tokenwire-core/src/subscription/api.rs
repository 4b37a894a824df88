use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::transport::DeliveryEndpoint;
use crate::client::{ApiError, RestClient, SecureString};

/// Path of the subscription collection.
pub const SUBSCRIPTION_PATH: &str = "/restapi/v1.0/subscription";

/// Body of a subscription creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    /// Resource path patterns to subscribe to.
    pub event_filters: Vec<String>,
    /// Requested delivery, omitted when no push channel is wanted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_mode: Option<DeliveryModeRequest>,
    /// Requested lifetime in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

/// Requested delivery mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryModeRequest {
    /// Transport type, for example `WebSocket`.
    pub transport_type: String,
}

/// Subscription as returned by the server on creation and renewal.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    /// Server-assigned identifier.
    pub id: String,
    /// Server-side status, for example `Active`.
    #[serde(default)]
    pub status: Option<String>,
    /// Effective event filters.
    #[serde(default)]
    pub event_filters: Vec<String>,
    /// Remaining lifetime in seconds.
    pub expires_in: u64,
    /// Absolute expiration time as sent by the server.
    #[serde(default)]
    pub expiration_time: Option<String>,
    /// Effective delivery mode.
    #[serde(default)]
    pub delivery_mode: Option<DeliveryModeInfo>,
}

/// Effective delivery mode of a subscription.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryModeInfo {
    /// Transport type.
    #[serde(default)]
    pub transport_type: Option<String>,
    /// Address of the delivery channel.
    #[serde(default)]
    pub address: Option<String>,
    /// Key identifying the subscriber on the delivery channel.
    #[serde(default)]
    pub subscriber_key: Option<SecureString>,
    /// Key used to encrypt delivered messages.
    #[serde(default)]
    pub encryption_key: Option<SecureString>,
}

impl SubscriptionInfo {
    /// Returns the remaining lifetime.
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.expires_in)
    }

    /// Returns the delivery endpoint, when the server assigned an address.
    pub fn endpoint(&self) -> Option<DeliveryEndpoint> {
        let mode = self.delivery_mode.as_ref()?;
        let address = mode.address.clone()?;
        Some(DeliveryEndpoint {
            address,
            subscriber_key: mode.subscriber_key.clone(),
        })
    }
}

/// Server operations on subscriptions.
///
/// Implemented by [`RestClient`], so that every call goes through the same
/// token refresh and retry as any other API call.
#[async_trait]
pub trait SubscriptionApi: Send + Sync + 'static {
    /// Creates a subscription.
    async fn create(&self, request: &SubscriptionRequest) -> Result<SubscriptionInfo, ApiError>;

    /// Extends the lifetime of a subscription.
    async fn renew(&self, id: &str) -> Result<SubscriptionInfo, ApiError>;

    /// Deletes a subscription.
    async fn remove(&self, id: &str) -> Result<(), ApiError>;
}

#[async_trait]
impl SubscriptionApi for RestClient {
    async fn create(&self, request: &SubscriptionRequest) -> Result<SubscriptionInfo, ApiError> {
        self.post_json(SUBSCRIPTION_PATH, request).await
    }

    async fn renew(&self, id: &str) -> Result<SubscriptionInfo, ApiError> {
        let path = format!("{SUBSCRIPTION_PATH}/{id}/renew");
        self.post(path).await?.as_json()
    }

    async fn remove(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("{SUBSCRIPTION_PATH}/{id}");
        self.delete(path).await?.as_empty();
        Ok(())
    }
}
