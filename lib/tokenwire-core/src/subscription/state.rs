use tokio::time::Instant;

use super::transport::DeliveryEndpoint;

/// Lifecycle of a managed subscription.
///
/// `Created -> Active -> Renewing -> Active ...`, `Renewing -> Expired` when
/// renewal is no longer possible, and any state `-> Removed` on removal.
///
/// A [`SubscriptionManager`](super::SubscriptionManager) stores a subscription
/// once its renewal is scheduled, so its snapshots start at `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum SubscriptionStatus {
    /// Created on the server, renewal not scheduled yet. Never held by a
    /// manager.
    Created,
    /// Scheduled for renewal.
    Active,
    /// A renewal is in progress.
    Renewing,
    /// Lapsed without a successful renewal.
    Expired,
    /// Removed on request.
    Removed,
}

/// How notifications of a subscription are received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Through the delivery channel at the given endpoint.
    Push(DeliveryEndpoint),
    /// Not delivered to this manager.
    None,
}

/// Snapshot of the subscription held by a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Server-assigned identifier.
    pub id: String,
    /// Resource path patterns, fixed at creation.
    pub event_filters: Vec<String>,
    /// When the subscription expires unless renewed.
    pub expires_at: Instant,
    /// Delivery of notifications.
    pub delivery: DeliveryMode,
    /// Current status.
    pub status: SubscriptionStatus,
}

impl Subscription {
    /// Returns the push delivery endpoint, if any.
    pub fn endpoint(&self) -> Option<&DeliveryEndpoint> {
        match &self.delivery {
            DeliveryMode::Push(endpoint) => Some(endpoint),
            DeliveryMode::None => None,
        }
    }
}
