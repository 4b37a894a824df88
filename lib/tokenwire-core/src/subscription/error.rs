use std::sync::Arc;

use crate::client::ApiError;

/// Errors of the [`SubscriptionManager`](super::SubscriptionManager).
///
/// Underlying API errors are shared so that the same failure can be returned
/// to the caller and reported through the notice callback.
#[derive(Debug, Clone, derive_more::Error, derive_more::Display)]
pub enum SubscriptionError {
    /// The server rejected the creation request or could not be reached.
    #[display("Subscription creation failed: {_0}")]
    CreationFailed(Arc<ApiError>),

    /// Renewal retries ran out before expiry and no replacement could be created.
    #[display("Renewal of subscription {subscription_id} failed: {source}")]
    RenewalFailed {
        /// The lapsed subscription.
        subscription_id: String,
        /// Last renewal or re-creation error.
        source: Arc<ApiError>,
    },

    /// No subscription was created yet.
    #[display("No active subscription")]
    NotSubscribed,

    /// The subscription was removed.
    #[display("Subscription was removed")]
    Removed,
}

impl SubscriptionError {
    pub(crate) fn creation(error: ApiError) -> Self {
        Self::CreationFailed(Arc::new(error))
    }

    /// Returns the underlying API error, if any.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::CreationFailed(error) | Self::RenewalFailed { source: error, .. } => {
                Some(error.as_ref())
            }
            Self::NotSubscribed | Self::Removed => None,
        }
    }
}
