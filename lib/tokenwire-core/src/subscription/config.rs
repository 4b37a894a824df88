use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

/// Default fraction of the subscription lifetime after which it is renewed.
pub const DEFAULT_RENEW_RATIO: f64 = 0.9;

/// Default delivery transport requested from the server.
pub const DEFAULT_TRANSPORT_TYPE: &str = "WebSocket";

/// Exponential backoff settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub min_backoff_delay: Duration,
    /// Upper bound of a single delay.
    pub max_backoff_delay: Duration,
    /// Maximum number of retries.
    pub max_retry_attempts: usize,
    /// Randomize delays.
    pub backoff_jitter: bool,
}

impl BackoffPolicy {
    /// Creates a policy without jitter.
    pub fn new(
        min_backoff_delay: Duration,
        max_backoff_delay: Duration,
        max_retry_attempts: usize,
    ) -> Self {
        Self {
            min_backoff_delay,
            max_backoff_delay,
            max_retry_attempts,
            backoff_jitter: false,
        }
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, backoff_jitter: bool) -> Self {
        self.backoff_jitter = backoff_jitter;
        self
    }

    /// Returns the successive retry delays.
    pub(crate) fn delays(&self) -> impl Iterator<Item = Duration> + Send + 'static {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_backoff_delay)
            .with_max_delay(self.max_backoff_delay)
            .with_max_times(self.max_retry_attempts);

        if self.backoff_jitter {
            builder = builder.with_jitter();
        }

        builder.build()
    }

    fn renewal() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 16)
    }

    fn reconnect() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 10)
    }
}

/// Configuration of a [`SubscriptionManager`](super::SubscriptionManager).
///
/// ```rust
/// # use std::time::Duration;
/// # use tokenwire_core::subscription::SubscriptionConfig;
/// let config = SubscriptionConfig::default()
///     .with_expires_in(Duration::from_secs(900))
///     .with_renew_ratio(0.8)
///     .with_recreate_on_expiry(false);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionConfig {
    /// Request push delivery and keep a delivery channel open.
    pub push_delivery: bool,
    /// Transport type requested in the delivery mode.
    pub transport_type: String,
    /// Requested subscription lifetime, server default when `None`.
    pub expires_in: Option<Duration>,
    /// Fraction of the lifetime after which the subscription is renewed, in `(0, 1)`.
    pub renew_ratio: f64,
    /// Create a replacement subscription when renewal is no longer possible.
    pub recreate_on_expiry: bool,
    /// Retry policy of failed renewals, bounded by the subscription expiry.
    pub renewal_backoff: BackoffPolicy,
    /// Reconnection policy of the delivery channel.
    pub reconnect_backoff: BackoffPolicy,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            push_delivery: true,
            transport_type: DEFAULT_TRANSPORT_TYPE.to_string(),
            expires_in: None,
            renew_ratio: DEFAULT_RENEW_RATIO,
            recreate_on_expiry: true,
            renewal_backoff: BackoffPolicy::renewal(),
            reconnect_backoff: BackoffPolicy::reconnect(),
        }
    }
}

impl SubscriptionConfig {
    /// Enables or disables push delivery.
    #[must_use]
    pub fn with_push_delivery(mut self, push_delivery: bool) -> Self {
        self.push_delivery = push_delivery;
        self
    }

    /// Sets the requested transport type.
    #[must_use]
    pub fn with_transport_type(mut self, transport_type: impl Into<String>) -> Self {
        self.transport_type = transport_type.into();
        self
    }

    /// Sets the requested subscription lifetime.
    #[must_use]
    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    /// Sets the fraction of the lifetime after which the subscription is renewed.
    #[must_use]
    pub fn with_renew_ratio(mut self, renew_ratio: f64) -> Self {
        self.renew_ratio = renew_ratio;
        self
    }

    /// Enables or disables replacement subscriptions on expiry.
    #[must_use]
    pub fn with_recreate_on_expiry(mut self, recreate_on_expiry: bool) -> Self {
        self.recreate_on_expiry = recreate_on_expiry;
        self
    }

    /// Sets the renewal retry policy.
    #[must_use]
    pub fn with_renewal_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.renewal_backoff = policy;
        self
    }

    /// Sets the delivery channel reconnection policy.
    #[must_use]
    pub fn with_reconnect_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.reconnect_backoff = policy;
        self
    }

    /// Returns the delay after which a subscription living `lifetime` is renewed.
    ///
    /// Out of range ratios fall back to [`DEFAULT_RENEW_RATIO`], so the renewal
    /// always happens strictly before expiry.
    pub(crate) fn renew_after(&self, lifetime: Duration) -> Duration {
        let ratio = if self.renew_ratio > 0.0 && self.renew_ratio < 1.0 {
            self.renew_ratio
        } else {
            DEFAULT_RENEW_RATIO
        };
        lifetime.mul_f64(ratio)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0.9, 90)]
    #[case(0.5, 50)]
    #[case(1.0, 90)]
    #[case(0.0, 90)]
    #[case(-2.0, 90)]
    #[case(f64::NAN, 90)]
    fn should_schedule_renewal_before_expiry(#[case] ratio: f64, #[case] expected_secs: u64) {
        let config = SubscriptionConfig::default().with_renew_ratio(ratio);

        let renew_after = config.renew_after(Duration::from_secs(100));

        assert_eq!(renew_after.as_secs(), expected_secs);
    }

    #[test]
    fn should_produce_bounded_exponential_delays() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(5), 5);

        let delays: Vec<_> = policy.delays().map(|delay| delay.as_secs()).collect();

        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn should_default_to_websocket_push() {
        let config = SubscriptionConfig::default();

        assert!(config.push_delivery);
        assert_eq!(config.transport_type, "WebSocket");
        assert!(config.recreate_on_expiry);
        assert_eq!(config.reconnect_backoff.max_retry_attempts, 10);
    }
}
