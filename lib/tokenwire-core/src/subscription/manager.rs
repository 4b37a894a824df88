use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::api::{DeliveryModeRequest, SubscriptionApi, SubscriptionInfo, SubscriptionRequest};
use super::channel::ChannelTask;
use super::config::SubscriptionConfig;
use super::dispatch::{DispatchSender, Handlers};
use super::state::{DeliveryMode, Subscription, SubscriptionStatus};
use super::transport::PushTransport;
use super::{NotificationEvent, SubscriptionError, SubscriptionNotice};
use crate::client::{ApiError, RestClient};

const NOT_FOUND: u16 = 404;

/// How long before expiry the last renewal attempt is made.
const LAST_ATTEMPT_MARGIN: Duration = Duration::from_secs(1);

/// Keeps one subscription alive and delivers its notifications.
///
/// The manager renews the subscription before it expires, retries failed
/// renewals with backoff, creates a replacement when the subscription lapsed,
/// and keeps the push delivery channel connected. Notifications are handed to
/// the [`on_notification`](Self::on_notification) callback one at a time, in
/// arrival order; lifecycle problems go to the [`on_notice`](Self::on_notice)
/// callback.
///
/// Background work stops when the manager is dropped. Use
/// [`shutdown`](Self::shutdown) to also delete the subscription on the server.
///
/// # Example
///
/// ```rust,no_run
/// use tokenwire_core::RestClient;
/// use tokenwire_core::subscription::{SubscriptionConfig, SubscriptionManager};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let client = RestClient::builder()
/// #     .with_server_url("https://platform.example.com")?
/// #     .with_client_credentials("client-id", "client-secret")
/// #     .build()?;
/// let manager = SubscriptionManager::new(client, SubscriptionConfig::default());
/// manager.on_notification(|event| println!("{}: {}", event.event, event.body));
/// manager.on_notice(|notice| eprintln!("subscription notice: {notice:?}"));
///
/// manager
///     .subscribe(["/restapi/v1.0/account/~/extension/~/message-store"])
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct SubscriptionManager {
    inner: Arc<ManagerInner>,
    cancel: CancellationToken,
}

struct ManagerInner {
    api: Arc<dyn SubscriptionApi>,
    transport: Option<Arc<dyn PushTransport>>,
    config: SubscriptionConfig,
    state: Mutex<Option<Subscription>>,
    /// Bumped under the state lock by every removal.
    removal_epoch: AtomicU64,
    handlers: Arc<Handlers>,
    dispatch: DispatchSender,
    renew_lock: tokio::sync::Mutex<()>,
    deadline: watch::Sender<Option<Instant>>,
    channel: Mutex<Option<ChannelTask>>,
    cancel: CancellationToken,
}

impl SubscriptionManager {
    /// Creates a manager calling the subscription API through `client`.
    ///
    /// With push delivery enabled, notifications are received over a
    /// WebSocket authenticated with the tokens of `client`.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(client: RestClient, config: SubscriptionConfig) -> Self {
        let transport = if config.push_delivery {
            push_transport(&client)
        } else {
            None
        };
        Self::with_parts(Arc::new(client), transport, config)
    }

    /// Creates a manager from its parts.
    ///
    /// Without `transport` no delivery channel is requested nor opened.
    ///
    /// Must be called within a Tokio runtime.
    pub fn with_parts(
        api: Arc<dyn SubscriptionApi>,
        transport: Option<Arc<dyn PushTransport>>,
        config: SubscriptionConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let handlers = Arc::new(Handlers::default());
        let dispatch = DispatchSender::spawn(Arc::clone(&handlers), cancel.child_token());
        let (deadline, deadline_rx) = watch::channel(None);

        let inner = Arc::new(ManagerInner {
            api,
            transport,
            config,
            state: Mutex::new(None),
            removal_epoch: AtomicU64::new(0),
            handlers,
            dispatch,
            renew_lock: tokio::sync::Mutex::new(()),
            deadline,
            channel: Mutex::new(None),
            cancel: cancel.clone(),
        });
        tokio::spawn(renewal_task(
            Arc::downgrade(&inner),
            deadline_rx,
            cancel.child_token(),
        ));

        Self { inner, cancel }
    }

    /// Creates a subscription to `event_filters` and starts managing it.
    ///
    /// A subscription already held by this manager is removed first.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::CreationFailed`] when no filter is given
    /// or the server call fails, and [`SubscriptionError::Removed`] when
    /// [`remove`](Self::remove) was called before the creation completed; the
    /// new subscription is then deleted on the server.
    pub async fn subscribe<I, S>(&self, event_filters: I) -> Result<Subscription, SubscriptionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let event_filters = event_filters.into_iter().map(Into::into).collect();
        self.inner.subscribe(event_filters).await
    }

    /// Renews the subscription now.
    ///
    /// Failed attempts are retried with backoff while the subscription has not
    /// expired, then the lapse is handled as for a scheduled renewal.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::NotSubscribed`] without a live
    /// subscription, [`SubscriptionError::Removed`] when it was removed in the
    /// meantime, and [`SubscriptionError::RenewalFailed`] when it lapsed and
    /// could not be replaced.
    pub async fn renew(&self) -> Result<Subscription, SubscriptionError> {
        self.inner.renew().await
    }

    /// Stops renewal and delivery, then deletes the subscription on the server.
    ///
    /// Server failures are logged and otherwise ignored.
    pub async fn remove(&self) {
        self.inner.remove().await;
    }

    /// Sets the callback receiving notifications, replacing any previous one.
    ///
    /// Callbacks run on the blocking pool, one at a time.
    pub fn on_notification<F>(&self, callback: F)
    where
        F: Fn(NotificationEvent) + Send + Sync + 'static,
    {
        self.inner.handlers.set_notification(Arc::new(callback));
    }

    /// Sets the callback receiving lifecycle notices, replacing any previous one.
    pub fn on_notice<F>(&self, callback: F)
    where
        F: Fn(SubscriptionNotice) + Send + Sync + 'static,
    {
        self.inner.handlers.set_notice(Arc::new(callback));
    }

    /// Returns a snapshot of the managed subscription.
    pub fn subscription(&self) -> Option<Subscription> {
        self.inner.state.lock().clone()
    }

    /// Returns the status of the managed subscription.
    pub fn status(&self) -> Option<SubscriptionStatus> {
        self.inner
            .state
            .lock()
            .as_ref()
            .map(|subscription| subscription.status)
    }

    /// Removes the subscription and stops every background task.
    pub async fn shutdown(self) {
        self.inner.remove().await;
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("config", &self.inner.config)
            .field("subscription", &*self.inner.state.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "websocket")]
fn push_transport(client: &RestClient) -> Option<Arc<dyn PushTransport>> {
    Some(Arc::new(super::WebSocketTransport::new(client.auth().clone())))
}

#[cfg(not(feature = "websocket"))]
fn push_transport(_client: &RestClient) -> Option<Arc<dyn PushTransport>> {
    warn!("push delivery requested without the `websocket` feature, no channel is opened");
    None
}

impl ManagerInner {
    async fn subscribe(&self, event_filters: Vec<String>) -> Result<Subscription, SubscriptionError> {
        if event_filters.is_empty() {
            return Err(SubscriptionError::creation(ApiError::ConfigurationError {
                reason: "at least one event filter is required".to_string(),
            }));
        }
        let _renewing = self.renew_lock.lock().await;

        let (previous_id, epoch) = self.retire();
        if let Some(previous_id) = previous_id {
            self.remove_remote(&previous_id).await;
        }

        let request = self.request(&event_filters);
        let info = self.api.create(&request).await.map_err(|err| {
            error!(%err, "subscription creation failed");
            SubscriptionError::creation(err)
        })?;

        let created_id = info.id.clone();
        let installed = {
            let mut state = self.state.lock();
            (self.removal_epoch.load(Ordering::SeqCst) == epoch)
                .then(|| self.install(&mut state, info, event_filters))
        };
        let Some(subscription) = installed else {
            debug!(subscription_id = %created_id, "removed during creation, dropping subscription");
            self.remove_remote(&created_id).await;
            return Err(SubscriptionError::Removed);
        };
        info!(
            subscription_id = %subscription.id,
            push = subscription.endpoint().is_some(),
            "subscription created"
        );
        Ok(subscription)
    }

    async fn renew(&self) -> Result<Subscription, SubscriptionError> {
        let _renewing = self.renew_lock.lock().await;

        let (id, expires_at) = {
            let mut state = self.state.lock();
            let subscription = state.as_mut().ok_or(SubscriptionError::NotSubscribed)?;
            match subscription.status {
                SubscriptionStatus::Removed => return Err(SubscriptionError::Removed),
                SubscriptionStatus::Expired => return Err(SubscriptionError::NotSubscribed),
                SubscriptionStatus::Created
                | SubscriptionStatus::Active
                | SubscriptionStatus::Renewing => {}
            }
            subscription.status = SubscriptionStatus::Renewing;
            (subscription.id.clone(), subscription.expires_at)
        };

        let mut delays = self.config.renewal_backoff.delays();
        let mut last_attempt = false;
        let last_error = loop {
            let err = match self.api.renew(&id).await {
                Ok(info) => return self.renewed(&id, &info),
                Err(err) => err,
            };
            if last_attempt || err.status() == Some(NOT_FOUND) {
                break err;
            }
            let Some(delay) = delays.next() else {
                break err;
            };
            let remaining = expires_at.saturating_duration_since(Instant::now());
            let delay = if delay < remaining {
                delay
            } else if remaining > LAST_ATTEMPT_MARGIN {
                // one last attempt just before expiry
                last_attempt = true;
                remaining - LAST_ATTEMPT_MARGIN
            } else {
                break err;
            };
            warn!(subscription_id = %id, %err, ?delay, "subscription renewal failed, retrying");
            tokio::time::sleep(delay).await;

            if !self.is_live(&id) {
                return Err(SubscriptionError::Removed);
            }
        };

        self.lapse(id, last_error).await
    }

    async fn remove(&self) {
        let id = {
            let mut state = self.state.lock();
            self.removal_epoch.fetch_add(1, Ordering::SeqCst);
            let Some(subscription) = state.as_mut() else {
                debug!("no subscription to remove");
                return;
            };
            if subscription.status == SubscriptionStatus::Removed {
                return;
            }
            subscription.status = SubscriptionStatus::Removed;
            self.deadline.send_replace(None);
            self.stop_channel();
            subscription.id.clone()
        };
        self.remove_remote(&id).await;
    }

    /// Stores a renewal result, unless the subscription changed meanwhile.
    fn renewed(&self, id: &str, info: &SubscriptionInfo) -> Result<Subscription, SubscriptionError> {
        let mut state = self.state.lock();
        let Some(subscription) = state
            .as_mut()
            .filter(|subscription| subscription.id == id)
            .filter(|subscription| subscription.status != SubscriptionStatus::Removed)
        else {
            return Err(SubscriptionError::Removed);
        };

        let now = Instant::now();
        let lifetime = info.lifetime();
        subscription.expires_at = now + lifetime;
        if self.wants_push() {
            if let Some(endpoint) = info.endpoint() {
                subscription.delivery = DeliveryMode::Push(endpoint);
            }
        }
        subscription.status = SubscriptionStatus::Active;
        let subscription = subscription.clone();

        self.deadline
            .send_replace(Some(now + self.config.renew_after(lifetime)));
        self.sync_channel(&subscription.delivery);
        debug!(subscription_id = %id, expires_in = info.expires_in, "subscription renewed");
        Ok(subscription)
    }

    /// Handles a subscription that could not be renewed before expiry.
    ///
    /// Emits exactly one notice: [`SubscriptionNotice::Recreated`] when a
    /// replacement was created, [`SubscriptionNotice::Failed`] otherwise.
    async fn lapse(&self, id: String, error: ApiError) -> Result<Subscription, SubscriptionError> {
        let event_filters = {
            let mut state = self.state.lock();
            let Some(subscription) = state
                .as_mut()
                .filter(|subscription| subscription.id == id)
                .filter(|subscription| subscription.status != SubscriptionStatus::Removed)
            else {
                return Err(SubscriptionError::Removed);
            };
            subscription.status = SubscriptionStatus::Expired;
            self.deadline.send_replace(None);
            subscription.event_filters.clone()
        };
        error!(subscription_id = %id, %error, "subscription renewal failed before expiry");

        let mut last_error = error;
        if self.config.recreate_on_expiry {
            match self.api.create(&self.request(&event_filters)).await {
                Ok(info) => return self.recreated(id, info, event_filters).await,
                Err(err) => {
                    warn!(subscription_id = %id, %err, "subscription re-creation failed");
                    last_error = err;
                }
            }
        }

        if !self.is_expired(&id) {
            return Err(SubscriptionError::Removed);
        }
        self.stop_channel();

        let failure = SubscriptionError::RenewalFailed {
            subscription_id: id,
            source: Arc::new(last_error),
        };
        self.dispatch
            .notice(SubscriptionNotice::Failed(failure.clone()));
        Err(failure)
    }

    async fn recreated(
        &self,
        previous_id: String,
        info: SubscriptionInfo,
        event_filters: Vec<String>,
    ) -> Result<Subscription, SubscriptionError> {
        let replacement_id = info.id.clone();
        let installed = {
            let mut state = self.state.lock();
            let expired = state.as_ref().is_some_and(|subscription| {
                subscription.id == previous_id && subscription.status == SubscriptionStatus::Expired
            });
            expired.then(|| self.install(&mut state, info, event_filters))
        };

        let Some(subscription) = installed else {
            debug!(subscription_id = %replacement_id, "removed during re-creation, dropping replacement");
            self.remove_remote(&replacement_id).await;
            return Err(SubscriptionError::Removed);
        };

        info!(%previous_id, subscription_id = %subscription.id, "subscription recreated");
        self.dispatch.notice(SubscriptionNotice::Recreated {
            previous_id,
            subscription_id: subscription.id.clone(),
        });
        Ok(subscription)
    }

    /// Stores a new subscription, schedules its renewal and connects its channel.
    fn install(
        &self,
        state: &mut Option<Subscription>,
        info: SubscriptionInfo,
        event_filters: Vec<String>,
    ) -> Subscription {
        let now = Instant::now();
        let lifetime = info.lifetime();
        let subscription = Subscription {
            delivery: self.delivery(&info),
            id: info.id,
            event_filters,
            expires_at: now + lifetime,
            status: SubscriptionStatus::Active,
        };

        self.deadline
            .send_replace(Some(now + self.config.renew_after(lifetime)));
        self.sync_channel(&subscription.delivery);

        *state = Some(subscription.clone());
        subscription
    }

    /// Forgets the current subscription.
    ///
    /// Returns its id when it may still exist on the server, with the removal
    /// epoch the next install must still observe.
    fn retire(&self) -> (Option<String>, u64) {
        let mut state = self.state.lock();
        let epoch = self.removal_epoch.load(Ordering::SeqCst);
        let Some(previous) = state.take() else {
            return (None, epoch);
        };
        self.deadline.send_replace(None);
        self.stop_channel();
        let previous_id = (previous.status != SubscriptionStatus::Removed).then_some(previous.id);
        (previous_id, epoch)
    }

    async fn remove_remote(&self, id: &str) {
        match self.api.remove(id).await {
            Ok(()) => info!(subscription_id = %id, "subscription removed"),
            Err(err) => warn!(subscription_id = %id, %err, "subscription removal failed"),
        }
    }

    fn request(&self, event_filters: &[String]) -> SubscriptionRequest {
        SubscriptionRequest {
            event_filters: event_filters.to_vec(),
            delivery_mode: self.wants_push().then(|| DeliveryModeRequest {
                transport_type: self.config.transport_type.clone(),
            }),
            expires_in: self.config.expires_in.map(|expires_in| expires_in.as_secs()),
        }
    }

    fn delivery(&self, info: &SubscriptionInfo) -> DeliveryMode {
        if !self.wants_push() {
            return DeliveryMode::None;
        }
        match info.endpoint() {
            Some(endpoint) => DeliveryMode::Push(endpoint),
            None => {
                warn!(subscription_id = %info.id, "no delivery address returned");
                DeliveryMode::None
            }
        }
    }

    fn wants_push(&self) -> bool {
        self.config.push_delivery && self.transport.is_some()
    }

    fn is_live(&self, id: &str) -> bool {
        self.state.lock().as_ref().is_some_and(|subscription| {
            subscription.id == id && subscription.status != SubscriptionStatus::Removed
        })
    }

    fn is_expired(&self, id: &str) -> bool {
        self.state.lock().as_ref().is_some_and(|subscription| {
            subscription.id == id && subscription.status == SubscriptionStatus::Expired
        })
    }

    /// Makes the delivery channel match `delivery`.
    ///
    /// A running channel is kept when it serves the same endpoint; a channel
    /// that gave up is restarted.
    fn sync_channel(&self, delivery: &DeliveryMode) {
        let mut channel = self.channel.lock();
        let (DeliveryMode::Push(endpoint), Some(transport)) = (delivery, &self.transport) else {
            if let Some(task) = channel.take() {
                task.stop();
            }
            return;
        };
        if channel.as_ref().is_some_and(|task| task.serves(endpoint)) {
            return;
        }

        if let Some(task) = channel.take() {
            task.stop();
        }
        *channel = Some(ChannelTask::spawn(
            Arc::clone(transport),
            endpoint.clone(),
            self.dispatch.clone(),
            self.config.reconnect_backoff,
            self.cancel.child_token(),
        ));
    }

    fn stop_channel(&self) {
        if let Some(task) = self.channel.lock().take() {
            task.stop();
        }
    }
}

/// Renews the subscription when the scheduled deadline is reached.
///
/// The deadline is replaced after every creation, renewal or removal; a
/// cleared deadline parks the task until the next one.
async fn renewal_task(
    inner: Weak<ManagerInner>,
    mut deadline: watch::Receiver<Option<Instant>>,
    cancel: CancellationToken,
) {
    loop {
        let next = *deadline.borrow_and_update();
        let due = async move {
            match next {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            () = cancel.cancelled() => break,
            changed = deadline.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            () = due => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.deadline.send_if_modified(|current| {
                    let fired = *current == next;
                    if fired {
                        *current = None;
                    }
                    fired
                });
                tokio::select! {
                    () = cancel.cancelled() => break,
                    result = inner.renew() => {
                        if let Err(err) = result {
                            debug!(%err, "scheduled renewal ended without subscription");
                        }
                    }
                }
            }
        }
    }
    debug!("renewal task stopped");
}
