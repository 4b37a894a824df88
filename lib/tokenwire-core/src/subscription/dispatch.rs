use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{NotificationEvent, SubscriptionNotice};

/// A registered callback.
pub(crate) type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Callbacks registered on a manager, replaceable at any time.
#[derive(Default)]
pub(crate) struct Handlers {
    notification: RwLock<Option<Callback<NotificationEvent>>>,
    notice: RwLock<Option<Callback<SubscriptionNotice>>>,
}

impl Handlers {
    pub(crate) fn set_notification(&self, callback: Callback<NotificationEvent>) {
        *self.notification.write() = Some(callback);
    }

    pub(crate) fn set_notice(&self, callback: Callback<SubscriptionNotice>) {
        *self.notice.write() = Some(callback);
    }
}

/// Messages queued for the dispatch task.
pub(crate) enum DispatchMessage {
    /// A decoded notification for the notification callback.
    Event(NotificationEvent),

    /// A notice for the notice callback.
    Notice(SubscriptionNotice),
}

/// Sender side of the dispatch queue.
///
/// Sending never blocks, so the receive loop is never slowed down by a
/// callback.
#[derive(Debug, Clone)]
pub(crate) struct DispatchSender {
    inner: mpsc::UnboundedSender<DispatchMessage>,
}

impl DispatchSender {
    /// Spawns the dispatch task, stopped by `cancel`.
    pub(crate) fn spawn(handlers: Arc<Handlers>, cancel: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_task(receiver, handlers, cancel));
        Self { inner: sender }
    }

    pub(crate) fn event(&self, event: NotificationEvent) {
        self.send(DispatchMessage::Event(event));
    }

    pub(crate) fn notice(&self, notice: SubscriptionNotice) {
        self.send(DispatchMessage::Notice(notice));
    }

    fn send(&self, message: DispatchMessage) {
        if self.inner.send(message).is_err() {
            debug!("dispatch task stopped, dropping message");
        }
    }
}

/// Delivers queued messages one at a time, in order.
///
/// Each callback runs on the blocking pool and is awaited before the next one
/// starts; a panicking callback is logged and delivery goes on.
async fn dispatch_task(
    mut receiver: mpsc::UnboundedReceiver<DispatchMessage>,
    handlers: Arc<Handlers>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            () = cancel.cancelled() => break,
            message = receiver.recv() => message,
        };
        let Some(message) = message else {
            break;
        };

        match message {
            DispatchMessage::Event(event) => {
                let callback = handlers.notification.read().clone();
                run("notification", callback, event).await;
            }
            DispatchMessage::Notice(notice) => {
                let callback = handlers.notice.read().clone();
                run("notice", callback, notice).await;
            }
        }
    }
    debug!("dispatch task stopped");
}

async fn run<T>(kind: &'static str, callback: Option<Callback<T>>, value: T)
where
    T: Send + 'static,
{
    let Some(callback) = callback else {
        debug!(kind, "no handler registered, dropping message");
        return;
    };

    if let Err(err) = tokio::task::spawn_blocking(move || callback(value)).await {
        if err.is_panic() {
            error!(kind, "handler panicked, continuing delivery");
        } else {
            error!(kind, %err, "handler task failed");
        }
    }
}
