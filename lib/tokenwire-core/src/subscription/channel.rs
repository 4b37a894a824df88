use std::sync::Arc;

use futures::StreamExt as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::BackoffPolicy;
use super::dispatch::DispatchSender;
use super::transport::{DeliveryEndpoint, FrameStream, PushTransport};
use super::{NotificationEvent, SubscriptionNotice};

/// A running delivery channel.
#[derive(Debug)]
pub(crate) struct ChannelTask {
    endpoint: DeliveryEndpoint,
    cancel: CancellationToken,
}

impl ChannelTask {
    /// Spawns the receive loop for `endpoint`, stopped by `cancel`.
    pub(crate) fn spawn(
        transport: Arc<dyn PushTransport>,
        endpoint: DeliveryEndpoint,
        dispatch: DispatchSender,
        policy: BackoffPolicy,
        cancel: CancellationToken,
    ) -> Self {
        tokio::spawn(run_channel(
            transport,
            endpoint.clone(),
            dispatch,
            policy,
            cancel.clone(),
        ));
        Self { endpoint, cancel }
    }

    /// Returns `true` while the channel serves `endpoint`.
    pub(crate) fn serves(&self, endpoint: &DeliveryEndpoint) -> bool {
        self.endpoint == *endpoint && !self.cancel.is_cancelled()
    }

    pub(crate) fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Connects, receives and reconnects until cancelled or the reconnection
/// budget is spent.
///
/// The backoff restarts after a connection that delivered frames, so the
/// budget only counts consecutive failures.
async fn run_channel(
    transport: Arc<dyn PushTransport>,
    endpoint: DeliveryEndpoint,
    dispatch: DispatchSender,
    policy: BackoffPolicy,
    cancel: CancellationToken,
) {
    let mut delays = policy.delays();
    let mut failures = 0_usize;

    loop {
        let connected = tokio::select! {
            () = cancel.cancelled() => break,
            connected = transport.connect(&endpoint) => connected,
        };

        match connected {
            Ok(frames) => {
                info!(address = %endpoint.address, "delivery channel open");
                let (received, reason) = tokio::select! {
                    () = cancel.cancelled() => break,
                    closed = receive(frames, &dispatch) => closed,
                };
                warn!(address = %endpoint.address, received, %reason, "delivery channel closed");
                if received > 0 {
                    failures = 0;
                    delays = policy.delays();
                } else {
                    failures += 1;
                }
            }
            Err(err) => {
                failures += 1;
                warn!(address = %endpoint.address, failures, %err, "delivery channel connection failed");
            }
        }

        let Some(delay) = delays.next() else {
            error!(address = %endpoint.address, attempts = failures, "delivery channel lost");
            dispatch.notice(SubscriptionNotice::ChannelLost { attempts: failures });
            cancel.cancel();
            break;
        };
        debug!(?delay, "reconnecting delivery channel");

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }
    debug!(address = %endpoint.address, "delivery channel stopped");
}

/// Forwards decoded events until the stream ends, returning the number of
/// received frames and why the stream ended.
async fn receive(mut frames: FrameStream, dispatch: &DispatchSender) -> (usize, String) {
    let mut received = 0;
    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => return (received, err.to_string()),
        };
        received += 1;

        match NotificationEvent::decode(&frame) {
            Ok(event) => dispatch.event(event),
            Err(err) => debug!(%err, "ignoring frame without event"),
        }
    }
    (received, "closed by peer".to_string())
}
