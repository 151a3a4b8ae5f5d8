// ── In-memory gateway ──
//
// A gateway with no bridge behind it: published commands are recorded,
// events are injected by the owner. Backs the test suites.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{BridgeEvent, BridgeEventStream, CommandGateway, GatewayError, OutboundCommand};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Loopback [`CommandGateway`].
pub struct LoopbackGateway {
    events: broadcast::Sender<BridgeEvent>,
    published: Mutex<Vec<OutboundCommand>>,
    fail_publish: AtomicBool,
    transactions: AtomicBool,
    next_transaction: AtomicU64,
    /// Cancelled to sever every live subscription at once.
    subscriptions: Mutex<CancellationToken>,
}

impl LoopbackGateway {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            events,
            published: Mutex::new(Vec::new()),
            fail_publish: AtomicBool::new(false),
            transactions: AtomicBool::new(false),
            next_transaction: AtomicU64::new(1),
            subscriptions: Mutex::new(CancellationToken::new()),
        }
    }

    /// Deliver an event to every current subscriber. Returns how many
    /// subscribers received it.
    pub fn emit(&self, event: BridgeEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    pub fn published(&self) -> Vec<OutboundCommand> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn published_count(&self) -> usize {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Make subsequent publishes fail with a transport error.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Hand out `tx-N` correlation handles from `publish`.
    pub fn set_transactions(&self, enabled: bool) {
        self.transactions.store(enabled, Ordering::SeqCst);
    }

    /// End every live subscription stream, as a transport drop would.
    pub fn drop_subscriptions(&self) {
        let mut token = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        *token = CancellationToken::new();
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for LoopbackGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandGateway for LoopbackGateway {
    fn publish(&self, command: &OutboundCommand) -> Result<Option<String>, GatewayError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(GatewayError::Publish("loopback configured to fail".into()));
        }

        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.clone());

        if self.transactions.load(Ordering::SeqCst) {
            let n = self.next_transaction.fetch_add(1, Ordering::SeqCst);
            Ok(Some(format!("tx-{n}")))
        } else {
            Ok(None)
        }
    }

    fn subscribe(&self) -> BridgeEventStream {
        let severed = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let stream = BroadcastStream::new(self.events.subscribe())
            .filter_map(|item| {
                futures_util::future::ready(match item {
                    Ok(event) => Some(event),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "loopback subscriber lagged");
                        None
                    }
                })
            })
            .take_until(severed.cancelled_owned());

        Box::pin(stream)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;

    fn command() -> OutboundCommand {
        OutboundCommand {
            kind: OperationKind::PermitJoin,
            target: None,
            payload: serde_json::json!({ "value": true }),
        }
    }

    #[test]
    fn publish_records_commands() {
        let gateway = LoopbackGateway::new();
        assert_eq!(gateway.publish(&command()).unwrap(), None);
        assert_eq!(gateway.published_count(), 1);
        assert_eq!(gateway.published()[0].kind, OperationKind::PermitJoin);
    }

    #[test]
    fn publish_can_fail_on_demand() {
        let gateway = LoopbackGateway::new();
        gateway.set_fail_publish(true);
        assert!(matches!(
            gateway.publish(&command()),
            Err(GatewayError::Publish(_))
        ));
        assert_eq!(gateway.published_count(), 0);
    }

    #[test]
    fn transactions_are_sequential() {
        let gateway = LoopbackGateway::new();
        gateway.set_transactions(true);
        assert_eq!(
            gateway.publish(&command()).unwrap().as_deref(),
            Some("tx-1")
        );
        assert_eq!(
            gateway.publish(&command()).unwrap().as_deref(),
            Some("tx-2")
        );
    }

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let gateway = LoopbackGateway::new();
        let mut stream = gateway.subscribe();

        assert_eq!(
            gateway.emit(BridgeEvent::ack(OperationKind::Rescan, None)),
            1
        );

        let event = stream.next().await.unwrap();
        assert_eq!(event.kind, "rescan");
    }

    #[tokio::test]
    async fn dropped_subscription_ends_the_stream() {
        let gateway = LoopbackGateway::new();
        let mut stream = gateway.subscribe();

        gateway.drop_subscriptions();

        assert!(stream.next().await.is_none());
        // A fresh subscription is live again.
        let mut fresh = gateway.subscribe();
        gateway.emit(BridgeEvent::ack(OperationKind::Rescan, None));
        assert!(fresh.next().await.is_some());
    }
}
