//! Bus Module
//!
//! The publish/subscribe messaging collaborator carrying invalidation
//! traffic, plus connectivity-state callbacks consumed by the reconnection
//! handler.
//!
//! [`MemoryBus`] is a process-local reference implementation: every
//! subscription gets its own delivery task fed by an unbounded queue, so
//! delivery order is preserved per sender while handlers run off the
//! publisher's task. Its `simulate_*` hooks model messaging outages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::error::{NearMapError, Result};

/// Identifier of an active channel subscription.
pub type SubscriptionId = Uuid;

// == Connection State ==
/// Connectivity of the messaging channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The channel is up and delivering
    Connected,
    /// The channel dropped; messages published elsewhere are being missed
    Disconnected,
    /// The channel recovered and subscriptions are active again
    Reconnected,
}

// == Subscriber Traits ==
/// Receiver of messages published on a subscribed channel.
#[async_trait]
pub trait BusSubscriber: Send + Sync {
    /// Handles one message payload. Called from the delivery task, one
    /// message at a time per subscription.
    async fn on_message(&self, payload: Vec<u8>);
}

/// Receiver of connectivity-state transitions.
#[async_trait]
pub trait ConnectionStateListener: Send + Sync {
    /// Handles a connectivity transition.
    async fn on_state_change(&self, state: ConnectionState);
}

// == Bus Trait ==
/// Publish/subscribe messaging collaborator.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Subscribes a handler to a channel.
    async fn subscribe(
        &self,
        channel: &str,
        subscriber: Arc<dyn BusSubscriber>,
    ) -> Result<SubscriptionId>;

    /// Publishes a payload to every subscriber of a channel.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()>;

    /// Cancels a subscription. Unknown ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    /// Registers a connectivity-state listener.
    async fn add_state_listener(&self, listener: Arc<dyn ConnectionStateListener>);
}

// == Memory Bus ==
struct Subscription {
    channel: String,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct BusInner {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    state_listeners: Vec<Arc<dyn ConnectionStateListener>>,
}

/// In-process [`Bus`] implementation backed by per-subscription queues.
#[derive(Default)]
pub struct MemoryBus {
    inner: Mutex<BusInner>,
    connected: AtomicBool,
}

impl MemoryBus {
    /// Creates a connected bus with no subscriptions.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner::default()),
            connected: AtomicBool::new(true),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns true while the simulated link is up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    // == Outage Simulation ==
    /// Drops the simulated link: publishes fail until reconnection.
    pub async fn simulate_disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.notify_state(ConnectionState::Disconnected).await;
    }

    /// Restores the simulated link and announces resubscription.
    pub async fn simulate_reconnect(&self) {
        self.connected.store(true, Ordering::Relaxed);
        self.notify_state(ConnectionState::Reconnected).await;
    }

    async fn notify_state(&self, state: ConnectionState) {
        let listeners: Vec<_> = self.lock().state_listeners.clone();
        for listener in listeners {
            listener.on_state_change(state).await;
        }
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn subscribe(
        &self,
        channel: &str,
        subscriber: Arc<dyn BusSubscriber>,
    ) -> Result<SubscriptionId> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let task = tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                subscriber.on_message(payload).await;
            }
        });
        let id = Uuid::new_v4();
        debug!(channel, %id, "bus subscription created");
        self.lock().subscriptions.insert(
            id,
            Subscription {
                channel: channel.to_string(),
                tx,
                task,
            },
        );
        Ok(id)
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        if !self.is_connected() {
            return Err(NearMapError::Bus("bus disconnected".into()));
        }
        let targets: Vec<mpsc::UnboundedSender<Vec<u8>>> = self
            .lock()
            .subscriptions
            .values()
            .filter(|sub| sub.channel == channel)
            .map(|sub| sub.tx.clone())
            .collect();
        for tx in targets {
            // A closed queue means the subscription is being torn down
            let _ = tx.send(payload.clone());
        }
        Ok(())
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        if let Some(subscription) = self.lock().subscriptions.remove(&id) {
            debug!(channel = %subscription.channel, %id, "bus subscription removed");
            drop(subscription.tx);
            subscription.task.abort();
        }
        Ok(())
    }

    async fn add_state_listener(&self, listener: Arc<dyn ConnectionStateListener>) {
        self.lock().state_listeners.push(listener);
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        payloads: Mutex<Vec<Vec<u8>>>,
        states: Mutex<Vec<ConnectionState>>,
    }

    #[async_trait]
    impl BusSubscriber for Recorder {
        async fn on_message(&self, payload: Vec<u8>) {
            self.payloads.lock().unwrap().push(payload);
        }
    }

    #[async_trait]
    impl ConnectionStateListener for Recorder {
        async fn on_state_change(&self, state: ConnectionState) {
            self.states.lock().unwrap().push(state);
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_channel_subscribers() {
        let bus = MemoryBus::new();
        let sub = Arc::new(Recorder::default());
        let other = Arc::new(Recorder::default());

        bus.subscribe("a:topic", sub.clone()).await.unwrap();
        bus.subscribe("b:topic", other.clone()).await.unwrap();

        bus.publish("a:topic", b"m1".to_vec()).await.unwrap();
        bus.publish("a:topic", b"m2".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let seen = sub.payloads.lock().unwrap().clone();
        assert_eq!(seen, vec![b"m1".to_vec(), b"m2".to_vec()]);
        assert!(other.payloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_fails_while_disconnected() {
        let bus = MemoryBus::new();
        bus.simulate_disconnect().await;

        let result = bus.publish("a:topic", b"m".to_vec()).await;
        assert!(matches!(result, Err(NearMapError::Bus(_))));

        bus.simulate_reconnect().await;
        assert!(bus.publish("a:topic", b"m".to_vec()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = MemoryBus::new();
        let sub = Arc::new(Recorder::default());
        let id = bus.subscribe("a:topic", sub.clone()).await.unwrap();

        bus.unsubscribe(id).await.unwrap();
        bus.publish("a:topic", b"m".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(sub.payloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_state_listener_sees_transitions() {
        let bus = MemoryBus::new();
        let listener = Arc::new(Recorder::default());
        bus.add_state_listener(listener.clone()).await;

        bus.simulate_disconnect().await;
        bus.simulate_reconnect().await;

        let states = listener.states.lock().unwrap().clone();
        assert_eq!(
            states,
            vec![ConnectionState::Disconnected, ConnectionState::Reconnected]
        );
    }
}
