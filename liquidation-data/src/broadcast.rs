use crate::{
    event::LiquidationEvent,
    message::ServerMessage,
    stats::{StatsAggregator, StatsSnapshot},
};
use derive_more::Display;
use fnv::FnvHashMap;
use itertools::Itertools;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// Reason sent in the `going_away` message to an evicted subscriber.
pub const REASON_HEARTBEAT_TIMEOUT: &str = "heartbeat timeout";

/// Shortest period [`Broadcaster::run_sweep`] ticks at, shorter intervals are clamped.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Subscriber registry & fan-out configuration.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
pub struct BroadcastConfig {
    /// Subscribers without a heartbeat for longer than this are evicted.
    pub heartbeat_timeout: Duration,
    /// Period of the stale subscriber sweep, at least [`MIN_SWEEP_INTERVAL`].
    pub sweep_interval: Duration,
    /// Capacity of each subscriber's outbound queue.
    pub client_buffer: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
            client_buffer: 256,
        }
    }
}

/// Unique identifier of a registered subscriber, never reused within a process.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
pub struct SubscriberId(pub u64);

/// Reason a message could not be handed to a [`SubscriberSink`].
#[derive(Copy, Clone, Eq, PartialEq, Debug, Error)]
pub enum DeliveryError {
    /// Outbound queue is full, the message is dropped for this subscriber only.
    #[error("subscriber queue full")]
    Full,
    /// Subscriber went away, it is unregistered.
    #[error("subscriber closed")]
    Closed,
}

/// Non-blocking send capability of a subscriber, owned by the [`Broadcaster`].
///
/// The transport session on the other side must not hold a clone of the sink: dropping the
/// registry's sink is how eviction reaches the session.
pub trait SubscriberSink: Debug + Send + Sync + 'static {
    fn try_deliver(&self, message: Arc<ServerMessage>) -> Result<(), DeliveryError>;
}

impl SubscriberSink for mpsc::Sender<Arc<ServerMessage>> {
    fn try_deliver(&self, message: Arc<ServerMessage>) -> Result<(), DeliveryError> {
        self.try_send(message).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

#[derive(Debug)]
struct SubscriberHandle {
    sink: Box<dyn SubscriberSink>,
    dropped: AtomicU64,
}

impl SubscriberHandle {
    fn deliver(&self, id: SubscriberId, message: Arc<ServerMessage>) -> Result<(), DeliveryError> {
        let result = self.sink.try_deliver(message);
        if let Err(DeliveryError::Full) = result {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(subscriber = %id, dropped, "subscriber queue full, dropping message");
        }
        result
    }
}

#[derive(Debug)]
struct Subscriber {
    handle: Arc<SubscriberHandle>,
    last_heartbeat: Instant,
}

/// Registry of live subscribers that fans every event and stats snapshot out to all of them.
///
/// Delivery never blocks: each subscriber has a bounded queue, a full queue drops the message
/// for that subscriber only and a closed one is unregistered. A failure delivering to one
/// subscriber never affects the others.
#[derive(Debug)]
pub struct Broadcaster {
    aggregator: Arc<StatsAggregator>,
    config: BroadcastConfig,
    next_id: AtomicU64,
    subscribers: RwLock<FnvHashMap<SubscriberId, Subscriber>>,
}

impl Broadcaster {
    pub fn new(aggregator: Arc<StatsAggregator>, config: BroadcastConfig) -> Self {
        Self {
            aggregator,
            config,
            next_id: AtomicU64::new(0),
            subscribers: RwLock::new(FnvHashMap::default()),
        }
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Register a subscriber, delivering the current stats snapshot followed by the recent
    /// event log before any subsequent event.
    ///
    /// The snapshot is taken while holding the registry write lock, so a concurrent publish
    /// either lands before the snapshot or is delivered to this subscriber after it.
    pub fn register<S>(&self, sink: S) -> SubscriberId
    where
        S: SubscriberSink,
    {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = Arc::new(SubscriberHandle {
            sink: Box::new(sink),
            dropped: AtomicU64::new(0),
        });

        let mut subscribers = self.subscribers.write();
        let (snapshot, recent) = self.aggregator.snapshot_with_recent();

        let initial = [
            ServerMessage::Snapshot(snapshot),
            ServerMessage::Recent { events: recent },
        ];
        for message in initial {
            if let Err(DeliveryError::Closed) = handle.deliver(id, Arc::new(message)) {
                debug!(subscriber = %id, "subscriber closed during registration");
                return id;
            }
        }

        subscribers.insert(
            id,
            Subscriber {
                handle,
                last_heartbeat: Instant::now(),
            },
        );
        info!(subscriber = %id, subscribers = subscribers.len(), "subscriber registered");

        id
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write();
        let removed = subscribers.remove(&id).is_some();
        if removed {
            info!(subscriber = %id, subscribers = subscribers.len(), "subscriber unregistered");
        }
        removed
    }

    /// Refresh the heartbeat of a subscriber. Returns `false` if it is not registered.
    pub fn heartbeat(&self, id: SubscriberId) -> bool {
        match self.subscribers.write().get_mut(&id) {
            Some(subscriber) => {
                subscriber.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Deliver a message to a single subscriber, eg/ a heartbeat acknowledgement.
    pub fn send_to(&self, id: SubscriberId, message: ServerMessage) -> Result<(), DeliveryError> {
        let handle = self
            .subscribers
            .read()
            .get(&id)
            .map(|subscriber| Arc::clone(&subscriber.handle))
            .ok_or(DeliveryError::Closed)?;

        let result = handle.deliver(id, Arc::new(message));
        if let Err(DeliveryError::Closed) = result {
            self.unregister(id);
        }
        result
    }

    /// Fan a [`LiquidationEvent`] out to every subscriber. Returns the number of subscribers
    /// it was delivered to.
    pub fn publish(&self, event: &LiquidationEvent) -> usize {
        self.publish_message(Arc::new(ServerMessage::Liquidation(event.clone())))
    }

    /// Fan a [`StatsSnapshot`] out to every subscriber. Returns the number of subscribers it
    /// was delivered to.
    pub fn publish_snapshot(&self, snapshot: &StatsSnapshot) -> usize {
        self.publish_message(Arc::new(ServerMessage::Snapshot(snapshot.clone())))
    }

    fn publish_message(&self, message: Arc<ServerMessage>) -> usize {
        // Deliver outside the lock so registration and heartbeats are never held up by fan-out
        let live = self
            .subscribers
            .read()
            .iter()
            .map(|(id, subscriber)| (*id, Arc::clone(&subscriber.handle)))
            .collect_vec();

        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, handle) in live {
            match handle.deliver(id, Arc::clone(&message)) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::Full) => {}
                Err(DeliveryError::Closed) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in closed {
                if subscribers.remove(&id).is_some() {
                    info!(subscriber = %id, "subscriber closed, unregistered");
                }
            }
        }

        delivered
    }

    /// Evict every subscriber whose last heartbeat is older than the heartbeat timeout at
    /// `now`, sending each a best-effort `going_away`. Returns the evicted subscribers.
    pub fn sweep(&self, now: Instant) -> Vec<SubscriberId> {
        let timeout = self.config.heartbeat_timeout;
        let is_stale =
            |subscriber: &Subscriber| now.saturating_duration_since(subscriber.last_heartbeat) > timeout;

        let stale = self
            .subscribers
            .read()
            .iter()
            .filter(|&(_, subscriber)| is_stale(subscriber))
            .map(|(id, _)| *id)
            .collect_vec();

        if stale.is_empty() {
            return stale;
        }

        // Re-check under the write lock, a heartbeat may have landed in between
        let mut evicted = Vec::with_capacity(stale.len());
        {
            let mut subscribers = self.subscribers.write();
            for id in stale {
                if subscribers.get(&id).is_some_and(is_stale) {
                    if let Some(subscriber) = subscribers.remove(&id) {
                        evicted.push((id, subscriber));
                    }
                }
            }
        }

        let going_away = Arc::new(ServerMessage::going_away(REASON_HEARTBEAT_TIMEOUT));
        evicted
            .into_iter()
            .map(|(id, subscriber)| {
                warn!(subscriber = %id, "evicting subscriber after heartbeat timeout");
                let _ = subscriber.handle.deliver(id, Arc::clone(&going_away));
                id
            })
            .collect()
    }

    /// Periodically [`sweep`](Self::sweep) stale subscribers until shutdown is signalled.
    pub async fn run_sweep(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.sweep_interval.max(MIN_SWEEP_INTERVAL));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let evicted = self.sweep(Instant::now());
                    if !evicted.is_empty() {
                        debug!(evicted = evicted.len(), "stale subscriber sweep");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Send `going_away` to every subscriber and clear the registry. Returns the number of
    /// subscribers closed.
    pub fn close_all(&self, reason: &str) -> usize {
        let drained = self.subscribers.write().drain().collect_vec();

        let going_away = Arc::new(ServerMessage::going_away(reason));
        for (id, subscriber) in &drained {
            let _ = subscriber.handle.deliver(*id, Arc::clone(&going_away));
        }

        info!(subscribers = drained.len(), %reason, "closed all subscribers");
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.read().contains_key(&id)
    }

    /// Messages dropped for a subscriber because its queue was full.
    pub fn dropped(&self, id: SubscriberId) -> Option<u64> {
        self.subscribers
            .read()
            .get(&id)
            .map(|subscriber| subscriber.handle.dropped.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::{Asset, Side},
        exchange::ExchangeId,
        stats::AssetStats,
    };
    use chrono::Utc;

    type Rx = mpsc::Receiver<Arc<ServerMessage>>;

    fn event(asset: Asset, side: Side, quantity: f64, price: f64) -> LiquidationEvent {
        LiquidationEvent::new(
            asset,
            side,
            quantity,
            price,
            ExchangeId::BybitPerpetualsUsd,
            Utc::now(),
        )
        .unwrap()
    }

    fn broadcaster() -> (Arc<StatsAggregator>, Broadcaster) {
        let aggregator = Arc::new(StatsAggregator::new());
        let broadcaster = Broadcaster::new(Arc::clone(&aggregator), BroadcastConfig::default());
        (aggregator, broadcaster)
    }

    fn subscribe(broadcaster: &Broadcaster, capacity: usize) -> (SubscriberId, Rx) {
        let (tx, rx) = mpsc::channel(capacity);
        (broadcaster.register(tx), rx)
    }

    fn drain(rx: &mut Rx) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(ServerMessage::clone(&message));
        }
        messages
    }

    #[test]
    fn test_register_delivers_snapshot_then_recent() {
        let (_, broadcaster) = broadcaster();

        let (id, mut rx) = subscribe(&broadcaster, 8);

        assert!(broadcaster.contains(id));
        assert_eq!(
            drain(&mut rx),
            vec![
                ServerMessage::Snapshot(StatsSnapshot::default()),
                ServerMessage::Recent { events: vec![] },
            ]
        );
    }

    #[test]
    fn test_late_joiner_receives_current_snapshot() {
        let (aggregator, broadcaster) = broadcaster();

        for _ in 0..5 {
            let event = event(Asset::Btc, Side::Long, 1.0, 60000.0);
            let snapshot = aggregator.apply(&event);
            broadcaster.publish(&event);
            broadcaster.publish_snapshot(&snapshot);
        }

        let (_, mut rx) = subscribe(&broadcaster, 8);

        let messages = drain(&mut rx);
        let ServerMessage::Snapshot(snapshot) = &messages[0] else {
            panic!("first message must be a snapshot: {messages:?}");
        };
        assert_eq!(
            snapshot.get(Asset::Btc),
            AssetStats {
                long_count: 5,
                short_count: 0,
                cumulative_value: 300000.0,
            }
        );
        let ServerMessage::Recent { events } = &messages[1] else {
            panic!("second message must be the recent log: {messages:?}");
        };
        assert_eq!(events.len(), 5);
    }

    #[test]
    fn test_publish_isolates_closed_subscriber() {
        let (_, broadcaster) = broadcaster();
        let (a, mut rx_a) = subscribe(&broadcaster, 8);
        let (b, rx_b) = subscribe(&broadcaster, 8);
        drop(rx_b);
        drain(&mut rx_a);

        let event = event(Asset::Sol, Side::Short, 10.0, 150.0);
        let delivered = broadcaster.publish(&event);

        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut rx_a), vec![ServerMessage::Liquidation(event)]);
        assert!(broadcaster.contains(a));
        assert!(!broadcaster.contains(b));
        assert_eq!(broadcaster.len(), 1);
    }

    #[test]
    fn test_full_queue_drops_message_without_eviction() {
        let (_, broadcaster) = broadcaster();
        // Capacity 2 is filled by the registration snapshot & recent log
        let (id, mut rx) = subscribe(&broadcaster, 2);

        let delivered = broadcaster.publish(&event(Asset::Eth, Side::Long, 1.0, 3000.0));

        assert_eq!(delivered, 0);
        assert!(broadcaster.contains(id));
        assert_eq!(broadcaster.dropped(id), Some(1));

        // Once drained the subscriber receives subsequent messages
        drain(&mut rx);
        assert_eq!(broadcaster.publish_snapshot(&StatsSnapshot::default()), 1);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let (_, broadcaster) = broadcaster();
        let (id, _rx) = subscribe(&broadcaster, 8);

        assert!(broadcaster.unregister(id));
        assert!(!broadcaster.unregister(id));
        assert!(!broadcaster.heartbeat(id));
        assert!(broadcaster.is_empty());
    }

    #[test]
    fn test_send_to() {
        let (_, broadcaster) = broadcaster();
        let (id, mut rx) = subscribe(&broadcaster, 8);
        drain(&mut rx);

        let ack = ServerMessage::heartbeat_ack();
        assert_eq!(broadcaster.send_to(id, ack.clone()), Ok(()));
        assert_eq!(drain(&mut rx), vec![ack]);

        assert_eq!(
            broadcaster.send_to(SubscriberId(99), ServerMessage::heartbeat_ack()),
            Err(DeliveryError::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_stale_subscribers() {
        let (_, broadcaster) = broadcaster();
        let (a, mut rx_a) = subscribe(&broadcaster, 8);
        let (b, mut rx_b) = subscribe(&broadcaster, 8);
        drain(&mut rx_a);
        drain(&mut rx_b);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(broadcaster.heartbeat(a));
        tokio::time::advance(Duration::from_secs(15)).await;

        let evicted = broadcaster.sweep(Instant::now());

        assert_eq!(evicted, vec![b]);
        assert!(broadcaster.contains(a));
        assert!(!broadcaster.contains(b));
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMessage::going_away(REASON_HEARTBEAT_TIMEOUT)]
        );
        // Sink dropped with the registry entry
        assert!(rx_b.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_honours_heartbeat_at_boundary() {
        let (_, broadcaster) = broadcaster();
        let (id, _rx) = subscribe(&broadcaster, 8);

        tokio::time::advance(Duration::from_secs(30)).await;

        assert!(broadcaster.sweep(Instant::now()).is_empty());
        assert!(broadcaster.contains(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweep_evicts_silent_subscriber() {
        let aggregator = Arc::new(StatsAggregator::new());
        let broadcaster = Arc::new(Broadcaster::new(aggregator, BroadcastConfig::default()));
        let (id, _rx) = subscribe(&broadcaster, 8);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = tokio::spawn({
            let broadcaster = Arc::clone(&broadcaster);
            async move { broadcaster.run_sweep(shutdown_rx).await }
        });

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(!broadcaster.contains(id));

        shutdown_tx.send_replace(true);
        sweeper.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweep_clamps_zero_interval() {
        let config = BroadcastConfig {
            sweep_interval: Duration::ZERO,
            ..BroadcastConfig::default()
        };
        let broadcaster = Arc::new(Broadcaster::new(Arc::new(StatsAggregator::new()), config));
        let (id, _rx) = subscribe(&broadcaster, 8);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = tokio::spawn({
            let broadcaster = Arc::clone(&broadcaster);
            async move { broadcaster.run_sweep(shutdown_rx).await }
        });

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!broadcaster.contains(id));

        shutdown_tx.send_replace(true);
        sweeper.await.unwrap();
    }

    #[test]
    fn test_close_all() {
        let (_, broadcaster) = broadcaster();
        let (_, mut rx_a) = subscribe(&broadcaster, 8);
        let (_, mut rx_b) = subscribe(&broadcaster, 8);
        drain(&mut rx_a);
        drain(&mut rx_b);

        assert_eq!(broadcaster.close_all("server shutting down"), 2);

        assert!(broadcaster.is_empty());
        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(drain(rx), vec![ServerMessage::going_away("server shutting down")]);
        }
    }

    #[test]
    fn test_subscriber_ids_are_unique() {
        let (_, broadcaster) = broadcaster();
        let (a, _rx_a) = subscribe(&broadcaster, 8);
        broadcaster.unregister(a);
        let (b, _rx_b) = subscribe(&broadcaster, 8);

        assert_ne!(a, b);
    }
}
