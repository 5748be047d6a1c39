//! Subscriber registry and fan-out

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::DeliveryError;
use crate::models::BroadcastPayload;

use super::subscriber::{Frame, Subscriber, SubscriberId};

/// Result of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers that accepted the frame
    pub delivered: usize,
    /// Subscribers removed because their send failed
    pub dropped: usize,
}

/// Fans payloads out to every registered subscriber
///
/// Slow subscribers are dropped rather than allowed to hold up the
/// publisher: a subscriber whose send fails for any reason is unregistered
/// and closed inside the same call. Payloads reach each subscriber in the
/// order `publish` was called.
pub struct BroadcastHub {
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
    dropped_total: AtomicU64,
}

impl BroadcastHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            dropped_total: AtomicU64::new(0),
        }
    }

    /// Add a subscriber
    pub fn register(&self, subscriber: Arc<dyn Subscriber>) {
        let id = subscriber.id();
        let count = {
            let mut subs = self.subscribers.write();
            subs.insert(id, subscriber);
            subs.len()
        };
        metrics::gauge!("hydrowatch_subscribers").set(count as f64);
        info!(subscriber_id = %id, count, "Subscriber registered");
    }

    /// Add a subscriber and send it `snapshot` first
    ///
    /// The snapshot is built and sent while the registry is locked, so every
    /// payload published afterwards reaches the subscriber and nothing
    /// published in between is missed.
    pub fn register_with_snapshot<F>(
        &self,
        subscriber: Arc<dyn Subscriber>,
        snapshot: F,
    ) -> Result<(), DeliveryError>
    where
        F: FnOnce() -> BroadcastPayload,
    {
        let id = subscriber.id();
        let count = {
            let mut subs = self.subscribers.write();
            let frame = encode(&snapshot()).ok_or(DeliveryError::Encoding)?;
            subscriber.send(frame)?;
            subs.insert(id, subscriber);
            subs.len()
        };
        metrics::gauge!("hydrowatch_subscribers").set(count as f64);
        info!(subscriber_id = %id, count, "Subscriber registered with snapshot");
        Ok(())
    }

    /// Remove a subscriber; returns whether it was registered
    pub fn unregister(&self, id: &SubscriberId) -> bool {
        let (removed, count) = {
            let mut subs = self.subscribers.write();
            let removed = subs.remove(id).is_some();
            (removed, subs.len())
        };
        if removed {
            metrics::gauge!("hydrowatch_subscribers").set(count as f64);
            info!(subscriber_id = %id, count, "Subscriber unregistered");
        }
        removed
    }

    /// Deliver `payload` to every registered subscriber
    ///
    /// Never fails: subscribers that cannot take the frame are dropped and
    /// counted in the report.
    pub fn publish(&self, payload: &BroadcastPayload) -> PublishReport {
        let Some(frame) = encode(payload) else {
            return PublishReport::default();
        };

        let report = self.deliver(|sub| sub.send(frame.clone()));
        debug!(
            kind = payload.kind(),
            delivered = report.delivered,
            dropped = report.dropped,
            "Published"
        );
        report
    }

    /// Send a keep-alive to every subscriber, dropping the unreachable ones
    pub fn ping_all(&self) -> PublishReport {
        self.deliver(|sub| sub.ping())
    }

    /// Close and forget every subscriber
    pub fn close_all(&self) {
        let drained: Vec<Arc<dyn Subscriber>> = {
            let mut subs = self.subscribers.write();
            subs.drain().map(|(_, sub)| sub).collect()
        };
        for sub in &drained {
            sub.close();
        }
        metrics::gauge!("hydrowatch_subscribers").set(0.0);
        info!(count = drained.len(), "Closed all subscribers");
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Whether `id` is currently registered
    pub fn is_registered(&self, id: &SubscriberId) -> bool {
        self.subscribers.read().contains_key(id)
    }

    /// Subscribers dropped for failed sends since startup
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    fn deliver<F>(&self, attempt: F) -> PublishReport
    where
        F: Fn(&dyn Subscriber) -> Result<(), DeliveryError>,
    {
        // Copy the targets so sends happen without holding the lock.
        let targets: Vec<Arc<dyn Subscriber>> =
            self.subscribers.read().values().cloned().collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for sub in &targets {
            match attempt(sub.as_ref()) {
                Ok(()) => delivered += 1,
                Err(e) => failed.push((sub.id(), e)),
            }
        }

        if failed.is_empty() {
            return PublishReport {
                delivered,
                dropped: 0,
            };
        }

        let removed: Vec<(Arc<dyn Subscriber>, DeliveryError)> = {
            let mut subs = self.subscribers.write();
            failed
                .into_iter()
                .filter_map(|(id, e)| subs.remove(&id).map(|sub| (sub, e)))
                .collect()
        };

        for (sub, e) in &removed {
            warn!(subscriber_id = %sub.id(), error = %e, "Dropping subscriber");
            sub.close();
        }

        let dropped = removed.len();
        self.dropped_total
            .fetch_add(dropped as u64, Ordering::Relaxed);
        metrics::counter!("hydrowatch_subscribers_dropped_total").increment(dropped as u64);
        metrics::gauge!("hydrowatch_subscribers").set(self.subscriber_count() as f64);

        PublishReport { delivered, dropped }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(payload: &BroadcastPayload) -> Option<Frame> {
    match serde_json::to_string(payload) {
        Ok(json) => Some(Frame::from(json)),
        Err(e) => {
            error!(kind = payload.kind(), error = %e, "Failed to encode payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::subscriber::{ChannelSubscriber, Outbound};
    use crate::models::{Metrics, Reading};
    use chrono::Utc;

    fn payload(device: &str) -> BroadcastPayload {
        BroadcastPayload::Reading(Arc::new(Reading::new(device, Utc::now(), Metrics::default())))
    }

    #[test]
    fn test_register_and_unregister() {
        let hub = BroadcastHub::new();
        let (sub, _rx) = ChannelSubscriber::new(4);
        let id = sub.id();

        hub.register(Arc::new(sub));
        assert!(hub.is_registered(&id));
        assert_eq!(hub.subscriber_count(), 1);

        assert!(hub.unregister(&id));
        assert!(!hub.unregister(&id));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_publish_with_no_subscribers_is_a_noop() {
        let hub = BroadcastHub::new();
        assert_eq!(hub.publish(&payload("D1")), PublishReport::default());
    }

    #[test]
    fn test_lagging_subscriber_is_dropped() {
        let hub = BroadcastHub::new();
        let (slow, _slow_rx) = ChannelSubscriber::new(1);
        let slow_id = slow.id();
        let (fast, mut fast_rx) = ChannelSubscriber::new(8);
        hub.register(Arc::new(slow));
        hub.register(Arc::new(fast));

        assert_eq!(hub.publish(&payload("D1")).delivered, 2);
        let report = hub.publish(&payload("D2"));

        assert_eq!(report, PublishReport { delivered: 1, dropped: 1 });
        assert!(!hub.is_registered(&slow_id));
        assert_eq!(hub.dropped_total(), 1);
        assert!(matches!(fast_rx.try_recv(), Ok(Outbound::Frame(_))));
        assert!(matches!(fast_rx.try_recv(), Ok(Outbound::Frame(_))));
    }

    #[test]
    fn test_snapshot_is_first_frame() {
        let hub = BroadcastHub::new();
        let (sub, mut rx) = ChannelSubscriber::new(4);

        hub.register_with_snapshot(Arc::new(sub), || BroadcastPayload::Snapshot(Vec::new()))
            .unwrap();
        hub.publish(&payload("D1"));

        let Ok(Outbound::Frame(first)) = rx.try_recv() else {
            panic!("expected snapshot frame");
        };
        assert_eq!(&*first, r#"{"type":"snapshot","data":[]}"#);
        let Ok(Outbound::Frame(second)) = rx.try_recv() else {
            panic!("expected reading frame");
        };
        assert!(second.starts_with(r#"{"type":"reading""#));
    }

    #[test]
    fn test_snapshot_failure_keeps_its_cause() {
        let hub = BroadcastHub::new();
        let (gone, rx) = ChannelSubscriber::new(4);
        drop(rx);
        let result =
            hub.register_with_snapshot(Arc::new(gone), || BroadcastPayload::Snapshot(Vec::new()));
        assert_eq!(result, Err(DeliveryError::Disconnected));

        let (full, _rx) = ChannelSubscriber::new(1);
        full.send(Frame::from("queued")).unwrap();
        let result =
            hub.register_with_snapshot(Arc::new(full), || BroadcastPayload::Snapshot(Vec::new()));
        assert_eq!(result, Err(DeliveryError::Lagging));

        assert_ne!(DeliveryError::Encoding, DeliveryError::Disconnected);
        assert_eq!(DeliveryError::Encoding.to_string(), "payload could not be encoded");
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_close_all_empties_registry() {
        let hub = BroadcastHub::new();
        let (sub, mut rx) = ChannelSubscriber::new(4);
        hub.register(Arc::new(sub));

        hub.close_all();

        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(rx.try_recv(), Ok(Outbound::Close));
    }
}
