use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-business change notifications.
///
/// Delivery is fire-and-forget: a send with no subscribers, or to a lagged
/// subscriber, never blocks or fails the operation that produced the event.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a business. Creates the channel if needed.
    pub fn subscribe(&self, business_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(business_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, business_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&business_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when the business is deleted).
    pub fn remove(&self, business_id: &Ulid) {
        self.channels.remove(business_id);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookingPolicy;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let business_id = Ulid::new();
        let mut rx = hub.subscribe(business_id);

        let event = Event::BusinessCreated {
            id: business_id,
            name: Some("corner barbershop".into()),
            policy: BookingPolicy::default(),
        };
        hub.send(business_id, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let business_id = Ulid::new();
        // No subscriber — should not panic
        hub.send(business_id, &Event::BusinessDeleted { id: business_id });
    }

    #[tokio::test]
    async fn channels_are_isolated_per_business() {
        let hub = NotifyHub::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let mut rx_a = hub.subscribe(a);
        let _rx_b = hub.subscribe(b);

        hub.send(b, &Event::BusinessDeleted { id: b });

        assert!(rx_a.try_recv().is_err());
    }
}
