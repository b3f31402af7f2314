use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::ReservationEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for reservation events, one channel per restaurant.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<ReservationEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a restaurant's events. Creates the channel if needed.
    pub fn subscribe(&self, restaurant_id: Ulid) -> broadcast::Receiver<ReservationEvent> {
        let sender = self
            .channels
            .entry(restaurant_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, restaurant_id: Ulid, event: &ReservationEvent) {
        if let Some(sender) = self.channels.get(&restaurant_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop channels whose listeners have all gone away.
    pub fn prune(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
        before - self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReservationStatus;

    fn status_changed() -> ReservationEvent {
        ReservationEvent::StatusChanged {
            reservation_id: Ulid::new(),
            table_id: Ulid::new(),
            from: ReservationStatus::Pending,
            to: ReservationStatus::Confirmed,
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let mut rx = hub.subscribe(rid);

        let event = status_changed();
        hub.send(rid, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn events_stay_within_restaurant() {
        let hub = NotifyHub::new();
        let (a, b) = (Ulid::new(), Ulid::new());
        let mut rx_a = hub.subscribe(a);
        let _rx_b = hub.subscribe(b);

        hub.send(b, &status_changed());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(Ulid::new(), &status_changed());
    }

    #[test]
    fn prune_drops_abandoned_channels() {
        let hub = NotifyHub::new();
        let kept = hub.subscribe(Ulid::new());
        drop(hub.subscribe(Ulid::new()));
        assert_eq!(hub.prune(), 1);
        drop(kept);
        assert_eq!(hub.prune(), 1);
    }
}
