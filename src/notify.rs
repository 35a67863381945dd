use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Channel name for reservation lifecycle notifications.
pub const RESERVATIONS_CHANNEL: &str = "reservations";

/// Broadcast hub for LISTEN/NOTIFY, one channel per topic name.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a topic. Creates the channel if needed.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, topic: &str, event: &Event) {
        if let Some(sender) = self.channels.get(topic) {
            let _ = sender.send(event.clone());
        }
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
    use crate::model::ReservationStatus;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(RESERVATIONS_CHANNEL);

        let event = Event::ReservationStatusChanged {
            id: Ulid::new(),
            status: ReservationStatus::Seated,
        };
        hub.send(RESERVATIONS_CHANNEL, &event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(
            RESERVATIONS_CHANNEL,
            &Event::ReservationStatusChanged {
                id: Ulid::new(),
                status: ReservationStatus::Cancelled,
            },
        );
    }
}
