//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`]: the task
//! manager, session server, scheduler, and interrupt layer all publish into
//! one bounded ring, and the runtime's single listener fans events out to
//! subscribers.
//!
//! ## Rules
//! - `publish()` never blocks and never fails; with no receivers the event
//!   is dropped.
//! - Capacity is a shared ring buffer; a receiver that lags past it observes
//!   `RecvError::Lagged(n)` and skips the `n` oldest events.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given ring capacity (clamped to min 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers. Fire and forget.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates an independent receiver observing subsequent events only.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(Event::now(EventKind::SessionOpened).with_session("S1"));
        let ev = rx.recv().await.expect("event delivered");
        assert_eq!(ev.kind, EventKind::SessionOpened);
        assert_eq!(ev.session.as_deref(), Some("S1"));
    }

    #[test]
    fn test_publish_without_receiver_is_silent() {
        let bus = Bus::new(1);
        bus.publish(Event::now(EventKind::ShutdownRequested));
    }
}
