//! Non-blocking handle pipeline threads use to publish bridge events.

use crate::bridge::protocol::BridgeEvent;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

/// Cloneable sender side of the outbound event queue.
///
/// Sending never blocks: a full queue drops the event, and a notifier with
/// no queue (or a disconnected one) silently does nothing.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<Sender<BridgeEvent>>,
}

impl Notifier {
    /// Creates a notifier and the receiver the bridge drains.
    pub fn channel(capacity: usize) -> (Self, Receiver<BridgeEvent>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// A notifier that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn notify(&self, event: BridgeEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => tracing::trace!(%event, "queued bridge event"),
            Err(TrySendError::Full(event)) => {
                tracing::warn!(%event, "bridge queue full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let (notifier, rx) = Notifier::channel(8);
        notifier.notify(BridgeEvent::Ready);
        notifier.notify(BridgeEvent::Deleted(0));
        notifier.notify(BridgeEvent::Deleted(1));

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                BridgeEvent::Ready,
                BridgeEvent::Deleted(0),
                BridgeEvent::Deleted(1)
            ]
        );
    }

    #[test]
    fn test_full_queue_does_not_block() {
        let (notifier, rx) = Notifier::channel(1);
        notifier.notify(BridgeEvent::Deleted(0));
        notifier.notify(BridgeEvent::Deleted(1));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_disabled_and_disconnected_are_tolerated() {
        Notifier::disabled().notify(BridgeEvent::Ready);

        let (notifier, rx) = Notifier::channel(1);
        drop(rx);
        notifier.notify(BridgeEvent::Restart);
    }
}
