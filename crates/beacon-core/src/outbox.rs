//! Per-connection outbound queue.
//!
//! Producers never wait: when the queue is full the envelope is dropped.

use crate::metrics;
use crate::peer::ConnectionId;
use beacon_protocol::Envelope;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Default outbound queue capacity.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Producer side of a connection's outbound queue.
///
/// Not `Clone`: the queue closes when its single owner drops it.
#[derive(Debug)]
pub struct Outbox {
    connection: ConnectionId,
    sender: mpsc::Sender<Envelope>,
}

/// Outcome of an [`Outbox::enqueue`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full; the envelope was discarded.
    Dropped,
    /// The consumer is gone.
    Closed,
}

impl Outbox {
    /// Create a queue for `connection` holding at most `capacity` envelopes.
    #[must_use]
    pub fn channel(connection: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { connection, sender }, receiver)
    }

    /// Try to queue an envelope without waiting.
    pub fn enqueue(&self, envelope: Envelope) -> Delivery {
        let kind = envelope.kind();
        match self.sender.try_send(envelope) {
            Ok(()) => {
                trace!(connection = %self.connection, kind, "Envelope queued");
                metrics::record_delivery(kind);
                Delivery::Queued
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection = %self.connection, kind, "Send buffer full, dropping message");
                metrics::record_drop(kind);
                Delivery::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!(connection = %self.connection, kind, "Outbound queue closed");
                Delivery::Closed
            }
        }
    }

    /// Whether the consumer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_protocol::{DriverStatus, Envelope};

    fn status() -> Envelope {
        Envelope::DriverStatus(DriverStatus::now("D1", true))
    }

    #[test]
    fn test_enqueue_drops_when_full() {
        let (outbox, mut rx) = Outbox::channel(ConnectionId::next(), 2);

        assert_eq!(outbox.enqueue(status()), Delivery::Queued);
        assert_eq!(outbox.enqueue(status()), Delivery::Queued);
        assert_eq!(outbox.enqueue(status()), Delivery::Dropped);

        assert!(rx.try_recv().is_ok());
        assert_eq!(outbox.enqueue(status()), Delivery::Queued);
    }

    #[test]
    fn test_enqueue_after_consumer_gone() {
        let (outbox, rx) = Outbox::channel(ConnectionId::next(), 4);
        drop(rx);
        assert!(outbox.is_closed());
        assert_eq!(outbox.enqueue(status()), Delivery::Closed);
    }

    #[test]
    fn test_dropping_outbox_closes_queue() {
        let (outbox, mut rx) = Outbox::channel(ConnectionId::next(), 4);
        outbox.enqueue(status());
        drop(outbox);

        assert!(rx.try_recv().is_ok());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
