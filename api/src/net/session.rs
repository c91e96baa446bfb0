use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::net::protocol::ServerMessage;
use crate::sim::node::Identity;

/// Sending half of a session's bounded outbound queue. The transport drains
/// the receiving half onto the wire.
pub type Outbox = mpsc::Sender<ServerMessage>;

/// Create an outbox pair with room for `capacity` queued messages
pub fn outbox(capacity: usize) -> (Outbox, mpsc::Receiver<ServerMessage>) {
    mpsc::channel(capacity.max(1))
}

/// Outcome of handing one message to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Outbox full, message discarded
    Dropped,
    /// Receiver gone; the session is tearing down
    Closed,
}

/// Broker-side state for one live connection
#[derive(Debug)]
pub struct Session {
    pub identity: Identity,
    outbox: Outbox,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub reactions_sent: u64,
    pub dropped: u64,
}

impl Session {
    pub fn new(identity: Identity, outbox: Outbox) -> Self {
        let now = Instant::now();
        Self {
            identity,
            outbox,
            created_at: now,
            last_activity: now,
            reactions_sent: 0,
            dropped: 0,
        }
    }

    /// Queue `message` without waiting. A full outbox drops it.
    pub fn deliver(&mut self, message: ServerMessage) -> Delivery {
        match self.outbox.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Update last activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_queues() {
        let (tx, mut rx) = outbox(4);
        let mut session = Session::new(Identity(1), tx);

        assert_eq!(
            session.deliver(ServerMessage::ReceiveReaction { from: Identity(0) }),
            Delivery::Queued
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerMessage::ReceiveReaction { from: Identity(0) }
        );
        assert_eq!(session.dropped, 0);
    }

    #[test]
    fn test_full_outbox_drops() {
        let (tx, mut rx) = outbox(1);
        let mut session = Session::new(Identity(1), tx);

        let msg = ServerMessage::ReceiveReaction { from: Identity(2) };
        assert_eq!(session.deliver(msg.clone()), Delivery::Queued);
        assert_eq!(session.deliver(msg.clone()), Delivery::Dropped);
        assert_eq!(session.deliver(msg), Delivery::Dropped);
        assert_eq!(session.dropped, 2);

        // Only the first one made it
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_outbox() {
        let (tx, rx) = outbox(4);
        drop(rx);
        let mut session = Session::new(Identity(1), tx);
        assert_eq!(
            session.deliver(ServerMessage::ReceiveReaction { from: Identity(0) }),
            Delivery::Closed
        );
        assert_eq!(session.dropped, 0);
    }

    #[test]
    fn test_receiver_wakes_on_deliver() {
        let (tx, mut rx) = outbox(2);
        let mut session = Session::new(Identity(1), tx);

        let mut recv = tokio_test::task::spawn(rx.recv());
        tokio_test::assert_pending!(recv.poll());

        session.deliver(ServerMessage::ReceiveReaction { from: Identity(0) });
        assert!(recv.is_woken());
        assert_eq!(
            tokio_test::assert_ready!(recv.poll()),
            Some(ServerMessage::ReceiveReaction { from: Identity(0) })
        );
    }

    #[test]
    fn test_touch() {
        let (tx, _rx) = outbox(1);
        let mut session = Session::new(Identity(1), tx);
        let before = session.last_activity;
        std::thread::sleep(Duration::from_millis(2));
        session.touch();
        assert!(session.last_activity > before);
        assert!(session.age() >= session.idle_time());
    }
}
