//! Session broker
//!
//! Tracks connected sessions, mints their identities and relays join, leave
//! and reaction notifications. Every send is a non-blocking `try_send` into
//! the recipient's bounded outbox: a slow recipient loses reactions instead of
//! stalling the sender or the rest of the fan-out. A recipient that cannot
//! take a join or leave is evicted, since its ring would otherwise stay stale;
//! it rebuilds from `Welcome` when it reconnects.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::metrics::Metrics;
use crate::net::protocol::ServerMessage;
use crate::net::session::{Delivery, Outbox, Session};
use crate::sim::node::Identity;

/// Buffered local events before a lagging subscriber starts missing them
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Membership and reaction changes, published to in-process subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerEvent {
    Joined { identity: Identity, count: u32 },
    Left { identity: Identity, count: u32 },
    Reacted { from: Identity },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("broker at capacity ({0} sessions)")]
    AtCapacity(usize),
}

/// Result of relaying one notification to its audience
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Recipients whose outbox accepted the message
    pub delivered: usize,
    /// Recipients whose outbox was full
    pub dropped: SmallVec<[Identity; 8]>,
}

pub struct SessionBroker {
    sessions: FxHashMap<Identity, Session>,
    next_identity: u64,
    max_sessions: usize,
    events: broadcast::Sender<BrokerEvent>,
    metrics: Option<Arc<Metrics>>,
}

impl SessionBroker {
    pub fn new(max_sessions: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sessions: FxHashMap::default(),
            next_identity: 0,
            max_sessions,
            events,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Receive every notification the broker publishes from now on
    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events.subscribe()
    }

    /// Register a new session.
    ///
    /// The session receives `Welcome` with its identity and the current
    /// roster; everyone else receives `Join`.
    pub fn on_connect(&mut self, outbox: Outbox) -> Result<Identity, BrokerError> {
        if self.sessions.len() >= self.max_sessions {
            warn!(
                "Rejecting session: {} of {} slots used",
                self.sessions.len(),
                self.max_sessions
            );
            if let Some(metrics) = &self.metrics {
                metrics.sessions_rejected.fetch_add(1, Ordering::Relaxed);
            }
            return Err(BrokerError::AtCapacity(self.max_sessions));
        }

        let identity = Identity(self.next_identity);
        self.next_identity += 1;

        let mut roster: Vec<Identity> = self.sessions.keys().copied().collect();
        roster.sort_unstable();

        let mut session = Session::new(identity, outbox);
        let count = self.count() + 1;
        if session.deliver(ServerMessage::Welcome { identity, roster, count }) != Delivery::Queued {
            warn!("Welcome for {} was not queued", identity);
        }
        self.sessions.insert(identity, session);

        self.publish(BrokerEvent::Joined { identity, count });
        self.announce(identity, ServerMessage::Join { identity, count });

        if let Some(metrics) = &self.metrics {
            metrics.sessions_total.fetch_add(1, Ordering::Relaxed);
            metrics.sessions_active.store(self.count() as u64, Ordering::Relaxed);
        }

        info!("{} connected ({} online)", identity, self.count());
        Ok(identity)
    }

    /// Forget a session and tell the remaining ones. Unknown identities are
    /// ignored, so calling this twice is harmless.
    pub fn on_disconnect(&mut self, identity: Identity) -> bool {
        let Some(session) = self.sessions.remove(&identity) else {
            return false;
        };

        let count = self.count();
        self.publish(BrokerEvent::Left { identity, count });
        self.announce(identity, ServerMessage::Leave { identity, count });

        if let Some(metrics) = &self.metrics {
            metrics.sessions_active.store(self.count() as u64, Ordering::Relaxed);
        }

        info!(
            "{} disconnected after {:.1}s, {} reactions, {} dropped ({} online)",
            identity,
            session.age().as_secs_f32(),
            session.reactions_sent,
            session.dropped,
            self.count()
        );
        true
    }

    /// Relay a reaction from `from` to every other session
    pub fn on_reaction_send(&mut self, from: Identity) -> FanoutReport {
        let Some(sender) = self.sessions.get_mut(&from) else {
            debug!("Reaction from unknown {} ignored", from);
            return FanoutReport::default();
        };
        sender.reactions_sent += 1;
        sender.touch();

        let report = self.fanout(from, ServerMessage::ReceiveReaction { from });
        self.publish(BrokerEvent::Reacted { from });

        if let Some(metrics) = &self.metrics {
            metrics.reactions_received.fetch_add(1, Ordering::Relaxed);
            metrics
                .reactions_relayed
                .fetch_add(report.delivered as u64, Ordering::Relaxed);
            metrics
                .reactions_dropped
                .fetch_add(report.dropped.len() as u64, Ordering::Relaxed);
        }

        report
    }

    /// Answer a ping on the pinging session's own outbox
    pub fn on_ping(&mut self, identity: Identity, client_timestamp: u64, server_timestamp: u64) -> bool {
        let Some(session) = self.sessions.get_mut(&identity) else {
            return false;
        };
        session.touch();
        session.deliver(ServerMessage::Pong {
            client_timestamp,
            server_timestamp,
        }) == Delivery::Queued
    }

    /// Fan out a membership change, evicting every recipient that could not
    /// queue it. Each eviction is itself a `Leave`, so this repeats until
    /// every remaining session has seen every change.
    fn announce(&mut self, except: Identity, message: ServerMessage) -> FanoutReport {
        let report = self.fanout(except, message);
        let mut stale: Vec<Identity> = report.dropped.to_vec();

        while let Some(identity) = stale.pop() {
            // Dropping the session closes its outbox and ends its stream
            if self.sessions.remove(&identity).is_none() {
                continue;
            }
            let count = self.count();
            warn!("Evicted {}: outbox full for a membership change ({} online)", identity, count);
            if let Some(metrics) = &self.metrics {
                metrics.sessions_evicted.fetch_add(1, Ordering::Relaxed);
            }

            self.publish(BrokerEvent::Left { identity, count });
            let leave = self.fanout(identity, ServerMessage::Leave { identity, count });
            stale.extend(leave.dropped);
        }

        report
    }

    /// Send `message` to every session except `except`
    fn fanout(&mut self, except: Identity, message: ServerMessage) -> FanoutReport {
        let mut report = FanoutReport::default();
        let membership = message.is_membership();

        for (identity, session) in self.sessions.iter_mut() {
            if *identity == except {
                continue;
            }
            match session.deliver(message.clone()) {
                Delivery::Queued => report.delivered += 1,
                Delivery::Dropped => report.dropped.push(*identity),
                Delivery::Closed => {}
            }
        }

        if !report.dropped.is_empty() {
            if membership {
                warn!(
                    "Dropped {} for {} sessions, evicting: {:?}",
                    message.kind(),
                    report.dropped.len(),
                    report.dropped.as_slice()
                );
                if let Some(metrics) = &self.metrics {
                    metrics
                        .membership_dropped
                        .fetch_add(report.dropped.len() as u64, Ordering::Relaxed);
                }
            } else {
                debug!(
                    "Dropped {} for {} slow sessions",
                    message.kind(),
                    report.dropped.len()
                );
            }
        }

        report
    }

    fn publish(&self, event: BrokerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn count(&self) -> u32 {
        self.sessions.len() as u32
    }

    pub fn contains(&self, identity: Identity) -> bool {
        self.sessions.contains_key(&identity)
    }

    pub fn session(&self, identity: Identity) -> Option<&Session> {
        self.sessions.get(&identity)
    }

    /// Connected identities in ascending order
    pub fn roster(&self) -> Vec<Identity> {
        let mut roster: Vec<Identity> = self.sessions.keys().copied().collect();
        roster.sort_unstable();
        roster
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}
