//! Keeps a [`ReactionSimulation`] in step with broker membership.
//!
//! A remote viewer feeds it [`ServerMessage`]s from its link; an in-process
//! renderer feeds it [`BrokerEvent`]s from the broker's subscription.

use tracing::{debug, warn};

use crate::net::broker::BrokerEvent;
use crate::net::client::Welcome;
use crate::net::protocol::ServerMessage;
use crate::sim::node::Identity;
use crate::sim::simulation::{MembershipError, ReactionSimulation};

#[derive(Debug, Default)]
pub struct RingMirror {
    local: Option<Identity>,
    /// Member count as last reported by the broker
    reported_count: u32,
}

impl RingMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Our own identity, once welcomed
    pub fn local(&self) -> Option<Identity> {
        self.local
    }

    pub fn reported_count(&self) -> u32 {
        self.reported_count
    }

    /// Rebuild the ring from a fresh roster: everyone already there, then us
    pub fn on_welcome(&mut self, sim: &mut ReactionSimulation, welcome: &Welcome) {
        sim.clear();
        for &identity in &welcome.roster {
            join(sim, identity);
        }
        join(sim, welcome.identity);
        self.local = Some(welcome.identity);
        self.reported_count = welcome.count;
    }

    /// Apply one broker message. Pong is not a ring concern and is ignored.
    pub fn apply(&mut self, sim: &mut ReactionSimulation, message: &ServerMessage) {
        match message {
            ServerMessage::Welcome { identity, roster, count } => {
                let welcome = Welcome {
                    identity: *identity,
                    roster: roster.clone(),
                    count: *count,
                };
                self.on_welcome(sim, &welcome);
            }
            ServerMessage::Join { identity, count } => {
                join(sim, *identity);
                self.reported_count = *count;
            }
            ServerMessage::Leave { identity, count } => {
                sim.remove_identity(*identity);
                self.reported_count = *count;
            }
            ServerMessage::ReceiveReaction { from } => {
                sim.trigger_reaction(*from);
            }
            ServerMessage::Pong { .. } => {}
        }
        self.check_count(sim);
    }

    /// Apply one in-process broker event
    pub fn apply_event(&mut self, sim: &mut ReactionSimulation, event: &BrokerEvent) {
        match *event {
            BrokerEvent::Joined { identity, count } => {
                join(sim, identity);
                self.reported_count = count;
            }
            BrokerEvent::Left { identity, count } => {
                sim.remove_identity(identity);
                self.reported_count = count;
            }
            BrokerEvent::Reacted { from } => {
                sim.trigger_reaction(from);
            }
        }
        self.check_count(sim);
    }

    /// Show our own reaction; the broker never echoes it back
    pub fn local_reaction(&self, sim: &mut ReactionSimulation) -> bool {
        match self.local {
            Some(identity) => sim.trigger_reaction(identity).is_some(),
            None => false,
        }
    }

    fn check_count(&self, sim: &ReactionSimulation) {
        let tracked = sim.node_count() as u32;
        if tracked != self.reported_count && tracked < sim.config().max_nodes as u32 {
            debug!(
                "Ring tracks {} nodes, broker reports {} members",
                tracked, self.reported_count
            );
        }
    }
}

fn join(sim: &mut ReactionSimulation, identity: Identity) {
    match sim.add_identity(identity) {
        Ok(_) | Err(MembershipError::AlreadyTracked(_)) => {}
        Err(e @ MembershipError::CapacityExceeded(_)) => {
            warn!("{} not shown: {}", identity, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welcome_rebuilds_ring() {
        let mut sim = ReactionSimulation::default();
        sim.add_identity(Identity(99)).unwrap();

        let mut mirror = RingMirror::new();
        mirror.on_welcome(
            &mut sim,
            &Welcome {
                identity: Identity(5),
                roster: vec![Identity(1), Identity(3)],
                count: 3,
            },
        );

        assert_eq!(sim.node_count(), 3);
        assert!(!sim.contains(Identity(99)));
        assert!(sim.contains(Identity(5)));
        assert_eq!(mirror.local(), Some(Identity(5)));
        assert_eq!(mirror.reported_count(), 3);
        // First roster entry sits at the top of the ring
        assert_eq!(sim.node(Identity(1)).unwrap().angle(), 0.0);
    }

    #[test]
    fn test_messages_drive_membership() {
        let mut sim = ReactionSimulation::default();
        let mut mirror = RingMirror::new();

        mirror.apply(
            &mut sim,
            &ServerMessage::Welcome { identity: Identity(0), roster: vec![], count: 1 },
        );
        mirror.apply(&mut sim, &ServerMessage::Join { identity: Identity(1), count: 2 });
        assert_eq!(sim.node_count(), 2);

        mirror.apply(&mut sim, &ServerMessage::ReceiveReaction { from: Identity(1) });
        assert_eq!(sim.effects().len(), 1);

        mirror.apply(&mut sim, &ServerMessage::Leave { identity: Identity(1), count: 1 });
        assert_eq!(sim.node_count(), 1);
        assert!(sim.effects().is_empty());
        assert_eq!(mirror.reported_count(), 1);
    }

    #[test]
    fn test_duplicate_join_and_unknown_leave() {
        let mut sim = ReactionSimulation::default();
        let mut mirror = RingMirror::new();

        mirror.apply(&mut sim, &ServerMessage::Join { identity: Identity(4), count: 1 });
        mirror.apply(&mut sim, &ServerMessage::Join { identity: Identity(4), count: 1 });
        mirror.apply(&mut sim, &ServerMessage::Leave { identity: Identity(8), count: 1 });
        assert_eq!(sim.node_count(), 1);
    }

    #[test]
    fn test_reaction_from_untracked_is_ignored() {
        let mut sim = ReactionSimulation::default();
        let mut mirror = RingMirror::new();
        mirror.apply(&mut sim, &ServerMessage::ReceiveReaction { from: Identity(3) });
        assert!(sim.effects().is_empty());
    }

    #[test]
    fn test_local_reaction() {
        let mut sim = ReactionSimulation::default();
        let mut mirror = RingMirror::new();
        assert!(!mirror.local_reaction(&mut sim));

        mirror.on_welcome(
            &mut sim,
            &Welcome { identity: Identity(2), roster: vec![], count: 1 },
        );
        assert!(mirror.local_reaction(&mut sim));
        assert_eq!(sim.effects().len(), 1);
    }

    #[test]
    fn test_broker_events() {
        let mut sim = ReactionSimulation::default();
        let mut mirror = RingMirror::new();

        mirror.apply_event(&mut sim, &BrokerEvent::Joined { identity: Identity(0), count: 1 });
        mirror.apply_event(&mut sim, &BrokerEvent::Joined { identity: Identity(1), count: 2 });
        mirror.apply_event(&mut sim, &BrokerEvent::Reacted { from: Identity(0) });
        assert_eq!(sim.effects().len(), 1);

        mirror.apply_event(&mut sim, &BrokerEvent::Left { identity: Identity(0), count: 1 });
        assert_eq!(sim.node_count(), 1);
        assert!(sim.effects().is_empty());
        // Second node was placed opposite the first
        assert_eq!(sim.node(Identity(1)).unwrap().angle(), 0.5);
    }
}
