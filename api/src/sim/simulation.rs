//! The reaction ring: one orbital node per tracked identity plus the effects
//! their reactions spawn.
//!
//! Mutations (`add_identity`, `remove_identity`, `trigger_reaction`) and
//! [`ReactionSimulation::tick`] all take `&mut self`, so whoever drives the
//! simulation serializes them onto one execution context.

use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::sim::config::SimulationConfig;
use crate::sim::effect::{Effect, EffectId, EffectSet};
use crate::sim::node::{Identity, OrbitalNode};
use crate::sim::render::RenderFrame;
use crate::sim::systems::{dynamics, placement};
use crate::util::vec2::Vec2;

/// Why an identity was not added
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MembershipError {
    #[error("identity {0} is already tracked")]
    AlreadyTracked(Identity),
    #[error("ring is full ({0} nodes)")]
    CapacityExceeded(usize),
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub nodes: usize,
    pub active_effects: usize,
    pub effects_retired: usize,
}

pub struct ReactionSimulation {
    config: SimulationConfig,
    nodes: HashMap<Identity, OrbitalNode>,
    effects: EffectSet,
    tick: u64,
}

impl ReactionSimulation {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            nodes: HashMap::new(),
            effects: EffectSet::new(),
            tick: 0,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Canvas center the ring is drawn around
    pub fn center(&self) -> Vec2 {
        Vec2::new(self.config.width / 2.0, self.config.height / 2.0)
    }

    /// Start tracking `identity`, placing it in the widest free arc.
    ///
    /// Returns the chosen angle. Duplicates and a full ring are rejected
    /// without touching any state.
    pub fn add_identity(&mut self, identity: Identity) -> Result<f64, MembershipError> {
        if self.nodes.contains_key(&identity) {
            debug!("Ignoring duplicate join for {}", identity);
            return Err(MembershipError::AlreadyTracked(identity));
        }
        if self.nodes.len() >= self.config.max_nodes {
            warn!("Too many nodes ({}), not adding {}", self.nodes.len(), identity);
            return Err(MembershipError::CapacityExceeded(self.config.max_nodes));
        }

        let angles: Vec<f64> = self.nodes.values().map(|n| n.angle()).collect();
        let angle = placement::placement_angle(&angles);

        let mut node = OrbitalNode::new(identity, angle);
        node.update_position(self.config.orbital_radius, self.center());
        self.nodes.insert(identity, node);

        debug!("Added {} at angle {:.4}", identity, angle);
        Ok(angle)
    }

    /// Stop tracking `identity` and release every effect bound to it.
    /// Returns false when it was not tracked.
    pub fn remove_identity(&mut self, identity: Identity) -> bool {
        if self.nodes.remove(&identity).is_none() {
            return false;
        }
        let released = self.effects.remove_owned_by(identity);
        debug!("Removed {} ({} effects released)", identity, released);
        true
    }

    /// Spawn a reaction ring on the node of `identity`, if tracked
    pub fn trigger_reaction(&mut self, identity: Identity) -> Option<EffectId> {
        if !self.nodes.contains_key(&identity) {
            debug!("Reaction from untracked {} ignored", identity);
            return None;
        }
        Some(
            self.effects
                .add(Effect::reaction(identity, self.config.effect_lifetime)),
        )
    }

    /// Register an effect not bound to any node
    pub fn add_ambient_effect(&mut self, effect: Effect) -> EffectId {
        self.effects.add(effect)
    }

    /// Advance the ring by one step: torques, integration, effect sweep, then
    /// positions for the renderer.
    pub fn tick(&mut self) -> TickReport {
        dynamics::compute_torques(&mut self.nodes, &self.config);
        dynamics::integrate(&mut self.nodes, &self.config);

        let effects_retired = self.effects.sweep();

        let center = self.center();
        let radius = self.config.orbital_radius;
        for node in self.nodes.values_mut() {
            node.update_position(radius, center);
        }

        self.tick += 1;
        TickReport {
            tick: self.tick,
            nodes: self.nodes.len(),
            active_effects: self.effects.len(),
            effects_retired,
        }
    }

    pub fn contains(&self, identity: Identity) -> bool {
        self.nodes.contains_key(&identity)
    }

    pub fn node(&self, identity: Identity) -> Option<&OrbitalNode> {
        self.nodes.get(&identity)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &OrbitalNode> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn effects(&self) -> &EffectSet {
        &self.effects
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Mean |angle_rate| over all nodes (0 with fewer than two)
    pub fn angle_rate_average(&self) -> f64 {
        dynamics::angle_rate_average(self.nodes.values())
    }

    /// Order of magnitude of [`Self::angle_rate_average`], `None` at rest
    pub fn angle_rate_order(&self) -> Option<i32> {
        dynamics::rate_order(self.angle_rate_average())
    }

    /// Snapshot of everything the renderer needs for this frame
    pub fn render_frame(&self) -> RenderFrame {
        RenderFrame::capture(self)
    }

    /// Drop all nodes and effects
    pub fn clear(&mut self) {
        self.effects.clear();
        self.nodes.clear();
    }
}

impl Default for ReactionSimulation {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}
