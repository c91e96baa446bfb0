//! Transient, tick-driven visual effects.
//!
//! An [`Effect`] advances once per tick until its lifetime is spent, then
//! flags itself finished. The owning [`EffectSet`] drops finished effects on
//! the following sweep. Effects reference their node by identity only, so a
//! node never owns the effects it triggered.

use hashbrown::HashMap;
use serde::Serialize;

use crate::sim::node::Identity;
use crate::util::vec2::Vec2;

/// Handle of an effect inside one [`EffectSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u64);

/// What an effect is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    /// Expanding ring around the node of the identity that reacted
    Reaction { owner: Identity },
    /// Not bound to any node
    Ambient,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    kind: EffectKind,
    elapsed: u32,
    lifetime: u32,
    progress: f64,
    finished: bool,
}

impl Effect {
    /// Create an effect lasting `lifetime` ticks (at least one)
    pub fn new(kind: EffectKind, lifetime: u32) -> Self {
        Self {
            kind,
            elapsed: 0,
            lifetime: lifetime.max(1),
            progress: 0.0,
            finished: false,
        }
    }

    pub fn reaction(owner: Identity, lifetime: u32) -> Self {
        Self::new(EffectKind::Reaction { owner }, lifetime)
    }

    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    pub fn owner(&self) -> Option<Identity> {
        match self.kind {
            EffectKind::Reaction { owner } => Some(owner),
            EffectKind::Ambient => None,
        }
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn elapsed(&self) -> u32 {
        self.elapsed
    }

    pub fn lifetime(&self) -> u32 {
        self.lifetime
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Advance by one tick.
    ///
    /// `progress` takes `elapsed / lifetime` before the counter moves, so it
    /// runs 0, 1/L, ..., (L-1)/L and the effect is finished after exactly L
    /// calls. Calls after that are ignored.
    pub fn update(&mut self) {
        if self.finished {
            return;
        }
        self.progress = self.elapsed as f64 / self.lifetime as f64;
        self.elapsed += 1;
        if self.elapsed >= self.lifetime {
            self.finished = true;
        }
    }

    /// Eased ring geometry for a reaction anchored at `anchor`.
    ///
    /// `ratio = 1 - (1 - progress)^2`; the ring grows to
    /// `max_radius - node_radius` while fading out.
    pub fn ring(&self, anchor: Vec2, node_radius: f64, max_radius: f64) -> RingShape {
        let remaining = 1.0 - self.progress;
        let ratio = 1.0 - remaining * remaining;
        RingShape {
            center: anchor,
            radius: ratio * (max_radius - node_radius),
            opacity: 1.0 - ratio,
        }
    }
}

/// Filled circle drawn for one active reaction effect
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RingShape {
    pub center: Vec2,
    pub radius: f64,
    pub opacity: f64,
}

/// Active effects of one simulation
#[derive(Debug, Default)]
pub struct EffectSet {
    effects: HashMap<EffectId, Effect>,
    next_id: u64,
}

impl EffectSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an effect. Each call mints a fresh id, so one effect value can
    /// never be registered twice.
    pub fn add(&mut self, effect: Effect) -> EffectId {
        let id = EffectId(self.next_id);
        self.next_id += 1;
        self.effects.insert(id, effect);
        id
    }

    pub fn remove(&mut self, id: EffectId) -> Option<Effect> {
        self.effects.remove(&id)
    }

    pub fn get(&self, id: EffectId) -> Option<&Effect> {
        self.effects.get(&id)
    }

    pub fn contains(&self, id: EffectId) -> bool {
        self.effects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EffectId, &Effect)> {
        self.effects.iter().map(|(id, effect)| (*id, effect))
    }

    /// Drop every effect bound to `owner`, returning how many were removed
    pub fn remove_owned_by(&mut self, owner: Identity) -> usize {
        let before = self.effects.len();
        self.effects.retain(|_, effect| effect.owner() != Some(owner));
        before - self.effects.len()
    }

    /// One effect pass: finished effects are collected, the rest advance, and
    /// the collected ones are removed once iteration is over.
    ///
    /// Returns the number of effects retired.
    pub fn sweep(&mut self) -> usize {
        let mut retired = Vec::new();
        for (id, effect) in self.effects.iter_mut() {
            if effect.is_finished() {
                retired.push(*id);
            } else {
                effect.update();
            }
        }

        for id in &retired {
            self.effects.remove(id);
        }
        retired.len()
    }

    pub fn clear(&mut self) {
        self.effects.clear();
    }
}
