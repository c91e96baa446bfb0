use serde::{Deserialize, Serialize};
use std::fmt;

use crate::util::angle::{normalize, to_cartesian};
use crate::util::vec2::Vec2;

/// Server-assigned participant identity, unique among live sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(pub u64);

impl Identity {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for Identity {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Physical state of one tracked identity on the ring
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitalNode {
    pub identity: Identity,
    /// Position on the ring in turns, always in [0, 1)
    angle: f64,
    /// Signed angular velocity in turns per tick
    pub angle_rate: f64,
    /// Per-tick accumulator, rebuilt from scratch every torque pass
    pub torque: f64,
    /// Derived canvas position, refreshed by `update_position`
    position: Vec2,
}

impl OrbitalNode {
    pub fn new(identity: Identity, angle: f64) -> Self {
        Self {
            identity,
            angle: normalize(angle),
            angle_rate: 0.0,
            torque: 0.0,
            position: Vec2::ZERO,
        }
    }

    #[inline]
    pub fn angle(&self) -> f64 {
        self.angle
    }

    /// Set the angle, renormalizing into [0, 1)
    #[inline]
    pub fn set_angle(&mut self, angle: f64) {
        self.angle = normalize(angle);
    }

    #[inline]
    pub fn position(&self) -> Vec2 {
        self.position
    }

    /// Recompute the canvas position from the current angle
    pub fn update_position(&mut self, orbital_radius: f64, center: Vec2) {
        self.position = to_cartesian(self.angle, orbital_radius, center);
    }

    /// Advance one tick: apply the accumulated torque to the rate, then the
    /// rate plus drift to the angle.
    pub fn integrate(&mut self, max_rate: Option<f64>, wind: f64) {
        let rate = self.angle_rate + self.torque;
        self.angle_rate = match max_rate {
            Some(max) => rate.clamp(-max, max),
            None => rate,
        };
        if !self.angle_rate.is_finite() {
            tracing::warn!("Reset non-finite angle rate for node {}", self.identity);
            self.angle_rate = 0.0;
        }
        self.set_angle(self.angle + self.angle_rate + wind);
    }
}
