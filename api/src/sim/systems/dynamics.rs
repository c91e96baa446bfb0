use hashbrown::HashMap;
use rayon::prelude::*;

use crate::sim::config::SimulationConfig;
use crate::sim::node::{Identity, OrbitalNode};
use crate::util::angle::angular_difference;

/// Torque acting on one node given the pre-tick angles of every node.
///
/// Friction opposes the current rate. Each other node pushes with
/// `repulsion / d`, where `d` is the signed shortest difference towards it;
/// coincident nodes (`d == 0`) contribute nothing.
pub fn torque_for(
    identity: Identity,
    angle: f64,
    angle_rate: f64,
    angles: &[(Identity, f64)],
    config: &SimulationConfig,
) -> f64 {
    let mut torque = -config.friction * angle_rate;

    for &(other_id, other_angle) in angles {
        if other_id == identity {
            continue;
        }
        let dtheta = angular_difference(angle, other_angle);
        if dtheta != 0.0 {
            torque -= config.repulsion / dtheta;
        }
    }

    torque
}

/// Torque pass. Every node reads the same snapshot of pre-tick angles, so
/// the result does not depend on iteration order.
pub fn compute_torques(nodes: &mut HashMap<Identity, OrbitalNode>, config: &SimulationConfig) {
    let angles: Vec<(Identity, f64)> = nodes
        .values()
        .map(|node| (node.identity, node.angle()))
        .collect();

    nodes.par_values_mut().for_each(|node| {
        node.torque = torque_for(node.identity, node.angle(), node.angle_rate, &angles, config);
    });
}

/// Integration pass: apply torque, clamp, drift and renormalize
pub fn integrate(nodes: &mut HashMap<Identity, OrbitalNode>, config: &SimulationConfig) {
    let max_rate = config.max_angle_rate;
    let wind = config.clockwise_wind;

    nodes.par_values_mut().for_each(|node| {
        node.integrate(max_rate, wind);
    });
}

/// Mean |angle_rate|, zero unless at least two nodes are tracked
pub fn angle_rate_average<'a>(nodes: impl ExactSizeIterator<Item = &'a OrbitalNode>) -> f64 {
    let count = nodes.len();
    if count <= 1 {
        return 0.0;
    }
    let sum: f64 = nodes.map(|node| node.angle_rate.abs()).sum();
    sum / count as f64
}

/// Decimal order of magnitude of `average`, `floor(log10(avg)) + 1`.
///
/// `None` when the ring is at rest.
pub fn rate_order(average: f64) -> Option<i32> {
    if average > 0.0 && average.is_finite() {
        Some(average.log10().floor() as i32 + 1)
    } else {
        None
    }
}
