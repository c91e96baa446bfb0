//! Angular arithmetic in turns.
//!
//! Every simulation angle is a fraction of a full revolution in `[0, 1)`.
//! Working in turns instead of radians keeps wraparound to a single `floor`.
//! Positive differences are clockwise, with angle 0 at twelve o'clock.

use std::f64::consts::TAU;

use crate::util::vec2::Vec2;

/// Half a turn, the boundary of the shortest-path difference
pub const HALF_TURN: f64 = 0.5;

/// Map any real angle into `[0, 1)`.
///
/// Non-finite input maps to 0 so a NaN can never leak into node state.
#[inline]
pub fn normalize(angle: f64) -> f64 {
    if !angle.is_finite() {
        return 0.0;
    }
    let wrapped = angle - angle.floor();
    // `x - floor(x)` rounds up to exactly 1.0 for tiny negative inputs
    if wrapped >= 1.0 {
        0.0
    } else {
        wrapped
    }
}

/// Shortest signed distance from `start` to `end`, in `(-0.5, 0.5]`.
///
/// A tie at exactly half a turn resolves to `+0.5`.
/// `angular_difference(0.3, 0.4)` is 0.1 and `angular_difference(0.9, 0.1)` is 0.2.
pub fn angular_difference(start: f64, end: f64) -> f64 {
    let diff = normalize(end) - normalize(start);

    if diff > HALF_TURN {
        diff - 1.0
    } else if diff <= -HALF_TURN {
        diff + 1.0
    } else {
        diff
    }
}

/// The angle half a turn away.
#[inline]
pub fn opposite_angle(angle: f64) -> f64 {
    normalize(angle + HALF_TURN)
}

/// Midpoint of the arc between `a` and `b`.
///
/// The minor arc is used unless `prefer_major_arc` is set, in which case the
/// midpoint of the complementary arc is returned.
pub fn center_angle(a: f64, b: f64, prefer_major_arc: bool) -> f64 {
    let a = normalize(a);
    let mid = a + angular_difference(a, b) / 2.0;

    if prefer_major_arc {
        opposite_angle(mid)
    } else {
        normalize(mid)
    }
}

/// Clockwise arc length from `from` to `to`, in `[0, 1)`.
#[inline]
pub fn forward_gap(from: f64, to: f64) -> f64 {
    normalize(to - from)
}

/// Cartesian point on a circle of `radius` around `center` at `angle` turns.
pub fn to_cartesian(angle: f64, radius: f64, center: Vec2) -> Vec2 {
    let theta = TAU * angle;
    Vec2::new(
        center.x + radius * theta.sin(),
        center.y - radius * theta.cos(),
    )
}
