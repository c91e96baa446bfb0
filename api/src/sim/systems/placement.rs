use crate::util::angle::{normalize, opposite_angle};

/// Initial angle for a node joining a ring whose nodes sit at `existing`.
///
/// - empty ring: 0
/// - one node: directly opposite it
/// - otherwise: the middle of the widest clockwise gap between neighbors,
///   including the gap that wraps from the last angle back to the first
pub fn placement_angle(existing: &[f64]) -> f64 {
    match existing {
        [] => 0.0,
        [only] => opposite_angle(*only),
        _ => {
            let mut sorted: Vec<f64> = existing.iter().map(|a| normalize(*a)).collect();
            sorted.sort_by(|a, b| a.total_cmp(b));

            // Step clockwise from the gap's start: a half-turn gap has no
            // shortest direction to derive a midpoint from
            let (start, gap) = widest_gap(&sorted);
            normalize(start + gap / 2.0)
        }
    }
}

/// Widest clockwise gap of sorted, normalized angles as `(start, length)`.
/// Ties keep the first gap found.
fn widest_gap(sorted: &[f64]) -> (f64, f64) {
    let last = sorted.len() - 1;
    // Wrap gap is in (0, 1], a full turn when every angle coincides
    let mut best = (sorted[last], sorted[0] + 1.0 - sorted[last]);

    for pair in sorted.windows(2) {
        let gap = pair[1] - pair[0];
        if gap > best.1 {
            best = (pair[0], gap);
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::angle::{angular_difference, forward_gap};

    #[test]
    fn test_empty_ring() {
        assert_eq!(placement_angle(&[]), 0.0);
    }

    #[test]
    fn test_second_node_is_opposite() {
        assert!((placement_angle(&[0.0]) - 0.5).abs() < 1e-12);
        assert!((placement_angle(&[0.8]) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_wrapping_gap_wins() {
        let angle = placement_angle(&[0.0, 0.3, 0.6]);
        assert!(angle > 0.8 - 1e-9 && angle < 0.85, "got {}", angle);
    }

    #[test]
    fn test_inner_gap_wins() {
        let angle = placement_angle(&[0.9, 0.1, 0.2]);
        // Widest gap runs 0.2 -> 0.9
        assert!((angle - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_gap_larger_than_half_turn() {
        let angle = placement_angle(&[0.0, 0.1, 0.2]);
        assert!((angle - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_coincident_nodes_get_opposite() {
        let angle = placement_angle(&[0.25, 0.25]);
        assert!(angular_difference(angle, 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_half_turn_gap_lands_inside() {
        let a = 0.059;
        let angle = placement_angle(&[a, a + 0.25, a + 0.5]);
        assert!(angular_difference(angle, a + 0.25).abs() > 0.1, "got {}", angle);
        assert!((angle - (a + 0.75)).abs() < 1e-9, "got {}", angle);
    }

    #[test]
    fn test_half_turn_gaps_sweep() {
        for step in 0..1000 {
            let a = step as f64 / 1000.0;
            for delta in [0.1, 0.25, 0.4] {
                let existing = [a, a + delta, a + 0.5];
                let angle = placement_angle(&existing);

                // Strictly inside the wrap gap from a + 0.5 to a, well clear of every node
                let into_gap = forward_gap(a + 0.5, angle);
                assert!(
                    into_gap > 0.0 && into_gap < 0.5,
                    "{:?} placed at {}",
                    existing,
                    angle
                );
                for node in existing {
                    assert!(
                        angular_difference(angle, node).abs() > 0.05,
                        "{:?} placed at {}",
                        existing,
                        angle
                    );
                }
            }
        }
    }

    #[test]
    fn test_unsorted_input() {
        let sorted = placement_angle(&[0.1, 0.4, 0.7]);
        let shuffled = placement_angle(&[0.7, 0.1, 0.4]);
        assert!((sorted - shuffled).abs() < 1e-12);
    }
}
