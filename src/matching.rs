use nalgebra as na;

use crate::math;

/// Result of associating detections with existing actors.
///
/// Indexes refer to the slices passed to [`greedy_assign`]; `matched` holds
/// `(actor_idx, detection_idx, distance)` in commit order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matching {
    pub matched: Vec<(usize, usize, f32)>,
    pub unmatched_actors: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Gated greedy nearest-first association on centroid distance.
///
/// Candidate pairs within `max_distance` are sorted by distance ascending (ties
/// broken by actor index, then detection index) and committed greedily, skipping
/// pairs whose actor or detection is already taken. Not globally optimal, but
/// fully deterministic for identical inputs.
pub fn greedy_assign(
    actors: &[na::Point2<f32>],
    detections: &[na::Point2<f32>],
    max_distance: f32,
) -> Matching {
    let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
    for (ai, a) in actors.iter().enumerate() {
        for (di, d) in detections.iter().enumerate() {
            let dist = math::distance(a, d);
            if dist.is_finite() && dist <= max_distance {
                pairs.push((ai, di, dist));
            }
        }
    }

    pairs.sort_by(|a, b| {
        a.2.total_cmp(&b.2)
            .then_with(|| a.0.cmp(&b.0))
            .then_with(|| a.1.cmp(&b.1))
    });

    let mut actor_taken = vec![false; actors.len()];
    let mut det_taken = vec![false; detections.len()];
    let mut matched = Vec::new();

    for (ai, di, dist) in pairs {
        if actor_taken[ai] || det_taken[di] {
            continue;
        }
        actor_taken[ai] = true;
        det_taken[di] = true;
        matched.push((ai, di, dist));
    }

    Matching {
        matched,
        unmatched_actors: unmatched(&actor_taken),
        unmatched_detections: unmatched(&det_taken),
    }
}

fn unmatched(taken: &[bool]) -> Vec<usize> {
    taken
        .iter()
        .enumerate()
        .filter(|(_, &t)| !t)
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f32, y: f32) -> na::Point2<f32> {
        na::Point2::new(x, y)
    }

    #[test]
    fn nearest_pair_is_committed_first() {
        // det 0 is 10px from actor 1 and 30px from actor 0; det 1 is 20px from actor 0
        let actors = [p(0.0, 0.0), p(50.0, 0.0)];
        let dets = [p(40.0, 0.0), p(20.0, 0.0)];

        let m = greedy_assign(&actors, &dets, 100.0);
        assert_eq!(m.matched, vec![(1, 0, 10.0), (0, 1, 20.0)]);
        assert!(m.unmatched_actors.is_empty());
        assert!(m.unmatched_detections.is_empty());
    }

    #[test]
    fn pairs_beyond_gate_are_not_matched() {
        let m = greedy_assign(&[p(0.0, 0.0)], &[p(150.0, 0.0)], 100.0);
        assert!(m.matched.is_empty());
        assert_eq!(m.unmatched_actors, vec![0]);
        assert_eq!(m.unmatched_detections, vec![0]);
    }

    #[test]
    fn equal_distances_break_ties_by_index() {
        let actors = [p(0.0, 0.0), p(20.0, 0.0)];
        let dets = [p(10.0, 0.0)];

        let m = greedy_assign(&actors, &dets, 100.0);
        assert_eq!(m.matched, vec![(0, 0, 10.0)]);
        assert_eq!(m.unmatched_actors, vec![1]);
    }

    #[test]
    fn empty_inputs_produce_empty_matching() {
        let m = greedy_assign(&[], &[], 100.0);
        assert_eq!(m, Matching::default());

        let m = greedy_assign(&[p(0.0, 0.0)], &[], 100.0);
        assert_eq!(m.unmatched_actors, vec![0]);
    }
}
