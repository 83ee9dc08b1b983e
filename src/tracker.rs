use serde_derive::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::detection::Detection;
use crate::matching::greedy_assign;
use crate::track::{ActorId, TrackedActor};
use crate::Tracking;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Association gate: maximum centroid distance for matching a detection to an actor.
    pub max_distance_px: f32,
    /// Consecutive unmatched frames an actor survives before eviction.
    pub max_age: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_distance_px: 100.0,
            max_age: 30,
        }
    }
}

/// What one `update` call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerOutput {
    /// Actors associated or created this frame, in creation order.
    pub actors: Vec<TrackedActor>,
    /// Ids removed this frame. Downstream per-id state must be dropped for these.
    pub evicted: Vec<ActorId>,
}

/// Centroid tracker for a single actor class.
///
/// Owns every actor it created. Ids start at 1, grow monotonically and are
/// never handed out again, even after eviction or [`Tracking::reset`].
#[derive(Debug)]
pub struct ActorTracker {
    label: String,
    config: TrackerConfig,
    actors: Vec<TrackedActor>,
    next_id: ActorId,
    frame: u64,
}

impl ActorTracker {
    pub fn new(label: impl Into<String>, config: TrackerConfig) -> Self {
        Self {
            label: label.into(),
            config,
            actors: Vec::with_capacity(64),
            next_id: 1,
            frame: 0,
        }
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn get(&self, id: ActorId) -> Option<&TrackedActor> {
        self.actors.iter().find(|a| a.id == id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.actors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    fn spawn(&mut self, det: &Detection) -> ActorId {
        let id = self.next_id;
        self.next_id += 1;

        debug!(
            tracker = %self.label,
            id,
            class = %det.class,
            bbox = ?det.bbox.as_slice(),
            "new actor"
        );

        self.actors.push(TrackedActor {
            id,
            bbox: det.bbox,
            class: det.class,
            confidence: det.confidence,
            age: 0,
            last_seen_frame: self.frame,
            frames_unmatched: 0,
        });

        id
    }
}

impl Tracking for ActorTracker {
    fn update(&mut self, detections: &[Detection]) -> TrackerOutput {
        self.frame += 1;

        let dets: Vec<&Detection> = detections
            .iter()
            .filter(|d| {
                let valid = d.bbox.is_valid();
                if !valid {
                    trace!(
                        tracker = %self.label,
                        bbox = ?d.bbox.as_slice(),
                        "skipping degenerate box"
                    );
                }
                valid
            })
            .collect();

        let actor_pts: Vec<_> = self.actors.iter().map(|a| a.centroid()).collect();
        let det_pts: Vec<_> = dets.iter().map(|d| d.bbox.centroid()).collect();
        let matching = greedy_assign(&actor_pts, &det_pts, self.config.max_distance_px);

        for &(ai, di, dist) in &matching.matched {
            let det = dets[di];
            let actor = &mut self.actors[ai];

            trace!(tracker = %self.label, id = actor.id, dist, "associated");

            actor.bbox = det.bbox;
            actor.class = det.class;
            actor.confidence = det.confidence;
            actor.age += 1;
            actor.last_seen_frame = self.frame;
            actor.frames_unmatched = 0;
        }

        for &ai in &matching.unmatched_actors {
            let actor = &mut self.actors[ai];
            actor.age += 1;
            actor.frames_unmatched += 1;
        }

        let max_age = self.config.max_age;
        let mut evicted = Vec::new();
        self.actors.retain(|a| {
            if a.frames_unmatched > max_age {
                evicted.push(a.id);
                false
            } else {
                true
            }
        });

        if !evicted.is_empty() {
            debug!(tracker = %self.label, ids = ?evicted, "evicted stale actors");
        }

        for &di in &matching.unmatched_detections {
            self.spawn(dets[di]);
        }

        TrackerOutput {
            actors: self
                .actors
                .iter()
                .filter(|a| a.frames_unmatched == 0)
                .cloned()
                .collect(),
            evicted,
        }
    }

    #[inline]
    fn actors(&self) -> &[TrackedActor] {
        &self.actors
    }

    fn reset(&mut self) -> Vec<ActorId> {
        let released: Vec<_> = self.actors.drain(..).map(|a| a.id).collect();
        debug!(tracker = %self.label, count = released.len(), "released actor state");
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;
    use crate::detection::ObjectClass;

    fn car_at(cx: f32, cy: f32) -> Detection {
        Detection::new(
            BBox::ltrb(cx - 20.0, cy - 10.0, cx + 20.0, cy + 10.0),
            ObjectClass::Car,
            0.9,
        )
    }

    fn tracker(max_age: u32) -> ActorTracker {
        ActorTracker::new(
            "vehicle",
            TrackerConfig {
                max_distance_px: 100.0,
                max_age,
            },
        )
    }

    #[test]
    fn identity_is_stable_for_small_motion() {
        let mut t = tracker(30);
        let mut ids = Vec::new();

        for step in 0..20 {
            let out = t.update(&[car_at(100.0 + step as f32 * 40.0, 200.0)]);
            assert_eq!(out.actors.len(), 1);
            ids.push(out.actors[0].id);
        }

        assert!(ids.iter().all(|&id| id == ids[0]));
        assert_eq!(t.get(ids[0]).unwrap().age, 19);
    }

    #[test]
    fn distant_detections_create_distinct_actors() {
        let mut t = tracker(30);
        let out = t.update(&[car_at(0.0, 0.0), car_at(300.0, 0.0), car_at(0.0, 300.0)]);

        let mut ids: Vec<_> = out.actors.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn jump_beyond_gate_spawns_new_actor() {
        let mut t = tracker(30);
        let first = t.update(&[car_at(0.0, 0.0)]).actors[0].id;
        let second = t.update(&[car_at(500.0, 0.0)]).actors[0].id;

        assert_ne!(first, second);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn empty_frame_ages_actors_without_creating() {
        let mut t = tracker(30);
        t.update(&[car_at(0.0, 0.0), car_at(300.0, 0.0)]);

        let out = t.update(&[]);
        assert!(out.actors.is_empty());
        assert!(out.evicted.is_empty());
        assert_eq!(t.len(), 2);
        assert!(t.actors().iter().all(|a| a.frames_unmatched == 1 && a.age == 1));
    }

    #[test]
    fn stale_actor_is_evicted_and_id_never_reused() {
        let mut t = tracker(3);
        let id = t.update(&[car_at(0.0, 0.0)]).actors[0].id;

        // survives exactly max_age unmatched frames
        for _ in 0..3 {
            assert!(t.update(&[]).evicted.is_empty());
            assert!(t.get(id).is_some());
        }

        let out = t.update(&[]);
        assert_eq!(out.evicted, vec![id]);
        assert!(t.get(id).is_none());

        for _ in 0..5 {
            let out = t.update(&[car_at(0.0, 0.0)]);
            assert!(out.actors.iter().all(|a| a.id != id));
        }
        assert_eq!(t.actors()[0].id, id + 1);
    }

    #[test]
    fn rematch_resets_unmatched_counter() {
        let mut t = tracker(3);
        let id = t.update(&[car_at(0.0, 0.0)]).actors[0].id;
        t.update(&[]);
        t.update(&[]);

        let out = t.update(&[car_at(10.0, 0.0)]);
        assert_eq!(out.actors[0].id, id);
        assert_eq!(out.actors[0].frames_unmatched, 0);
        assert_eq!(out.actors[0].last_seen_frame, 4);
    }

    #[test]
    fn identical_sequences_produce_identical_output() {
        let frames: Vec<Vec<Detection>> = (0..10)
            .map(|i| {
                let x = i as f32 * 15.0;
                vec![car_at(x, 0.0), car_at(x + 60.0, 0.0), car_at(400.0 - x, 300.0)]
            })
            .collect();

        let run = || {
            let mut t = tracker(30);
            frames.iter().map(|f| t.update(f)).collect::<Vec<_>>()
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn reset_releases_state_but_keeps_id_sequence() {
        let mut t = tracker(30);
        t.update(&[car_at(0.0, 0.0)]);

        assert_eq!(t.reset(), vec![1]);
        assert!(t.is_empty());
        assert_eq!(t.update(&[car_at(0.0, 0.0)]).actors[0].id, 2);
    }

    #[test]
    fn ids_keep_growing_past_32_bits() {
        let mut t = tracker(30);
        t.next_id = u32::MAX as ActorId;

        let out = t.update(&[car_at(0.0, 0.0), car_at(500.0, 0.0)]);
        let ids: Vec<_> = out.actors.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![u32::MAX as ActorId, u32::MAX as ActorId + 1]);
    }

    #[test]
    fn degenerate_detections_are_ignored() {
        let mut t = tracker(30);
        let bad = Detection::new(BBox::ltrb(10.0, 10.0, 5.0, 5.0), ObjectClass::Car, 0.9);
        assert!(t.update(&[bad]).actors.is_empty());
        assert!(t.is_empty());
    }
}
