//! Per-actor speed estimation from centroid displacement.

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

use crate::math;
use crate::track::ActorId;

const MPS_TO_KMH: f64 = 3.6;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct KinematicsConfig {
    /// Fixed ground-distance scale, meters per pixel.
    pub meters_per_pixel: f64,
    /// EMA weight of the newest measurement in (0, 1]. `1.0` reports raw finite differences.
    pub smoothing: f64,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            meters_per_pixel: 0.1,
            smoothing: 1.0,
        }
    }
}

/// Last observation of one actor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicHistory {
    pub position: na::Point2<f32>,
    pub time: f64,
    pub smoothed_kmh: Option<f64>,
}

#[derive(Debug, Default)]
pub struct SpeedEstimator {
    config: KinematicsConfig,
    history: HashMap<ActorId, KinematicHistory>,
}

impl SpeedEstimator {
    pub fn new(config: KinematicsConfig) -> Self {
        Self {
            config,
            history: HashMap::new(),
        }
    }

    /// Speed in km/h of `id` moving to `position` at `time` (seconds).
    ///
    /// Returns `0.0` on the first observation of an id and whenever the elapsed
    /// time since the previous call is not positive. The stored observation is
    /// overwritten on every call.
    pub fn estimate_speed(&mut self, id: ActorId, position: na::Point2<f32>, time: f64) -> f64 {
        let prev = self.history.insert(
            id,
            KinematicHistory {
                position,
                time,
                smoothed_kmh: None,
            },
        );

        let prev = match prev {
            Some(prev) => prev,
            None => return 0.0,
        };

        let elapsed = time - prev.time;
        if !(elapsed.is_finite() && elapsed > 0.0) {
            trace!(id, elapsed, "non-positive elapsed time, reporting zero speed");
            if let Some(entry) = self.history.get_mut(&id) {
                entry.smoothed_kmh = prev.smoothed_kmh;
            }
            return 0.0;
        }

        let pixels = math::distance(&prev.position, &position) as f64;
        let raw = pixels * self.config.meters_per_pixel * MPS_TO_KMH / elapsed;

        let alpha = self.config.smoothing;
        let speed = match prev.smoothed_kmh {
            Some(last) if alpha < 1.0 => alpha * raw + (1.0 - alpha) * last,
            _ => raw,
        };

        if let Some(entry) = self.history.get_mut(&id) {
            entry.smoothed_kmh = Some(speed);
        }

        speed
    }

    /// Drops the history of an evicted actor.
    pub fn forget(&mut self, id: ActorId) -> bool {
        self.history.remove(&id).is_some()
    }

    pub fn forget_all<'a>(&mut self, ids: impl IntoIterator<Item = &'a ActorId>) {
        for id in ids {
            self.history.remove(id);
        }
    }

    #[inline]
    pub fn get(&self, id: ActorId) -> Option<&KinematicHistory> {
        self.history.get(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f32, y: f32) -> na::Point2<f32> {
        na::Point2::new(x, y)
    }

    #[test]
    fn first_observation_is_zero() {
        let mut est = SpeedEstimator::new(KinematicsConfig::default());
        assert_eq!(est.estimate_speed(7, p(640.0, 480.0), 12.5), 0.0);
        assert_eq!(est.estimate_speed(8, p(0.0, 0.0), 0.0), 0.0);
        assert_eq!(est.len(), 2);
    }

    #[test]
    fn hundred_pixels_in_one_second_is_36_kmh() {
        let mut est = SpeedEstimator::new(KinematicsConfig {
            meters_per_pixel: 0.1,
            smoothing: 1.0,
        });
        est.estimate_speed(1, p(0.0, 0.0), 0.0);
        assert_eq!(est.estimate_speed(1, p(100.0, 0.0), 1.0), 36.0);
    }

    #[test]
    fn duplicate_timestamp_reports_zero_and_overwrites() {
        let mut est = SpeedEstimator::new(KinematicsConfig::default());
        est.estimate_speed(1, p(0.0, 0.0), 1.0);
        assert_eq!(est.estimate_speed(1, p(50.0, 0.0), 1.0), 0.0);
        assert_eq!(est.estimate_speed(1, p(60.0, 0.0), 0.5), 0.0);

        let h = est.get(1).unwrap();
        assert_eq!(h.position, p(60.0, 0.0));
        assert_eq!(h.time, 0.5);
    }

    #[test]
    fn dropped_frames_are_absorbed_into_elapsed_time() {
        let mut est = SpeedEstimator::new(KinematicsConfig::default());
        est.estimate_speed(1, p(0.0, 0.0), 0.0);
        // 200px over 2s is the same 36 km/h as 100px over 1s
        assert_eq!(est.estimate_speed(1, p(200.0, 0.0), 2.0), 36.0);
    }

    #[test]
    fn smoothing_blends_with_previous_estimate() {
        let mut est = SpeedEstimator::new(KinematicsConfig {
            meters_per_pixel: 0.1,
            smoothing: 0.5,
        });
        est.estimate_speed(1, p(0.0, 0.0), 0.0);
        assert_eq!(est.estimate_speed(1, p(100.0, 0.0), 1.0), 36.0);
        // raw 0 km/h blended with 36 km/h
        assert_eq!(est.estimate_speed(1, p(100.0, 0.0), 2.0), 18.0);
    }

    #[test]
    fn forgotten_id_starts_over() {
        let mut est = SpeedEstimator::new(KinematicsConfig::default());
        est.estimate_speed(3, p(0.0, 0.0), 0.0);
        assert!(est.forget(3));
        assert!(est.is_empty());
        assert_eq!(est.estimate_speed(3, p(100.0, 0.0), 1.0), 0.0);

        est.forget_all(&[3, 4]);
        assert!(est.is_empty());
    }
}
