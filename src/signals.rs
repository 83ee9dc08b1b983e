//! Auxiliary per-frame signals consumed by the rule engine.
//!
//! The rules only look at signal *values*. Where those values come from (a colour
//! classifier, a helmet detector, a calibrated lane map) is up to a
//! [`SignalProvider`]; [`FixedSignals`] replays a constant set for tests.

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::bbox::{BBox, Ltrb};
use crate::detection::{Detection, ObjectClass};
use crate::frame::Frame;
use crate::math;
use crate::track::{ActorId, TrackedActor};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignalColor {
    Red,
    Yellow,
    Green,
    Unknown,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TrafficLight {
    pub bbox: BBox<Ltrb>,
    pub color: SignalColor,
}

impl TrafficLight {
    #[inline]
    pub fn is_red(&self) -> bool {
        self.color == SignalColor::Red
    }
}

/// Horizontal stop line at pixel row `y`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StopLine {
    pub y: f32,
}

impl StopLine {
    #[inline]
    pub fn distance(&self, p: &na::Point2<f32>) -> f32 {
        (p.y - self.y).abs()
    }
}

/// A lane region and the vehicle classes assigned to it. An empty class list
/// assigns the lane to every vehicle class.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Lane {
    pub name: String,
    pub polygon: Vec<na::Point2<f32>>,
    #[serde(default)]
    pub classes: Vec<ObjectClass>,
}

impl Lane {
    #[inline]
    pub fn assigned_to(&self, class: ObjectClass) -> bool {
        self.classes.is_empty() || self.classes.contains(&class)
    }

    #[inline]
    pub fn contains(&self, p: na::Point2<f32>) -> bool {
        math::in_polygon(p, &self.polygon)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct LaneGeometry {
    pub lanes: Vec<Lane>,
}

impl LaneGeometry {
    /// `Some(true)` when the actor's centroid lies in one of the lanes assigned to
    /// its class, `Some(false)` when it lies in none of them, `None` when no lane
    /// is assigned to the class at all.
    pub fn in_assigned_lane(&self, actor: &TrackedActor) -> Option<bool> {
        let c = actor.centroid();
        let mut assigned = self.lanes.iter().filter(|l| l.assigned_to(actor.class)).peekable();

        assigned.peek()?;

        Some(assigned.any(|l| l.contains(c)))
    }
}

/// Helmet-detected flag per rider id.
pub type HelmetFlags = BTreeMap<ActorId, bool>;

/// Auxiliary inputs for one frame. Every field is optional; a rule whose signal
/// is missing does not fire.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AuxSignals {
    pub traffic_light: Option<TrafficLight>,
    pub stop_line: Option<StopLine>,
    pub lanes: Option<LaneGeometry>,
    pub helmets: Option<HelmetFlags>,
}

/// Inputs a provider may look at when producing signals for a frame.
pub struct SignalContext<'a> {
    pub frame: &'a Frame,
    pub traffic_lights: &'a [Detection],
    pub vehicles: &'a [TrackedActor],
    pub riders: &'a [TrackedActor],
}

pub trait SignalProvider {
    fn signals(&mut self, ctx: &SignalContext<'_>) -> AuxSignals;
}

/// Uses whatever the frame carries. When the frame reports a light colour but no
/// light box, the largest traffic-light detection stands in as the nearest light.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameSignals;

impl SignalProvider for FrameSignals {
    fn signals(&mut self, ctx: &SignalContext<'_>) -> AuxSignals {
        let mut signals = ctx.frame.signals.clone();

        if signals.traffic_light.is_none() {
            if let Some(color) = ctx.frame.light_color {
                signals.traffic_light = nearest_light(ctx.traffic_lights)
                    .map(|det| TrafficLight { bbox: det.bbox, color });
            }
        }

        signals
    }
}

/// Deterministic provider returning the same signals every frame.
#[derive(Debug, Default, Clone)]
pub struct FixedSignals(pub AuxSignals);

impl SignalProvider for FixedSignals {
    fn signals(&mut self, _ctx: &SignalContext<'_>) -> AuxSignals {
        self.0.clone()
    }
}

fn nearest_light(lights: &[Detection]) -> Option<&Detection> {
    // first of the largest boxes wins
    lights.iter().fold(None, |best: Option<&Detection>, det| match best {
        Some(b) if b.bbox.area() >= det.bbox.area() => Some(b),
        _ => Some(det),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn actor(class: ObjectClass, cx: f32, cy: f32) -> TrackedActor {
        TrackedActor {
            id: 1,
            bbox: BBox::ltrb(cx - 5.0, cy - 5.0, cx + 5.0, cy + 5.0),
            class,
            confidence: 1.0,
            age: 0,
            last_seen_frame: 0,
            frames_unmatched: 0,
        }
    }

    fn lane(name: &str, x0: f32, x1: f32, classes: Vec<ObjectClass>) -> Lane {
        Lane {
            name: name.into(),
            polygon: vec![
                na::Point2::new(x0, 0.0),
                na::Point2::new(x1, 0.0),
                na::Point2::new(x1, 480.0),
                na::Point2::new(x0, 480.0),
            ],
            classes,
        }
    }

    #[test]
    fn lane_assignment_by_class() {
        let geo = LaneGeometry {
            lanes: vec![
                lane("bus", 0.0, 100.0, vec![ObjectClass::Bus]),
                lane("general", 100.0, 400.0, vec![ObjectClass::Car, ObjectClass::Motorcycle]),
            ],
        };

        assert_eq!(geo.in_assigned_lane(&actor(ObjectClass::Car, 200.0, 100.0)), Some(true));
        assert_eq!(geo.in_assigned_lane(&actor(ObjectClass::Car, 50.0, 100.0)), Some(false));
        assert_eq!(geo.in_assigned_lane(&actor(ObjectClass::Bus, 50.0, 100.0)), Some(true));
        assert_eq!(geo.in_assigned_lane(&actor(ObjectClass::Truck, 50.0, 100.0)), None);
    }

    #[test]
    fn frame_signals_fill_light_from_largest_detection() {
        let frame = {
            let mut f = Frame::new(0, 0.0, Utc::now(), (640, 480));
            f.light_color = Some(SignalColor::Red);
            f
        };
        let light = |bbox| Detection::new(bbox, ObjectClass::TrafficLight, 0.9);
        let small = light(BBox::ltrb(0.0, 0.0, 5.0, 5.0));
        let large = light(BBox::ltrb(10.0, 0.0, 30.0, 40.0));
        let lights = [small, large];

        let ctx = SignalContext {
            frame: &frame,
            traffic_lights: &lights,
            vehicles: &[],
            riders: &[],
        };

        let light = FrameSignals.signals(&ctx).traffic_light.unwrap();
        assert!(light.is_red());
        assert_eq!(light.bbox, large.bbox);
    }

    #[test]
    fn frame_signals_without_colour_has_no_light() {
        let frame = Frame::new(0, 0.0, Utc::now(), (640, 480));
        let lights = [Detection::new(
            BBox::ltrb(0.0, 0.0, 5.0, 5.0),
            ObjectClass::TrafficLight,
            0.9,
        )];
        let ctx = SignalContext {
            frame: &frame,
            traffic_lights: &lights,
            vehicles: &[],
            riders: &[],
        };

        assert!(FrameSignals.signals(&ctx).traffic_light.is_none());
    }

    #[test]
    fn signals_deserialize_from_partial_json() {
        let json = r#"{"stop_line": {"y": 240.0}, "helmets": {"3": false}}"#;
        let s: AuxSignals = serde_json::from_str(json).unwrap();
        assert_eq!(s.stop_line, Some(StopLine { y: 240.0 }));
        assert_eq!(s.helmets.unwrap().get(&3), Some(&false));
        assert!(s.traffic_light.is_none());
    }
}
