//! Violation rules evaluated against one frame's tracked actors.
//!
//! Every `detect_*` method is a pure function of its arguments: the engine holds
//! only its thresholds, so calling a rule twice with the same snapshot yields the
//! same events. Rules never deduplicate; one actor may trigger several rules in
//! the same frame.

use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::detection::ObjectClass;
use crate::math;
use crate::signals::{AuxSignals, HelmetFlags, LaneGeometry, StopLine, TrafficLight};
use crate::track::{ActorId, TrackedActor};
use crate::violation::{ViolationDetail, ViolationEvent, ViolationKind};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RuleConfig {
    pub overspeed_threshold_kmh: f64,
    #[serde(default = "default_noise_floor")]
    pub overspeed_noise_floor_kmh: f64,
    #[serde(default = "default_signal_jump_distance")]
    pub signal_jump_distance_px: f32,
    #[serde(default = "default_max_persons")]
    pub triple_riding_max_persons: usize,
    #[serde(default = "default_rider_proximity")]
    pub rider_proximity_px: f32,
    #[serde(default)]
    pub enabled: RuleSet,
}

fn default_noise_floor() -> f64 {
    5.0
}

fn default_signal_jump_distance() -> f32 {
    50.0
}

fn default_max_persons() -> usize {
    3
}

fn default_rider_proximity() -> f32 {
    100.0
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            overspeed_threshold_kmh: 60.0,
            overspeed_noise_floor_kmh: default_noise_floor(),
            signal_jump_distance_px: default_signal_jump_distance(),
            triple_riding_max_persons: default_max_persons(),
            rider_proximity_px: default_rider_proximity(),
            enabled: RuleSet::default(),
        }
    }
}

/// The subset of rules a caller wants evaluated. Defaults to all of them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct RuleSet(BTreeSet<ViolationKind>);

impl Default for RuleSet {
    fn default() -> Self {
        Self::all()
    }
}

impl RuleSet {
    pub fn all() -> Self {
        Self(ViolationKind::ALL.iter().copied().collect())
    }

    pub fn none() -> Self {
        Self(BTreeSet::new())
    }

    pub fn with(mut self, kind: ViolationKind) -> Self {
        self.0.insert(kind);
        self
    }

    pub fn without(mut self, kind: ViolationKind) -> Self {
        self.0.remove(&kind);
        self
    }

    #[inline]
    pub fn contains(&self, kind: ViolationKind) -> bool {
        self.0.contains(&kind)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ViolationKind> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<ViolationKind> for RuleSet {
    fn from_iter<I: IntoIterator<Item = ViolationKind>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Frame identity stamped onto every event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stamp {
    pub frame_index: u64,
    pub timestamp: DateTime<Utc>,
}

/// One frame's worth of rule inputs.
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub vehicles: &'a [TrackedActor],
    pub riders: &'a [TrackedActor],
    pub speeds: &'a BTreeMap<ActorId, f64>,
    pub signals: &'a AuxSignals,
    pub stamp: Stamp,
}

#[derive(Debug, Clone)]
pub struct RuleEngine {
    config: RuleConfig,
}

impl RuleEngine {
    pub fn new(config: RuleConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    /// Runs each rule in `rules` once, in catalog order.
    pub fn evaluate(&self, rules: &RuleSet, input: &RuleInput<'_>) -> Vec<ViolationEvent> {
        let mut events = Vec::new();

        for kind in ViolationKind::ALL {
            if !rules.contains(kind) {
                continue;
            }

            let found = match kind {
                ViolationKind::Overspeeding => {
                    self.detect_overspeeding(input.vehicles, input.speeds, input.stamp)
                }
                ViolationKind::SignalJump => self.detect_signal_jump(
                    input.vehicles,
                    input.signals.traffic_light.as_ref(),
                    input.signals.stop_line.as_ref(),
                    input.stamp,
                ),
                ViolationKind::TripleRiding => {
                    self.detect_triple_riding(input.vehicles, input.riders, input.stamp)
                }
                ViolationKind::HelmetlessRiding => self.detect_helmetless_riding(
                    input.riders,
                    input.signals.helmets.as_ref(),
                    input.stamp,
                ),
                ViolationKind::WrongLane => self.detect_wrong_lane(
                    input.vehicles,
                    input.signals.lanes.as_ref(),
                    input.stamp,
                ),
            };

            events.extend(found);
        }

        events
    }

    /// Vehicles whose estimated speed is strictly above the limit and above the
    /// jitter floor. Vehicles without an estimate are skipped.
    pub fn detect_overspeeding(
        &self,
        vehicles: &[TrackedActor],
        speeds: &BTreeMap<ActorId, f64>,
        stamp: Stamp,
    ) -> Vec<ViolationEvent> {
        let limit = self.config.overspeed_threshold_kmh;
        let floor = self.config.overspeed_noise_floor_kmh;

        vehicles
            .iter()
            .filter_map(|v| {
                let speed = *speeds.get(&v.id)?;
                if speed > limit && speed > floor {
                    Some(event(
                        ViolationKind::Overspeeding,
                        v,
                        vec![],
                        stamp,
                        ViolationDetail::Speed {
                            speed_kmh: speed,
                            limit_kmh: limit,
                        },
                    ))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Vehicles near the stop line while the light is red.
    pub fn detect_signal_jump(
        &self,
        vehicles: &[TrackedActor],
        light: Option<&TrafficLight>,
        stop_line: Option<&StopLine>,
        stamp: Stamp,
    ) -> Vec<ViolationEvent> {
        let (light, stop_line) = match (light, stop_line) {
            (Some(l), Some(s)) => (l, s),
            _ => return Vec::new(),
        };

        if !light.is_red() {
            return Vec::new();
        }

        vehicles
            .iter()
            .filter_map(|v| {
                let distance_px = stop_line.distance(&v.centroid());
                (distance_px < self.config.signal_jump_distance_px).then(|| {
                    event(
                        ViolationKind::SignalJump,
                        v,
                        vec![],
                        stamp,
                        ViolationDetail::SignalJump {
                            distance_px,
                            stop_line_y: stop_line.y,
                        },
                    )
                })
            })
            .collect()
    }

    /// Motorcycles with more riders within the proximity radius than allowed.
    pub fn detect_triple_riding(
        &self,
        vehicles: &[TrackedActor],
        riders: &[TrackedActor],
        stamp: Stamp,
    ) -> Vec<ViolationEvent> {
        let max = self.config.triple_riding_max_persons;
        let radius = self.config.rider_proximity_px;

        vehicles
            .iter()
            .filter(|v| v.is_class(ObjectClass::Motorcycle))
            .filter_map(|v| {
                let c = v.centroid();
                let nearby: Vec<ActorId> = riders
                    .iter()
                    .filter(|r| math::distance(&c, &r.centroid()) < radius)
                    .map(|r| r.id)
                    .collect();

                (nearby.len() > max).then(|| {
                    let rider_count = nearby.len();
                    event(
                        ViolationKind::TripleRiding,
                        v,
                        nearby,
                        stamp,
                        ViolationDetail::RiderCount {
                            rider_count,
                            max_persons: max,
                        },
                    )
                })
            })
            .collect()
    }

    /// Riders whose helmet flag is explicitly `false`. Riders without a flag are skipped.
    pub fn detect_helmetless_riding(
        &self,
        riders: &[TrackedActor],
        helmets: Option<&HelmetFlags>,
        stamp: Stamp,
    ) -> Vec<ViolationEvent> {
        let helmets = match helmets {
            Some(h) => h,
            None => return Vec::new(),
        };

        riders
            .iter()
            .filter(|r| helmets.get(&r.id) == Some(&false))
            .map(|r| {
                event(
                    ViolationKind::HelmetlessRiding,
                    r,
                    vec![],
                    stamp,
                    ViolationDetail::Helmetless,
                )
            })
            .collect()
    }

    /// Vehicles whose centroid lies outside every lane assigned to their class.
    pub fn detect_wrong_lane(
        &self,
        vehicles: &[TrackedActor],
        lanes: Option<&LaneGeometry>,
        stamp: Stamp,
    ) -> Vec<ViolationEvent> {
        let lanes = match lanes {
            Some(l) => l,
            None => return Vec::new(),
        };

        vehicles
            .iter()
            .filter(|v| lanes.in_assigned_lane(v) == Some(false))
            .map(|v| event(ViolationKind::WrongLane, v, vec![], stamp, ViolationDetail::WrongLane))
            .collect()
    }
}

fn event(
    kind: ViolationKind,
    actor: &TrackedActor,
    related: Vec<ActorId>,
    stamp: Stamp,
    detail: ViolationDetail,
) -> ViolationEvent {
    ViolationEvent::new(
        kind,
        actor.id,
        actor.class,
        related,
        stamp.frame_index,
        stamp.timestamp,
        actor.bbox,
        detail,
    )
}
