//! Per-stream driver: detections in, tracked actors, speeds and evidence out.
//!
//! A `Pipeline` owns every piece of mutable per-stream state (both trackers, the
//! speed estimator and the cooldown table). Frames must be fed in stream order,
//! one at a time. Independent streams get independent pipelines.

use serde_derive::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::detector::{DetectionFilter, Detector};
use crate::error::Error;
use crate::evidence::{DirectorySink, EvidenceLog, EvidenceRecord, EvidenceSink, NullSink};
use crate::frame::Frame;
use crate::kinematics::SpeedEstimator;
use crate::plate::{NoPlateReader, PlateReader};
use crate::rules::{RuleEngine, RuleInput, RuleSet, Stamp};
use crate::signals::{FrameSignals, SignalContext, SignalProvider};
use crate::track::{ActorId, TrackedActor};
use crate::tracker::ActorTracker;
use crate::violation::{ViolationEvent, ViolationKind};
use crate::Tracking;

/// Requests a clean stop. The pipeline checks it between frames only.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Suppresses a repeated (kind, actor) event for a number of frames after it
/// was last reported. Zero frames lets every event through.
#[derive(Debug, Default)]
pub struct Cooldown {
    frames: u64,
    last: HashMap<(ViolationKind, ActorId), u64>,
}

impl Cooldown {
    pub fn new(frames: u64) -> Self {
        Self {
            frames,
            last: HashMap::new(),
        }
    }

    /// Whether `event` may be reported. Allowed events restart their window.
    pub fn allow(&mut self, event: &ViolationEvent) -> bool {
        if self.frames == 0 {
            return true;
        }

        let key = (event.kind(), event.actor_id());
        let frame = event.frame_index();

        match self.last.get(&key) {
            Some(&prev) if frame.saturating_sub(prev) < self.frames => false,
            _ => {
                self.last.insert(key, frame);
                true
            }
        }
    }

    /// Drops windows of evicted actors. Vehicle and rider ids come from
    /// different trackers, so `vehicle` selects which kinds the ids belong to.
    pub fn forget(&mut self, ids: &[ActorId], vehicle: bool) {
        if ids.is_empty() {
            return;
        }

        self.last
            .retain(|(kind, id), _| kind.is_vehicle() != vehicle || !ids.contains(id));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.last.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}

/// Everything produced while processing one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub frame_index: u64,
    pub vehicles: Vec<TrackedActor>,
    pub riders: Vec<TrackedActor>,
    pub speeds: BTreeMap<ActorId, f64>,
    pub evicted_vehicles: Vec<ActorId>,
    pub evicted_riders: Vec<ActorId>,
    pub events: Vec<ViolationEvent>,
    pub evidence: Vec<EvidenceRecord>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub frames: u64,
    pub skipped_frames: u64,
    pub events: u64,
    pub suppressed_events: u64,
    pub by_kind: BTreeMap<ViolationKind, u64>,
    pub plate_failures: u64,
    pub evidence_failures: u64,
    pub released_actors: usize,
}

pub struct Pipeline {
    filter: DetectionFilter,
    vehicles: ActorTracker,
    riders: ActorTracker,
    speeds: SpeedEstimator,
    engine: RuleEngine,
    rules: RuleSet,
    signals: Box<dyn SignalProvider>,
    plates: Box<dyn PlateReader>,
    sink: Box<dyn EvidenceSink>,
    cooldown: Cooldown,
    log: EvidenceLog,
    stats: RunStats,
}

impl Pipeline {
    /// Builds a pipeline from validated configuration. Signals come from the
    /// frames themselves and plates are not read until replaced with the
    /// `with_*` builders. Evidence goes to a [`DirectorySink`] when
    /// `[evidence] enabled` is set and is kept in the log only otherwise.
    pub fn new(config: &Config) -> Result<Self, Error> {
        config.validate()?;

        let sink: Box<dyn EvidenceSink> = if config.evidence.enabled {
            Box::new(DirectorySink::new(config.evidence.clone())?)
        } else {
            Box::new(NullSink)
        };

        Ok(Self {
            filter: DetectionFilter::new(config.detection.clone()),
            vehicles: ActorTracker::new("vehicle", config.tracker.clone()),
            riders: ActorTracker::new("rider", config.tracker.clone()),
            speeds: SpeedEstimator::new(config.kinematics.clone()),
            engine: RuleEngine::new(config.rules.clone()),
            rules: config.rules.enabled.clone(),
            signals: Box::new(FrameSignals),
            plates: Box::new(NoPlateReader),
            sink,
            cooldown: Cooldown::new(config.evidence.cooldown_frames),
            log: EvidenceLog::new(config.evidence.log_capacity),
            stats: RunStats::default(),
        })
    }

    pub fn with_signals(mut self, signals: impl SignalProvider + 'static) -> Self {
        self.signals = Box::new(signals);
        self
    }

    pub fn with_plate_reader(mut self, plates: impl PlateReader + 'static) -> Self {
        self.plates = Box::new(plates);
        self
    }

    pub fn with_sink(mut self, sink: impl EvidenceSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    #[inline]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    #[inline]
    pub fn vehicle_tracker(&self) -> &ActorTracker {
        &self.vehicles
    }

    #[inline]
    pub fn rider_tracker(&self) -> &ActorTracker {
        &self.riders
    }

    #[inline]
    pub fn speed_estimator(&self) -> &SpeedEstimator {
        &self.speeds
    }

    #[inline]
    pub fn evidence_log(&self) -> &EvidenceLog {
        &self.log
    }

    #[inline]
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn process_frame(&mut self, frame: &Frame) -> FrameReport {
        let parts = self.filter.partition(&frame.detections);

        let vehicles = self.vehicles.update(&parts.vehicles);
        let riders = self.riders.update(&parts.riders);

        self.speeds.forget_all(&vehicles.evicted);
        self.cooldown.forget(&vehicles.evicted, true);
        self.cooldown.forget(&riders.evicted, false);

        let speeds: BTreeMap<ActorId, f64> = vehicles
            .actors
            .iter()
            .map(|a| (a.id, self.speeds.estimate_speed(a.id, a.centroid(), frame.timestamp)))
            .collect();

        let signals = self.signals.signals(&SignalContext {
            frame,
            traffic_lights: &parts.traffic_lights,
            vehicles: &vehicles.actors,
            riders: &riders.actors,
        });

        let mut events = self.engine.evaluate(
            &self.rules,
            &RuleInput {
                vehicles: &vehicles.actors,
                riders: &riders.actors,
                speeds: &speeds,
                signals: &signals,
                stamp: Stamp {
                    frame_index: frame.index,
                    timestamp: frame.captured_at,
                },
            },
        );

        let before = events.len();
        events.retain(|e| self.cooldown.allow(e));
        let suppressed = (before - events.len()) as u64;
        if suppressed > 0 {
            debug!(frame = frame.index, suppressed, "events within cooldown");
        }

        self.sink.observe(frame);

        let mut evidence = Vec::with_capacity(events.len());
        for event in &events {
            info!(
                kind = %event.kind(),
                actor = event.actor_id(),
                frame = frame.index,
                "violation"
            );

            let plate = self.read_plate(event, frame);
            let record = match self.sink.write(event, frame, &plate) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        kind = %event.kind(),
                        actor = event.actor_id(),
                        error = %e,
                        "evidence write failed"
                    );
                    self.stats.evidence_failures += 1;
                    EvidenceRecord::degraded(event.clone(), plate)
                }
            };

            *self.stats.by_kind.entry(event.kind()).or_default() += 1;
            self.log.push(record.clone());
            evidence.push(record);
        }

        self.stats.frames += 1;
        self.stats.events += events.len() as u64;
        self.stats.suppressed_events += suppressed;

        FrameReport {
            frame_index: frame.index,
            vehicles: vehicles.actors,
            riders: riders.actors,
            speeds,
            evicted_vehicles: vehicles.evicted,
            evicted_riders: riders.evicted,
            events,
            evidence,
        }
    }

    /// Plate text for vehicle violations; empty when there is no image, the
    /// event concerns a rider, or the reader fails.
    fn read_plate(&mut self, event: &ViolationEvent, frame: &Frame) -> String {
        if !event.kind().is_vehicle() {
            return String::new();
        }

        let image = match &frame.image {
            Some(image) => image,
            None => return String::new(),
        };

        match self.plates.read_plate(image, event.bbox()) {
            Ok(text) => text,
            Err(e) => {
                warn!(actor = event.actor_id(), error = %e, "plate read failed");
                self.stats.plate_failures += 1;
                String::new()
            }
        }
    }

    /// Feeds frames from `source` until it ends or `stop` is raised. Frames the
    /// source fails to produce are logged and skipped. Returns the number of
    /// frames processed by this call.
    pub fn run<F>(&mut self, source: &mut dyn Detector, stop: &StopHandle, mut on_frame: F) -> u64
    where
        F: FnMut(&FrameReport),
    {
        let mut processed = 0;

        while !stop.is_stopped() {
            let frame = match source.next_frame() {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    warn!(error = %e, "skipping unreadable frame");
                    self.stats.skipped_frames += 1;
                    continue;
                }
                None => break,
            };

            let report = self.process_frame(&frame);
            on_frame(&report);
            processed += 1;
        }

        if stop.is_stopped() {
            info!(processed, "stop requested");
        }

        processed
    }

    /// Releases all tracker and estimator state and returns the run totals.
    pub fn shutdown(mut self) -> RunStats {
        let released = self.vehicles.reset().len() + self.riders.reset().len();
        self.speeds.clear();
        self.cooldown.clear();

        self.stats.released_actors = released;
        info!(
            frames = self.stats.frames,
            events = self.stats.events,
            released,
            "pipeline shut down"
        );

        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;
    use crate::detection::{Detection, ObjectClass};
    use crate::rules::RuleConfig;
    use crate::violation::ViolationDetail;
    use chrono::{TimeZone, Utc};

    fn event(kind: ViolationKind, actor_id: ActorId, frame: u64) -> ViolationEvent {
        ViolationEvent::new(
            kind,
            actor_id,
            ObjectClass::Car,
            vec![],
            frame,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            BBox::ltrb(0.0, 0.0, 10.0, 10.0),
            ViolationDetail::WrongLane,
        )
    }

    fn car(cx: f32) -> Detection {
        Detection::new(
            BBox::ltrb(cx - 20.0, 40.0, cx + 20.0, 60.0),
            ObjectClass::Car,
            0.9,
        )
    }

    fn config(threshold: f64) -> Config {
        Config {
            rules: RuleConfig {
                overspeed_threshold_kmh: threshold,
                ..RuleConfig::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn cooldown_suppresses_repeats_within_window() {
        let mut cd = Cooldown::new(3);
        assert!(cd.allow(&event(ViolationKind::WrongLane, 1, 10)));
        assert!(!cd.allow(&event(ViolationKind::WrongLane, 1, 12)));
        assert!(cd.allow(&event(ViolationKind::Overspeeding, 1, 12)));
        assert!(cd.allow(&event(ViolationKind::WrongLane, 2, 12)));
        assert!(cd.allow(&event(ViolationKind::WrongLane, 1, 13)));
    }

    #[test]
    fn cooldown_forgets_only_matching_tracker() {
        let mut cd = Cooldown::new(100);
        cd.allow(&event(ViolationKind::WrongLane, 1, 0));
        cd.allow(&event(ViolationKind::HelmetlessRiding, 1, 0));

        cd.forget(&[1], false);
        assert_eq!(cd.len(), 1);
        assert!(!cd.allow(&event(ViolationKind::WrongLane, 1, 1)));

        cd.forget(&[1], true);
        assert!(cd.is_empty());
    }

    #[test]
    fn zero_cooldown_passes_everything() {
        let mut cd = Cooldown::new(0);
        assert!(cd.allow(&event(ViolationKind::WrongLane, 1, 0)));
        assert!(cd.allow(&event(ViolationKind::WrongLane, 1, 0)));
        assert!(cd.is_empty());
    }

    #[test]
    fn invalid_config_is_rejected_at_startup() {
        let mut cfg = config(60.0);
        cfg.tracker.max_distance_px = -1.0;
        assert!(matches!(Pipeline::new(&cfg), Err(Error::Config(_))));
    }

    #[test]
    fn run_stops_between_frames() {
        let mut pipeline = Pipeline::new(&config(60.0)).unwrap();
        let stop = StopHandle::new();
        let frames: Vec<Result<Frame, Error>> = (0..10)
            .map(|i| {
                Ok(Frame::new(i, i as f64, Utc::now(), (640, 480))
                    .with_detections(vec![car(100.0 + i as f32)]))
            })
            .collect();
        let mut source = frames.into_iter();

        let stopper = stop.clone();
        let processed = pipeline.run(&mut source, &stop, |report| {
            if report.frame_index == 3 {
                stopper.stop();
            }
        });

        assert_eq!(processed, 4);
        assert_eq!(pipeline.stats().frames, 4);
        assert_eq!(pipeline.vehicle_tracker().len(), 1);

        let stats = pipeline.shutdown();
        assert_eq!(stats.released_actors, 1);
    }

    #[test]
    fn unreadable_frames_are_skipped() {
        let mut pipeline = Pipeline::new(&config(60.0)).unwrap();
        let frames = vec![
            Ok(Frame::new(0, 0.0, Utc::now(), (640, 480))),
            Err(Error::Replay {
                line: 2,
                reason: "garbage".to_string(),
            }),
            Ok(Frame::new(1, 0.1, Utc::now(), (640, 480))),
        ];

        let processed = pipeline.run(&mut frames.into_iter(), &StopHandle::new(), |_| {});
        assert_eq!(processed, 2);
        assert_eq!(pipeline.stats().skipped_frames, 1);
    }

    #[test]
    fn speeds_are_reported_per_vehicle() {
        let mut pipeline = Pipeline::new(&config(60.0)).unwrap();
        let t0 = Utc::now();

        let first = pipeline.process_frame(
            &Frame::new(0, 0.0, t0, (640, 480)).with_detections(vec![car(100.0)]),
        );
        let second = pipeline.process_frame(
            &Frame::new(1, 1.0, t0, (640, 480)).with_detections(vec![car(150.0)]),
        );

        let id = first.vehicles[0].id;
        assert_eq!(first.speeds[&id], 0.0);
        assert_eq!(second.vehicles[0].id, id);
        assert!((second.speeds[&id] - 18.0).abs() < 1e-6);
        assert!(second.events.is_empty());
    }
}
