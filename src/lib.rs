pub mod bbox;
pub mod circular_queue;
pub mod config;
pub mod detection;
pub mod detector;
pub mod error;
pub mod evidence;
pub mod frame;
pub mod kinematics;
pub mod math;
pub mod pipeline;
pub mod plate;
pub mod rules;
pub mod signals;
pub mod track;
pub mod tracker;
pub mod violation;

mod matching;

pub use config::Config;
pub use detection::{Detection, ObjectClass};
pub use detector::{DetectionFilter, Detector, ReplayDetector};
pub use error::{ConfigError, Error};
pub use evidence::{DirectorySink, EvidenceLog, EvidenceRecord, EvidenceSink, NullSink};
pub use frame::Frame;
pub use kinematics::SpeedEstimator;
pub use pipeline::{FrameReport, Pipeline, RunStats, StopHandle};
pub use plate::{NoPlateReader, PlateReader};
pub use rules::{RuleEngine, RuleSet};
pub use signals::{AuxSignals, FixedSignals, FrameSignals, SignalProvider};
pub use track::{ActorId, TrackedActor};
pub use tracker::{ActorTracker, TrackerOutput};
pub use violation::{ArtifactName, ViolationEvent, ViolationKind};

/// Per-class identity tracker.
///
/// `update` is called at most once per frame with detections that were already
/// filtered down to the tracker's class set.
pub trait Tracking {
    fn update(&mut self, detections: &[Detection]) -> TrackerOutput;
    fn actors(&self) -> &[TrackedActor];

    /// Drops every actor and returns their ids. Id allocation is not rewound.
    fn reset(&mut self) -> Vec<ActorId>;
}
