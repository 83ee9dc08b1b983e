use chrono::{DateTime, NaiveDateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::bbox::{BBox, Ltrb};
use crate::detection::ObjectClass;
use crate::track::ActorId;

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Overspeeding,
    SignalJump,
    TripleRiding,
    HelmetlessRiding,
    WrongLane,
}

impl ViolationKind {
    pub const ALL: [ViolationKind; 5] = [
        ViolationKind::Overspeeding,
        ViolationKind::SignalJump,
        ViolationKind::TripleRiding,
        ViolationKind::HelmetlessRiding,
        ViolationKind::WrongLane,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::Overspeeding => "overspeeding",
            ViolationKind::SignalJump => "signal_jump",
            ViolationKind::TripleRiding => "triple_riding",
            ViolationKind::HelmetlessRiding => "helmetless_riding",
            ViolationKind::WrongLane => "wrong_lane",
        }
    }

    /// Whether the implicated actor comes from the vehicle tracker.
    pub fn is_vehicle(&self) -> bool {
        !matches!(self, ViolationKind::HelmetlessRiding)
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown violation kind `{0}`")]
pub struct UnknownViolationKind(pub String);

impl FromStr for ViolationKind {
    type Err = UnknownViolationKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ViolationKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownViolationKind(s.to_string()))
    }
}

/// Numeric evidence backing a violation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViolationDetail {
    Speed { speed_kmh: f64, limit_kmh: f64 },
    SignalJump { distance_px: f32, stop_line_y: f32 },
    RiderCount { rider_count: usize, max_persons: usize },
    Helmetless,
    WrongLane,
}

/// A rule match. Built once by the rule engine and never modified afterwards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ViolationEvent {
    kind: ViolationKind,
    actor_id: ActorId,
    actor_class: ObjectClass,
    related_ids: Vec<ActorId>,
    frame_index: u64,
    timestamp: DateTime<Utc>,
    bbox: BBox<Ltrb>,
    detail: ViolationDetail,
}

impl ViolationEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: ViolationKind,
        actor_id: ActorId,
        actor_class: ObjectClass,
        related_ids: Vec<ActorId>,
        frame_index: u64,
        timestamp: DateTime<Utc>,
        bbox: BBox<Ltrb>,
        detail: ViolationDetail,
    ) -> Self {
        Self {
            kind,
            actor_id,
            actor_class,
            related_ids,
            frame_index,
            timestamp,
            bbox,
            detail,
        }
    }

    #[inline]
    pub fn kind(&self) -> ViolationKind {
        self.kind
    }

    #[inline]
    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    #[inline]
    pub fn actor_class(&self) -> ObjectClass {
        self.actor_class
    }

    /// Other actors implicated, e.g. the riders counted on a motorcycle.
    #[inline]
    pub fn related_ids(&self) -> &[ActorId] {
        &self.related_ids
    }

    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    #[inline]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Region to crop and outline in the evidence image.
    #[inline]
    pub fn bbox(&self) -> &BBox<Ltrb> {
        &self.bbox
    }

    #[inline]
    pub fn detail(&self) -> &ViolationDetail {
        &self.detail
    }

    pub fn artifact_name(&self) -> ArtifactName {
        ArtifactName {
            kind: self.kind,
            actor_id: self.actor_id,
            timestamp: self.timestamp.naive_utc(),
        }
    }
}

/// `{kind}_{actor_id}_{YYYYMMDD}_{HHMMSS}`, the stem every evidence artifact is named by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactName {
    pub kind: ViolationKind,
    pub actor_id: ActorId,
    pub timestamp: NaiveDateTime,
}

impl ArtifactName {
    pub fn file_name(&self, ext: &str) -> String {
        format!("{}.{}", self, ext)
    }

    /// Recovers kind, actor id and timestamp from an artifact file name, with or
    /// without extension. Kind names contain underscores, so fields are split
    /// from the right.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = match file_name.rsplit_once('.') {
            Some((stem, _)) => stem,
            None => file_name,
        };

        let mut parts = stem.rsplitn(4, '_');
        let time = parts.next()?;
        let date = parts.next()?;
        let actor_id = parts.next()?.parse().ok()?;
        let kind = parts.next()?.parse().ok()?;
        let timestamp =
            NaiveDateTime::parse_from_str(&format!("{}_{}", date, time), STAMP_FORMAT).ok()?;

        Some(Self {
            kind,
            actor_id,
            timestamp,
        })
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.kind,
            self.actor_id,
            self.timestamp.format(STAMP_FORMAT)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(kind: ViolationKind, id: ActorId) -> ViolationEvent {
        ViolationEvent::new(
            kind,
            id,
            ObjectClass::Car,
            vec![],
            12,
            Utc.with_ymd_and_hms(2024, 3, 9, 17, 5, 42).unwrap(),
            BBox::ltrb(0.0, 0.0, 10.0, 10.0),
            ViolationDetail::WrongLane,
        )
    }

    #[test]
    fn artifact_name_follows_convention() {
        let name = event(ViolationKind::HelmetlessRiding, 17).artifact_name();
        assert_eq!(name.file_name("jpg"), "helmetless_riding_17_20240309_170542.jpg");
    }

    #[test]
    fn artifact_name_parses_back() {
        let name = event(ViolationKind::SignalJump, 4).artifact_name();
        let parsed = ArtifactName::parse(&name.file_name("jpg")).unwrap();
        assert_eq!(parsed, name);

        let bare = ArtifactName::parse("triple_riding_9_20240101_000001").unwrap();
        assert_eq!(bare.kind, ViolationKind::TripleRiding);
        assert_eq!(bare.actor_id, 9);
    }

    #[test]
    fn malformed_names_are_rejected() {
        assert!(ArtifactName::parse("clip_overspeeding_20240101_000001.mp4").is_none());
        assert!(ArtifactName::parse("speeding_1_20240101_000001.jpg").is_none());
        assert!(ArtifactName::parse("overspeeding_x_20240101_000001.jpg").is_none());
        assert!(ArtifactName::parse("overspeeding_1_2024_000001.jpg").is_none());
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in ViolationKind::ALL {
            assert_eq!(kind.as_str().parse::<ViolationKind>().unwrap(), kind);
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.as_str());
        }
    }

    #[test]
    fn unknown_kind_names_the_input() {
        let err = "speeding".parse::<ViolationKind>().unwrap_err();
        assert_eq!(err, UnknownViolationKind("speeding".to_string()));
        assert_eq!(err.to_string(), "unknown violation kind `speeding`");
    }
}
