use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};
use crate::detection::ObjectClass;

/// Identity of a tracked actor, unique within one tracker instance and never reused.
pub type ActorId = u64;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrackedActor {
    pub id: ActorId,
    pub bbox: BBox<Ltrb>,
    pub class: ObjectClass,
    pub confidence: f32,

    // frames since creation
    pub age: u32,

    pub last_seen_frame: u64,

    // consecutive frames without an associated detection
    pub frames_unmatched: u32,
}

impl TrackedActor {
    #[inline]
    pub fn centroid(&self) -> na::Point2<f32> {
        self.bbox.centroid()
    }

    #[inline]
    pub fn is_class(&self, class: ObjectClass) -> bool {
        self.class == class
    }
}
