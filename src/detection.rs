use serde_derive::{Deserialize, Serialize};
use std::fmt;

use crate::bbox::{BBox, Ltrb};

/// Object class as reported by the detector, keyed by COCO class id.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(from = "i32", into = "i32")]
pub enum ObjectClass {
    Person,
    Car,
    Motorcycle,
    Bus,
    Truck,
    TrafficLight,
    Other(i32),
}

impl ObjectClass {
    pub fn coco_id(&self) -> i32 {
        match self {
            ObjectClass::Person => 0,
            ObjectClass::Car => 2,
            ObjectClass::Motorcycle => 3,
            ObjectClass::Bus => 5,
            ObjectClass::Truck => 7,
            ObjectClass::TrafficLight => 9,
            ObjectClass::Other(id) => *id,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectClass::Person => "person",
            ObjectClass::Car => "car",
            ObjectClass::Motorcycle => "motorcycle",
            ObjectClass::Bus => "bus",
            ObjectClass::Truck => "truck",
            ObjectClass::TrafficLight => "traffic light",
            ObjectClass::Other(_) => "other",
        }
    }
}

impl From<i32> for ObjectClass {
    fn from(id: i32) -> Self {
        match id {
            0 => ObjectClass::Person,
            2 => ObjectClass::Car,
            3 => ObjectClass::Motorcycle,
            5 => ObjectClass::Bus,
            7 => ObjectClass::Truck,
            9 => ObjectClass::TrafficLight,
            other => ObjectClass::Other(other),
        }
    }
}

impl From<ObjectClass> for i32 {
    fn from(class: ObjectClass) -> Self {
        class.coco_id()
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectClass::Other(id) => write!(f, "class {}", id),
            known => f.write_str(known.as_str()),
        }
    }
}

/// A single detector output. No identity, lives for one frame.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BBox<Ltrb>,
    #[serde(rename = "c")]
    pub class: ObjectClass,
    #[serde(rename = "p")]
    pub confidence: f32,
}

impl Detection {
    #[inline]
    pub fn new(bbox: BBox<Ltrb>, class: ObjectClass, confidence: f32) -> Self {
        Self {
            bbox,
            class,
            confidence,
        }
    }
}
