use chrono::{DateTime, Utc};
use image::RgbImage;
use std::sync::Arc;

use crate::bbox::{BBox, Ltrb};
use crate::detection::Detection;
use crate::signals::{AuxSignals, SignalColor};

/// Everything the pipeline receives for one video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub timestamp: f64, // stream clock, in seconds
    pub captured_at: DateTime<Utc>,
    pub dims: (u32, u32),
    pub detections: Vec<Detection>,
    pub image: Option<Arc<RgbImage>>,
    pub signals: AuxSignals,

    // colour of the nearest light as reported by an external classifier
    pub light_color: Option<SignalColor>,

    // faces or other regions to blur in evidence images
    pub privacy_regions: Vec<BBox<Ltrb>>,
}

impl Frame {
    pub fn new(index: u64, timestamp: f64, captured_at: DateTime<Utc>, dims: (u32, u32)) -> Self {
        Self {
            index,
            timestamp,
            captured_at,
            dims,
            detections: Vec::new(),
            image: None,
            signals: AuxSignals::default(),
            light_color: None,
            privacy_regions: Vec::new(),
        }
    }

    pub fn with_detections(mut self, detections: Vec<Detection>) -> Self {
        self.detections = detections;
        self
    }

    pub fn with_image(mut self, image: RgbImage) -> Self {
        self.dims = image.dimensions();
        self.image = Some(Arc::new(image));
        self
    }

    pub fn with_signals(mut self, signals: AuxSignals) -> Self {
        self.signals = signals;
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
