//! Evidence sink boundary and a file-system implementation.
//!
//! Image artifacts are named `{kind}_{actor_id}_{YYYYMMDD}_{HHMMSS}.{ext}` so a
//! review tool can recover the violation from the file name alone (see
//! [`ArtifactName::parse`](crate::violation::ArtifactName::parse)).

use image::{imageops, Rgb, RgbImage};
use serde_derive::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bbox::{BBox, Ltrb};
use crate::circular_queue::CircularQueue;
use crate::error::Error;
use crate::frame::Frame;
use crate::violation::{ViolationEvent, ViolationKind};

const VIOLATION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const LABEL_HEIGHT: u32 = 8;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EvidenceConfig {
    /// Write image artifacts to disk. When off, records are kept in the log only.
    pub enabled: bool,
    pub images_dir: PathBuf,
    pub clips_dir: PathBuf,
    pub image_ext: String,
    pub blur_faces: bool,
    pub blur_sigma: f32,
    /// Frames kept for the clip artifact; `0` disables clips.
    pub clip_frames: usize,
    /// Frames during which a repeated (kind, actor) event is suppressed; `0` disables.
    pub cooldown_frames: u64,
    /// Most recent records kept by the in-memory evidence log.
    pub log_capacity: usize,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            images_dir: PathBuf::from("evidence/images"),
            clips_dir: PathBuf::from("evidence/clips"),
            image_ext: "jpg".to_string(),
            blur_faces: false,
            blur_sigma: 8.0,
            clip_frames: 0,
            cooldown_frames: 0,
            log_capacity: 1000,
        }
    }
}

/// What was persisted for one violation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EvidenceRecord {
    pub event: ViolationEvent,
    pub license_plate: String,
    pub image_path: Option<PathBuf>,
    pub clip_path: Option<PathBuf>,
}

impl EvidenceRecord {
    /// Record for an event whose artifacts could not be written.
    pub fn degraded(event: ViolationEvent, license_plate: String) -> Self {
        Self {
            event,
            license_plate,
            image_path: None,
            clip_path: None,
        }
    }
}

pub trait EvidenceSink {
    /// Called once per processed frame, before any `write` for that frame.
    fn observe(&mut self, _frame: &Frame) {}

    fn write(
        &mut self,
        event: &ViolationEvent,
        frame: &Frame,
        license_plate: &str,
    ) -> Result<EvidenceRecord, Error>;
}

/// Persists nothing. Records carry the event and plate text but no artifacts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EvidenceSink for NullSink {
    fn write(
        &mut self,
        event: &ViolationEvent,
        _frame: &Frame,
        license_plate: &str,
    ) -> Result<EvidenceRecord, Error> {
        Ok(EvidenceRecord::degraded(event.clone(), license_plate.to_string()))
    }
}

/// Writes annotated JPEG evidence, a JSON sidecar and an optional clip of
/// preceding frames.
pub struct DirectorySink {
    config: EvidenceConfig,
    history: CircularQueue<(u64, Arc<RgbImage>)>,
}

impl DirectorySink {
    pub fn new(config: EvidenceConfig) -> Result<Self, Error> {
        create_dir(&config.images_dir)?;
        if config.clip_frames > 0 {
            create_dir(&config.clips_dir)?;
        }

        Ok(Self {
            history: CircularQueue::with_capacity(config.clip_frames),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &EvidenceConfig {
        &self.config
    }

    fn write_clip(&self, event: &ViolationEvent) -> Result<Option<PathBuf>, Error> {
        if self.history.is_empty() {
            return Ok(None);
        }

        let dir = self
            .config
            .clips_dir
            .join(format!("clip_{}", event.artifact_name()));
        create_dir(&dir)?;

        for (n, (index, image)) in self.history.iter().enumerate() {
            let path = dir.join(format!("{:04}_{}.{}", n, index, self.config.image_ext));
            image.save(&path)?;
        }

        Ok(Some(dir))
    }
}

impl EvidenceSink for DirectorySink {
    fn observe(&mut self, frame: &Frame) {
        if let Some(image) = &frame.image {
            self.history.push((frame.index, Arc::clone(image)));
        }
    }

    fn write(
        &mut self,
        event: &ViolationEvent,
        frame: &Frame,
        license_plate: &str,
    ) -> Result<EvidenceRecord, Error> {
        let source = frame
            .image
            .as_ref()
            .ok_or_else(|| Error::Sink(format!("frame {} carries no image", frame.index)))?;

        let mut canvas = RgbImage::clone(source);
        if self.config.blur_faces {
            for region in &frame.privacy_regions {
                blur_region(&mut canvas, region, self.config.blur_sigma);
            }
        }
        draw_violation(&mut canvas, event.bbox());

        let name = event.artifact_name();
        let image_path = self.config.images_dir.join(name.file_name(&self.config.image_ext));
        canvas.save(&image_path)?;

        // the image is on disk from here on; later failures only drop the extras
        let clip_path = match self.write_clip(event) {
            Ok(path) => path,
            Err(e) => {
                warn!(
                    kind = %event.kind(),
                    actor = event.actor_id(),
                    error = %e,
                    "clip write failed"
                );
                None
            }
        };

        let record = EvidenceRecord {
            event: event.clone(),
            license_plate: license_plate.to_string(),
            image_path: Some(image_path.clone()),
            clip_path,
        };

        if let Err(e) = write_sidecar(&record, &image_path.with_extension("json")) {
            warn!(path = %image_path.display(), error = %e, "sidecar write failed");
        }

        info!(
            kind = %event.kind(),
            actor = event.actor_id(),
            path = %image_path.display(),
            "evidence written"
        );

        Ok(record)
    }
}

fn write_sidecar(record: &EvidenceRecord, path: &Path) -> Result<(), Error> {
    let json = serde_json::to_vec_pretty(record)?;
    std::fs::write(path, json).map_err(|e| Error::Io(path.to_path_buf(), e))
}

fn create_dir(path: &Path) -> Result<(), Error> {
    std::fs::create_dir_all(path).map_err(|e| Error::Io(path.to_path_buf(), e))
}

/// Outlines the offending region and marks it with a filled tab above the box.
pub fn draw_violation(canvas: &mut RgbImage, bbox: &BBox<Ltrb>) {
    let (w, h) = canvas.dimensions();
    let (x, y, bw, bh) = match bbox.pixel_rect(w, h) {
        Some(r) => r,
        None => return,
    };

    for t in 0..BOX_THICKNESS.min(bw).min(bh) {
        for px in x..x + bw {
            canvas.put_pixel(px, y + t, VIOLATION_COLOR);
            canvas.put_pixel(px, y + bh - 1 - t, VIOLATION_COLOR);
        }
        for py in y..y + bh {
            canvas.put_pixel(x + t, py, VIOLATION_COLOR);
            canvas.put_pixel(x + bw - 1 - t, py, VIOLATION_COLOR);
        }
    }

    let tab_top = y.saturating_sub(LABEL_HEIGHT);
    for py in tab_top..y {
        for px in x..(x + bw).min(x + bw / 2 + 1) {
            canvas.put_pixel(px, py, VIOLATION_COLOR);
        }
    }
}

/// Gaussian-blurs the part of `region` that lies inside the canvas.
pub fn blur_region(canvas: &mut RgbImage, region: &BBox<Ltrb>, sigma: f32) {
    let (w, h) = canvas.dimensions();
    if let Some((x, y, rw, rh)) = region.pixel_rect(w, h) {
        let patch = imageops::crop_imm(canvas, x, y, rw, rh).to_image();
        let blurred = imageops::blur(&patch, sigma);
        imageops::replace(canvas, &blurred, x as i64, y as i64);
    } else {
        debug!(region = ?region.as_slice(), "privacy region outside frame");
    }
}

/// Most recent evidence records, bounded; the oldest record is dropped once
/// the log is full.
#[derive(Debug, Clone)]
pub struct EvidenceLog {
    records: CircularQueue<EvidenceRecord>,
}

impl EvidenceLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: CircularQueue::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: EvidenceRecord) {
        self.records.push(record);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.records.capacity()
    }

    /// Oldest first.
    pub fn records(&self) -> impl Iterator<Item = &EvidenceRecord> {
        self.records.iter()
    }

    /// Up to `limit` records, newest first. Records with equal timestamps keep
    /// reverse insertion order.
    pub fn recent(&self, limit: usize) -> Vec<&EvidenceRecord> {
        let mut out: Vec<_> = self.records.iter().rev().collect();
        out.sort_by(|a, b| b.event.timestamp().cmp(&a.event.timestamp()));
        out.truncate(limit);
        out
    }

    pub fn count(&self, kind: ViolationKind) -> usize {
        self.records.iter().filter(|r| r.event.kind() == kind).count()
    }

    pub fn export_json(&self, path: &Path) -> Result<(), Error> {
        let records: Vec<_> = self.records.iter().collect();
        let json = serde_json::to_vec_pretty(&records)?;
        std::fs::write(path, json).map_err(|e| Error::Io(path.to_path_buf(), e))
    }
}
