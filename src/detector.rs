//! Detector boundary.
//!
//! Detection itself happens outside this crate. What lives here is the
//! confidence/class filtering applied before tracking, and a replay source that
//! feeds recorded detections back as frames.

use chrono::{DateTime, Duration, Utc};
use serde_derive::{Deserialize, Serialize};
use std::io::BufRead;
use tracing::warn;

use crate::bbox::{BBox, Ltrb};
use crate::detection::{Detection, ObjectClass};
use crate::error::Error;
use crate::frame::Frame;
use crate::signals::{AuxSignals, SignalColor};

/// Source of detected frames in stream order. `None` ends the stream.
pub trait Detector {
    fn next_frame(&mut self) -> Option<Result<Frame, Error>>;
}

impl<I> Detector for I
where
    I: Iterator<Item = Result<Frame, Error>>,
{
    #[inline]
    fn next_frame(&mut self) -> Option<Result<Frame, Error>> {
        self.next()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    pub vehicle_classes: Vec<ObjectClass>,
    pub rider_classes: Vec<ObjectClass>,
    pub traffic_light_classes: Vec<ObjectClass>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            vehicle_classes: vec![
                ObjectClass::Car,
                ObjectClass::Motorcycle,
                ObjectClass::Bus,
                ObjectClass::Truck,
            ],
            rider_classes: vec![ObjectClass::Person],
            traffic_light_classes: vec![ObjectClass::TrafficLight],
        }
    }
}

/// One frame's detections split by the tracker that consumes them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub vehicles: Vec<Detection>,
    pub riders: Vec<Detection>,
    pub traffic_lights: Vec<Detection>,
}

#[derive(Debug, Clone)]
pub struct DetectionFilter {
    config: DetectionConfig,
}

impl DetectionFilter {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    /// Drops low-confidence detections and splits the rest into mutually
    /// exclusive class sets. Classes in none of the sets are discarded.
    pub fn partition(&self, detections: &[Detection]) -> Partition {
        let mut out = Partition::default();

        for det in detections {
            if !(det.confidence >= self.config.confidence_threshold) {
                continue;
            }

            if self.config.vehicle_classes.contains(&det.class) {
                out.vehicles.push(*det);
            } else if self.config.rider_classes.contains(&det.class) {
                out.riders.push(*det);
            } else if self.config.traffic_light_classes.contains(&det.class) {
                out.traffic_lights.push(*det);
            }
        }

        out
    }
}

/// Recorded detection: centre, size, confidence (`p`) and COCO class (`c`).
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
struct RecordedDetection {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    p: f32,
    c: i32,
}

impl From<RecordedDetection> for Detection {
    fn from(r: RecordedDetection) -> Self {
        Detection::new(
            BBox::xywh(r.x, r.y, r.w, r.h).as_ltrb(),
            ObjectClass::from(r.c),
            r.p,
        )
    }
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum RecordedFrame {
    Bare(Vec<RecordedDetection>),
    Full {
        detections: Vec<RecordedDetection>,
        #[serde(default)]
        signals: AuxSignals,
        #[serde(default)]
        light_color: Option<SignalColor>,
        #[serde(default)]
        privacy_regions: Vec<BBox<Ltrb>>,
    },
}

/// Replays frames from `<timestamp_us>:<json>` lines.
///
/// The JSON part is either a bare array of detections or an object with
/// `detections` plus optional `signals`, `light_color` and `privacy_regions`.
/// Blank lines and lines starting with `#` are skipped.
pub struct ReplayDetector<R> {
    lines: std::io::Lines<R>,
    line_no: usize,
    next_index: u64,
    start: DateTime<Utc>,
    dims: (u32, u32),
}

impl<R: BufRead> ReplayDetector<R> {
    pub fn new(reader: R, start: DateTime<Utc>, dims: (u32, u32)) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            next_index: 0,
            start,
            dims,
        }
    }

    fn parse_line(&mut self, line: &str) -> Result<Frame, Error> {
        let line_no = self.line_no;
        let err = |reason: String| Error::Replay {
            line: line_no,
            reason,
        };

        let (ts, json) = line
            .split_once(':')
            .ok_or_else(|| err("expected `<timestamp_us>:<json>`".to_string()))?;
        let ts_us: i64 = ts
            .trim()
            .parse()
            .map_err(|e| err(format!("bad timestamp `{}`: {}", ts.trim(), e)))?;
        let recorded: RecordedFrame =
            serde_json::from_str(json).map_err(|e| err(format!("bad detections: {}", e)))?;

        let mut frame = Frame::new(
            self.next_index,
            ts_us as f64 / 1_000_000.0,
            self.start + Duration::microseconds(ts_us),
            self.dims,
        );
        self.next_index += 1;

        match recorded {
            RecordedFrame::Bare(dets) => {
                frame.detections = dets.into_iter().map(Into::into).collect();
            }
            RecordedFrame::Full {
                detections,
                signals,
                light_color,
                privacy_regions,
            } => {
                frame.detections = detections.into_iter().map(Into::into).collect();
                frame.signals = signals;
                frame.light_color = light_color;
                frame.privacy_regions = privacy_regions;
            }
        }

        Ok(frame)
    }
}

impl<R: BufRead> Iterator for ReplayDetector<R> {
    type Item = Result<Frame, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line_no += 1;
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    warn!(line = self.line_no, error = %e, "replay read failed");
                    return Some(Err(Error::Replay {
                        line: self.line_no,
                        reason: e.to_string(),
                    }));
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            return Some(self.parse_line(trimmed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn det(class: ObjectClass, confidence: f32) -> Detection {
        Detection::new(BBox::ltrb(0.0, 0.0, 10.0, 10.0), class, confidence)
    }

    #[test]
    fn partition_filters_confidence_and_splits_classes() {
        let filter = DetectionFilter::new(DetectionConfig::default());
        let dets = [
            det(ObjectClass::Car, 0.9),
            det(ObjectClass::Motorcycle, 0.2),
            det(ObjectClass::Person, 0.5),
            det(ObjectClass::TrafficLight, 0.8),
            det(ObjectClass::Other(15), 0.99),
            det(ObjectClass::Truck, f32::NAN),
        ];

        let p = filter.partition(&dets);
        assert_eq!(p.vehicles, vec![dets[0]]);
        assert_eq!(p.riders, vec![dets[2]]);
        assert_eq!(p.traffic_lights, vec![dets[3]]);
    }

    #[test]
    fn replay_reads_bare_and_full_lines() {
        let input = "\
# recorded at junction 4
0:[{\"x\":50,\"y\":50,\"w\":20,\"h\":10,\"p\":0.9,\"c\":2}]

500000:{\"detections\":[],\"light_color\":\"red\",\"signals\":{\"stop_line\":{\"y\":240}}}
";
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let frames: Vec<_> = ReplayDetector::new(input.as_bytes(), start, (640, 480))
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].index, 0);
        assert_eq!(frames[0].detections[0].bbox.as_slice(), &[40.0, 45.0, 60.0, 55.0]);
        assert_eq!(frames[0].detections[0].class, ObjectClass::Car);

        assert_eq!(frames[1].index, 1);
        assert_eq!(frames[1].timestamp, 0.5);
        assert_eq!(frames[1].captured_at, start + Duration::milliseconds(500));
        assert_eq!(frames[1].light_color, Some(SignalColor::Red));
        assert_eq!(frames[1].signals.stop_line.unwrap().y, 240.0);
    }

    #[test]
    fn replay_reports_line_of_malformed_input() {
        let input = "0:[]\nnot a frame\n";
        let mut replay = ReplayDetector::new(input.as_bytes(), Utc::now(), (640, 480));

        assert!(replay.next().unwrap().is_ok());
        match replay.next().unwrap() {
            Err(Error::Replay { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other.map(|f| f.index)),
        }
        assert!(replay.next().is_none());
    }
}
