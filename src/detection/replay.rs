use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use super::Detection;
use crate::error::AppError;

/// The external object detector/tracker. Failures are reported as an empty
/// detection set, never as an error.
pub trait Detector: Send {
    fn detect(&mut self, frame_id: u64, image: &RgbImage) -> Vec<Detection>;

    fn name(&self) -> &'static str;
}

/// One line of a replay file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayEntry {
    pub frame_id: u64,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

/// Plays back recorded detector output keyed by frame id.
#[derive(Debug, Clone, Default)]
pub struct ReplayDetector {
    frames: HashMap<u64, Vec<Detection>>,
}

impl ReplayDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame(mut self, frame_id: u64, detections: Vec<Detection>) -> Self {
        self.insert(frame_id, detections);
        self
    }

    pub fn insert(&mut self, frame_id: u64, detections: Vec<Detection>) {
        self.frames.entry(frame_id).or_default().extend(detections);
    }

    /// Reads JSON lines of `{"frame_id": .., "detections": [..]}`. Blank
    /// lines are ignored.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, AppError> {
        let mut detector = Self::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ReplayEntry = serde_json::from_str(&line).map_err(|source| {
                AppError::Replay {
                    line: index + 1,
                    source,
                }
            })?;
            detector.insert(entry.frame_id, entry.detections);
        }
        Ok(detector)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let file = std::fs::File::open(path.as_ref())?;
        let detector = Self::from_reader(std::io::BufReader::new(file))?;
        tracing::info!(
            "Loaded {} replay frames from {}",
            detector.len(),
            path.as_ref().display()
        );
        Ok(detector)
    }

    /// Frame ids with recorded output, ascending.
    pub fn frame_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.frames.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, frame_id: u64, _image: &RgbImage) -> Vec<Detection> {
        self.frames.remove(&frame_id).unwrap_or_default()
    }

    fn name(&self) -> &'static str {
        "ReplayDetector"
    }
}
