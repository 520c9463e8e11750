use serde::{Deserialize, Serialize};

use crate::common::BBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Hand,
    Scooper,
    Pizza,
    Person,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Hand => "hand",
            Label::Scooper => "scooper",
            Label::Pizza => "pizza",
            Label::Person => "person",
        }
    }
}

/// One labeled box from the external detector. Only `person` boxes carry a
/// tracker identifier, and even those may not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: Label,
    pub bbox: BBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u64>,
}

impl Detection {
    pub fn new(label: Label, bbox: BBox) -> Self {
        Self {
            label,
            bbox,
            track_id: None,
        }
    }

    pub fn with_track_id(mut self, track_id: u64) -> Self {
        self.track_id = Some(track_id);
        self
    }

    pub fn person(track_id: u64, bbox: BBox) -> Self {
        Self::new(Label::Person, bbox).with_track_id(track_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedPerson {
    pub track_id: u64,
    pub bbox: BBox,
}

/// A frame's detections split by label. Boxes with invalid geometry are
/// dropped here so downstream evidence checks never see them.
#[derive(Debug, Clone, Default)]
pub struct FrameDetections {
    pub hands: Vec<BBox>,
    pub scoopers: Vec<BBox>,
    pub pizzas: Vec<BBox>,
    pub persons: Vec<TrackedPerson>,
    pub untracked_persons: Vec<BBox>,
    pub labels: Vec<Label>,
    pub boxes: Vec<BBox>,
}

impl FrameDetections {
    pub fn from_detections(detections: &[Detection]) -> Self {
        let mut grouped = Self::default();
        for detection in detections {
            if !detection.bbox.is_valid() {
                tracing::debug!(
                    "Dropping malformed {} box {:?}",
                    detection.label.as_str(),
                    detection.bbox
                );
                continue;
            }
            grouped.labels.push(detection.label);
            grouped.boxes.push(detection.bbox);
            match (detection.label, detection.track_id) {
                (Label::Hand, _) => grouped.hands.push(detection.bbox),
                (Label::Scooper, _) => grouped.scoopers.push(detection.bbox),
                (Label::Pizza, _) => grouped.pizzas.push(detection.bbox),
                (Label::Person, Some(track_id)) => grouped.persons.push(TrackedPerson {
                    track_id,
                    bbox: detection.bbox,
                }),
                (Label::Person, None) => grouped.untracked_persons.push(detection.bbox),
            }
        }
        grouped
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
