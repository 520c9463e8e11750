use indexmap::IndexMap;
use std::time::{Duration, Instant};

use crate::common::BBox;
use crate::detection::FrameDetections;
use crate::pipeline::events::{Classification, ClassifiedEvent, OpenOutcome};
use crate::pipeline::tracking::{DwellTransition, WorkerId};

/// Context object that flows through the processing steps.
/// Holds everything derived for a single frame; nothing in here outlives it.
#[derive(Debug, Clone)]
pub struct FrameContext {
    pub frame_id: u64,
    pub detections: FrameDetections,
    /// Visible workers and their person boxes, in detection order.
    pub workers: Vec<(WorkerId, BBox)>,
    pub worker_hands: IndexMap<WorkerId, Vec<BBox>>,
    pub worker_scoopers: IndexMap<WorkerId, Vec<BBox>>,
    pub unassigned_hands: usize,
    /// Scoopers no visible worker could claim.
    pub unassigned_scoopers: Vec<BBox>,
    pub transitions: Vec<DwellTransition>,
    pub opened: Vec<(WorkerId, OpenOutcome)>,
    pub classified: Vec<ClassifiedEvent>,
    /// Classifications applied to the statistics for the first time this frame.
    pub applied: Vec<ClassifiedEvent>,
    pub messages: Vec<String>,
    pub metrics: FrameMetrics,
    pub processing_start: Instant,
}

impl FrameContext {
    pub fn new(frame_id: u64, detections: FrameDetections) -> Self {
        Self {
            frame_id,
            detections,
            workers: Vec::new(),
            worker_hands: IndexMap::new(),
            worker_scoopers: IndexMap::new(),
            unassigned_hands: 0,
            unassigned_scoopers: Vec::new(),
            transitions: Vec::new(),
            opened: Vec::new(),
            classified: Vec::new(),
            applied: Vec::new(),
            messages: Vec::new(),
            metrics: FrameMetrics::new(),
            processing_start: Instant::now(),
        }
    }

    pub fn has_violation(&self) -> bool {
        self.applied
            .iter()
            .any(|c| c.classification == Classification::Violation)
    }

    pub fn has_safe_pickup(&self) -> bool {
        self.applied
            .iter()
            .any(|c| c.classification == Classification::SafePickup)
    }
}

/// Metrics collected during frame processing
#[derive(Debug, Clone, Default)]
pub struct FrameMetrics {
    pub identity_resolution_us: u64,
    pub association_us: u64,
    pub dwell_tracking_us: u64,
    pub event_evaluation_us: u64,
    pub statistics_us: u64,
    pub total_processing_duration_us: u64,
}

impl FrameMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_duration(&mut self, step: ProcessingStepType, duration_us: u64) {
        match step {
            ProcessingStepType::IdentityResolution => self.identity_resolution_us = duration_us,
            ProcessingStepType::Association => self.association_us = duration_us,
            ProcessingStepType::DwellTracking => self.dwell_tracking_us = duration_us,
            ProcessingStepType::EventEvaluation => self.event_evaluation_us = duration_us,
            ProcessingStepType::Statistics => self.statistics_us = duration_us,
        }
    }

    pub fn finalize(&mut self, start_time: Instant) -> Duration {
        let elapsed = start_time.elapsed();
        self.total_processing_duration_us = elapsed.as_micros() as u64;
        elapsed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingStepType {
    IdentityResolution,
    Association,
    DwellTracking,
    EventEvaluation,
    Statistics,
}

impl ProcessingStepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStepType::IdentityResolution => "identity_resolution",
            ProcessingStepType::Association => "association",
            ProcessingStepType::DwellTracking => "dwell_tracking",
            ProcessingStepType::EventEvaluation => "event_evaluation",
            ProcessingStepType::Statistics => "statistics",
        }
    }
}
