use chrono::Utc;
use image::RgbImage;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::annotate::annotate_frame;
use super::events::{ClassifiedEvent, StatisticsAggregator, StatsSnapshot, ViolationStateMachine};
use super::frame_context::{FrameContext, FrameMetrics};
use super::processing_step::ProcessingPipeline;
use super::tracking::{IdentityResolver, SpatialAssociator, ZoneDwellTracker};
use crate::common::FrameResult;
use crate::config::Configuration;
use crate::detection::{Detection, FrameDetections};
use crate::error::AppError;

/// All tracking state that must survive from one frame to the next.
///
/// Owned by exactly one detection lane and handed by `&mut` to each
/// processing step; nothing here is shared or locked.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub identities: IdentityResolver,
    pub associator: SpatialAssociator,
    pub dwell: ZoneDwellTracker,
    pub events: ViolationStateMachine,
    pub statistics: StatisticsAggregator,
    pub identity_ttl_frames: Option<u64>,
    pub last_frame_id: Option<u64>,
}

impl SessionState {
    pub fn new(configuration: &Configuration) -> Self {
        Self {
            identities: IdentityResolver::new(configuration.tracking.reid_radius),
            associator: SpatialAssociator::new(configuration.tracking.max_association_distance),
            dwell: ZoneDwellTracker::new(configuration.regions()),
            events: ViolationStateMachine::new(configuration.events.clone()),
            statistics: StatisticsAggregator::new(),
            identity_ttl_frames: configuration.tracking.identity_ttl_frames,
            last_frame_id: None,
        }
    }
}

/// One monitoring session: the session state plus the step chain that
/// advances it.
pub struct DetectionSession {
    session_id: Uuid,
    state: SessionState,
    pipeline: ProcessingPipeline,
    last_metrics: FrameMetrics,
}

impl DetectionSession {
    pub fn new(configuration: &Configuration) -> Self {
        Self::with_pipeline(configuration, ProcessingPipeline::standard())
    }

    pub fn with_pipeline(configuration: &Configuration, pipeline: ProcessingPipeline) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            state: SessionState::new(configuration),
            pipeline,
            last_metrics: FrameMetrics::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Step timings of the most recently processed frame.
    pub fn last_metrics(&self) -> &FrameMetrics {
        &self.last_metrics
    }

    pub fn last_frame_id(&self) -> Option<u64> {
        self.state.last_frame_id
    }

    /// Id for a frame the producer did not number.
    pub fn next_frame_id(&self) -> u64 {
        self.state.last_frame_id.map_or(1, |last| last + 1)
    }

    /// Advances the session by one frame.
    ///
    /// A frame id at or below the last processed id is a redelivery and is
    /// rejected with [`AppError::DuplicateFrame`] before any state is touched.
    #[instrument(skip(self, detections, image), fields(session = %self.session_id))]
    pub fn process(
        &mut self,
        frame_id: u64,
        detections: &[Detection],
        image: Option<RgbImage>,
    ) -> Result<FrameResult, AppError> {
        if let Some(last_frame_id) = self.state.last_frame_id {
            if frame_id <= last_frame_id {
                return Err(AppError::DuplicateFrame {
                    frame_id,
                    last_frame_id,
                });
            }
        }

        // Consumed even if a step fails, so a redelivery cannot apply the
        // same frame twice.
        self.state.last_frame_id = Some(frame_id);
        let mut context = FrameContext::new(frame_id, FrameDetections::from_detections(detections));
        self.pipeline.process(&mut self.state, &mut context)?;

        let is_violation = context.has_violation();
        let annotated_frame = image.map(|mut image| {
            annotate_frame(
                &mut image,
                self.state.dwell.regions(),
                &context.detections,
                is_violation,
            );
            Arc::new(image)
        });

        let processing_latency = context.metrics.finalize(context.processing_start);
        debug!(
            "Frame {} processed in {}us: {} workers, {} transitions, {} classified",
            frame_id,
            context.metrics.total_processing_duration_us,
            context.workers.len(),
            context.transitions.len(),
            context.classified.len()
        );
        self.last_metrics = context.metrics.clone();

        Ok(FrameResult {
            timestamp: Utc::now(),
            frame_id,
            is_violation,
            is_safe_pickup: context.has_safe_pickup(),
            labels: context.detections.labels.clone(),
            boxes: context.detections.boxes.clone(),
            messages: context.messages,
            classified: context.classified,
            annotated_frame,
            processing_latency,
        })
    }

    /// Closes every unprocessed event as abandoned. Abandoned events never
    /// move a counter, but their keys are recorded so a late redelivery
    /// cannot resurrect them.
    pub fn drain(&mut self) -> Vec<ClassifiedEvent> {
        let frame_id = self.state.last_frame_id.unwrap_or(0);
        let drained = self.state.events.drain(frame_id);
        for event in &drained {
            self.state.statistics.record(event.key(), event.classification);
        }
        drained
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.state.statistics.snapshot()
    }
}
