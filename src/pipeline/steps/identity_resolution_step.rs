use std::time::Instant;
use tracing::debug;

use crate::common::Point;
use crate::error::AppError;
use crate::pipeline::frame_context::{FrameContext, ProcessingStepType};
use crate::pipeline::processing_step::ProcessingStep;
use crate::pipeline::session::SessionState;

/// Maps this frame's tracked persons onto stable worker ids
pub struct IdentityResolutionStep;

impl ProcessingStep for IdentityResolutionStep {
    fn process(
        &mut self,
        state: &mut SessionState,
        context: &mut FrameContext,
    ) -> Result<(), AppError> {
        let step_start = Instant::now();

        let tracks: Vec<(u64, Point)> = context
            .detections
            .persons
            .iter()
            .map(|person| (person.track_id, person.bbox.center()))
            .collect();
        let worker_ids = state.identities.resolve_frame(&tracks, context.frame_id);
        context.workers = worker_ids
            .into_iter()
            .zip(context.detections.persons.iter().map(|person| person.bbox))
            .collect();

        if !context.detections.untracked_persons.is_empty() {
            debug!(
                "Frame {}: ignoring {} person boxes without a track id",
                context.frame_id,
                context.detections.untracked_persons.len()
            );
        }

        // Workers visible this frame were just touched, so eviction only
        // ever hits workers that are out of view.
        if let Some(ttl) = state.identity_ttl_frames {
            state.identities.evict_stale(context.frame_id, ttl);
        }

        let duration = step_start.elapsed().as_micros() as u64;
        context
            .metrics
            .record_duration(ProcessingStepType::IdentityResolution, duration);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "IdentityResolutionStep"
    }
}
