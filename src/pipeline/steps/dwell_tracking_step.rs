use std::time::Instant;
use tracing::debug;

use crate::error::AppError;
use crate::pipeline::frame_context::{FrameContext, ProcessingStepType};
use crate::pipeline::processing_step::ProcessingStep;
use crate::pipeline::session::SessionState;
use crate::pipeline::tracking::DwellTransition;

/// Opens and closes zone dwells from the worker-attributed hands
pub struct DwellTrackingStep;

impl ProcessingStep for DwellTrackingStep {
    fn process(
        &mut self,
        state: &mut SessionState,
        context: &mut FrameContext,
    ) -> Result<(), AppError> {
        let step_start = Instant::now();

        context.transitions = state.dwell.update(context.frame_id, &context.worker_hands);
        for transition in &context.transitions {
            match transition {
                DwellTransition::Entered(dwell) => debug!(
                    "Worker {} entered C{} at frame {}",
                    dwell.worker_id, dwell.roi_id, dwell.start_frame
                ),
                DwellTransition::Exited { dwell, end_frame } => debug!(
                    "Worker {} left C{} at frame {}",
                    dwell.worker_id, dwell.roi_id, end_frame
                ),
            }
        }

        let duration = step_start.elapsed().as_micros() as u64;
        context
            .metrics
            .record_duration(ProcessingStepType::DwellTracking, duration);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DwellTrackingStep"
    }
}
