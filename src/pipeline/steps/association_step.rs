use std::time::Instant;

use crate::error::AppError;
use crate::pipeline::frame_context::{FrameContext, ProcessingStepType};
use crate::pipeline::processing_step::ProcessingStep;
use crate::pipeline::session::SessionState;

/// Attributes hands and scoopers to the nearest visible worker
pub struct AssociationStep;

impl ProcessingStep for AssociationStep {
    fn process(
        &mut self,
        state: &mut SessionState,
        context: &mut FrameContext,
    ) -> Result<(), AppError> {
        let step_start = Instant::now();

        for hand in &context.detections.hands {
            match state.associator.assign(hand, &context.workers) {
                Some(worker_id) => context.worker_hands.entry(worker_id).or_default().push(*hand),
                None => context.unassigned_hands += 1,
            }
        }
        for scooper in &context.detections.scoopers {
            match state.associator.assign(scooper, &context.workers) {
                Some(worker_id) => context
                    .worker_scoopers
                    .entry(worker_id)
                    .or_default()
                    .push(*scooper),
                None => context.unassigned_scoopers.push(*scooper),
            }
        }

        let duration = step_start.elapsed().as_micros() as u64;
        context
            .metrics
            .record_duration(ProcessingStepType::Association, duration);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "AssociationStep"
    }
}
