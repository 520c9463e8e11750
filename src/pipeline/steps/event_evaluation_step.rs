use std::time::Instant;

use crate::error::AppError;
use crate::pipeline::events::FrameEvidence;
use crate::pipeline::frame_context::{FrameContext, ProcessingStepType};
use crate::pipeline::processing_step::ProcessingStep;
use crate::pipeline::session::SessionState;

/// Feeds dwell transitions and frame evidence to the event state machine
pub struct EventEvaluationStep;

impl ProcessingStep for EventEvaluationStep {
    fn process(
        &mut self,
        state: &mut SessionState,
        context: &mut FrameContext,
    ) -> Result<(), AppError> {
        let step_start = Instant::now();

        for transition in &context.transitions {
            if let Some(outcome) = state.events.on_dwell(transition, context.frame_id) {
                context.opened.push((transition.dwell().worker_id, outcome));
            }
        }
        for dwell in state.dwell.active_dwells() {
            if let Some(outcome) = state.events.rearm(dwell, context.frame_id) {
                context.opened.push((dwell.worker_id, outcome));
            }
        }

        let evidence = FrameEvidence {
            worker_hands: &context.worker_hands,
            worker_scoopers: &context.worker_scoopers,
            pizzas: &context.detections.pizzas,
            unassigned_scoopers: &context.unassigned_scoopers,
        };
        context.classified = state.events.evaluate(context.frame_id, &evidence);

        for (worker_id, _) in &context.opened {
            if state.events.unprocessed_count(*worker_id) > 1 {
                return Err(AppError::Invariant(format!(
                    "worker {} holds more than one unprocessed event",
                    worker_id
                )));
            }
        }

        let duration = step_start.elapsed().as_micros() as u64;
        context
            .metrics
            .record_duration(ProcessingStepType::EventEvaluation, duration);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "EventEvaluationStep"
    }
}
