use std::time::Instant;
use tracing::info;

use crate::error::AppError;
use crate::pipeline::frame_context::{FrameContext, ProcessingStepType};
use crate::pipeline::processing_step::ProcessingStep;
use crate::pipeline::session::SessionState;

/// Applies terminal classifications to the counters, once per event key
pub struct StatisticsStep;

impl ProcessingStep for StatisticsStep {
    fn process(
        &mut self,
        state: &mut SessionState,
        context: &mut FrameContext,
    ) -> Result<(), AppError> {
        let step_start = Instant::now();
        let fps = state.events.settings().fps;

        for classified in &context.classified {
            if !state
                .statistics
                .record(classified.key(), classified.classification)
            {
                continue;
            }
            if let Some(message) = classified.message(fps) {
                info!("{}", message);
                context.messages.push(message);
            }
            context.applied.push(classified.clone());
        }

        let duration = step_start.elapsed().as_micros() as u64;
        context
            .metrics
            .record_duration(ProcessingStepType::Statistics, duration);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "StatisticsStep"
    }
}
