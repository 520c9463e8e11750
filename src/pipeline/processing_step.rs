use super::frame_context::FrameContext;
use super::instrumented_step::Traced;
use super::session::SessionState;
use super::steps::{
    AssociationStep, DwellTrackingStep, EventEvaluationStep, IdentityResolutionStep,
    StatisticsStep,
};
use crate::error::AppError;

/// Chain of Responsibility pattern for the detection core.
///
/// Steps are synchronous and own no tracking state of their own; everything
/// that must survive the frame lives in the [`SessionState`] handed in by the
/// single owner of the session.
pub trait ProcessingStep: Send {
    fn process(
        &mut self,
        state: &mut SessionState,
        context: &mut FrameContext,
    ) -> Result<(), AppError>;
    fn name(&self) -> &'static str;
}

/// Processes frames through a chain of steps
pub struct ProcessingPipeline {
    steps: Vec<Box<dyn ProcessingStep>>,
}

impl ProcessingPipeline {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// identity -> association -> dwell -> events -> statistics
    pub fn standard() -> Self {
        Self::new()
            .add_step(Box::new(IdentityResolutionStep.traced("identity")))
            .add_step(Box::new(AssociationStep.traced("association")))
            .add_step(Box::new(DwellTrackingStep.traced("dwell")))
            .add_step(Box::new(EventEvaluationStep.traced("events")))
            .add_step(Box::new(StatisticsStep.traced("statistics")))
    }

    pub fn add_step(mut self, step: Box<dyn ProcessingStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn process(
        &mut self,
        state: &mut SessionState,
        context: &mut FrameContext,
    ) -> Result<(), AppError> {
        for step in &mut self.steps {
            tracing::trace!("Processing step: {}", step.name());
            step.process(state, context)?;
        }
        Ok(())
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Default for ProcessingPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::detection::FrameDetections;

    struct Failing;

    impl ProcessingStep for Failing {
        fn process(&mut self, _: &mut SessionState, _: &mut FrameContext) -> Result<(), AppError> {
            Err(AppError::Pipeline("boom".to_string()))
        }

        fn name(&self) -> &'static str {
            "Failing"
        }
    }

    struct Marker;

    impl ProcessingStep for Marker {
        fn process(&mut self, _: &mut SessionState, context: &mut FrameContext) -> Result<(), AppError> {
            context.messages.push("marker".to_string());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Marker"
        }
    }

    #[test]
    fn standard_chain_runs_in_order() {
        let pipeline = ProcessingPipeline::standard();
        assert_eq!(
            pipeline.step_names(),
            vec![
                "IdentityResolutionStep",
                "AssociationStep",
                "DwellTrackingStep",
                "EventEvaluationStep",
                "StatisticsStep"
            ]
        );
    }

    #[test]
    fn a_failing_step_stops_the_chain() {
        let mut state = SessionState::new(&Configuration::default());
        let mut context = FrameContext::new(1, FrameDetections::default());
        let mut pipeline = ProcessingPipeline::new()
            .add_step(Box::new(Failing))
            .add_step(Box::new(Marker));
        assert!(pipeline.process(&mut state, &mut context).is_err());
        assert!(context.messages.is_empty());
    }
}
