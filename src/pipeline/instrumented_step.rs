use std::time::Instant;
use tracing::{error, trace, trace_span};

use super::frame_context::FrameContext;
use super::processing_step::ProcessingStep;
use super::session::SessionState;
use crate::error::AppError;

/// Runs a step inside its own span and reports failures together with the
/// frame they happened on.
pub struct InstrumentedStep<S> {
    inner: S,
    label: &'static str,
}

impl<S: ProcessingStep> InstrumentedStep<S> {
    pub fn new(inner: S, label: &'static str) -> Self {
        Self { inner, label }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl<S: ProcessingStep> ProcessingStep for InstrumentedStep<S> {
    fn process(
        &mut self,
        state: &mut SessionState,
        context: &mut FrameContext,
    ) -> Result<(), AppError> {
        let frame_id = context.frame_id;
        let span = trace_span!("step", label = self.label, frame_id);
        let _entered = span.enter();

        let started = Instant::now();
        self.inner.process(state, context).inspect_err(|e| {
            error!(
                "Step '{}' failed on frame {} after {:?}: {}",
                self.label,
                frame_id,
                started.elapsed(),
                e
            )
        })?;
        trace!("Step '{}' took {:?}", self.label, started.elapsed());
        Ok(())
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

pub trait Traced: ProcessingStep + Sized {
    fn traced(self, label: &'static str) -> InstrumentedStep<Self> {
        InstrumentedStep::new(self, label)
    }
}

impl<S: ProcessingStep> Traced for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::detection::FrameDetections;

    struct Rejecting;

    impl ProcessingStep for Rejecting {
        fn process(&mut self, _: &mut SessionState, _: &mut FrameContext) -> Result<(), AppError> {
            Err(AppError::Invariant("rejected".to_string()))
        }

        fn name(&self) -> &'static str {
            "Rejecting"
        }
    }

    #[test]
    fn wrapper_keeps_the_inner_name_and_error() {
        let mut step = Rejecting.traced("reject");
        assert_eq!(step.name(), "Rejecting");
        assert_eq!(step.label(), "reject");

        let mut state = SessionState::new(&Configuration::default());
        let mut context = FrameContext::new(3, FrameDetections::default());
        assert!(matches!(
            step.process(&mut state, &mut context),
            Err(AppError::Invariant(_))
        ));
    }
}
