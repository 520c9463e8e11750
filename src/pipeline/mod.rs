pub mod annotate;
pub mod events;
pub mod frame_context;
pub mod instrumented_step;
pub mod processing_step;
pub mod services;
pub mod session;
pub mod steps;
pub mod tracking;

pub use events::{Classification, ClassifiedEvent, EventKey, StatsSnapshot, WorkerStats};
pub use frame_context::{FrameContext, FrameMetrics, ProcessingStepType};
pub use processing_step::{ProcessingPipeline, ProcessingStep};
pub use session::{DetectionSession, SessionState};
