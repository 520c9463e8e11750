pub mod statistics;
pub mod violation;

pub use statistics::{StatisticsAggregator, StatsSnapshot, WorkerStats};
pub use violation::{
    Classification, ClassifiedEvent, EventKey, EventPhase, FrameEvidence, OpenOutcome,
    ViolationEvent, ViolationStateMachine,
};
