pub mod association_step;
pub mod dwell_tracking_step;
pub mod event_evaluation_step;
pub mod identity_resolution_step;
pub mod statistics_step;

pub use association_step::AssociationStep;
pub use dwell_tracking_step::DwellTrackingStep;
pub use event_evaluation_step::EventEvaluationStep;
pub use identity_resolution_step::IdentityResolutionStep;
pub use statistics_step::StatisticsStep;
