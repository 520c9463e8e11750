pub mod association;
pub mod dwell;
pub mod identity;

pub use association::SpatialAssociator;
pub use dwell::{DwellTransition, Region, RoiId, ZoneDwell, ZoneDwellTracker};
pub use identity::{nearest_within, IdentityResolver, WorkerId, WorkerIdentity};
