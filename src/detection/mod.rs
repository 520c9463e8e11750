pub mod replay;
pub mod types;

pub use replay::{Detector, ReplayDetector, ReplayEntry};
pub use types::{Detection, FrameDetections, Label, TrackedPerson};
