pub mod common;
pub mod config;
pub mod coordinator;
pub mod dashboard;
pub mod detection;
pub mod error;
pub mod live_view;
pub mod pipeline;

pub use config::Configuration;
pub use coordinator::{Coordinator, CoordinatorBuilder, FrameSender, ShutdownReport};
pub use dashboard::{StatsBoard, Summary, SummaryQuery};
pub use error::{AppError, ConfigError, DecodeError, TransportError};
pub use pipeline::DetectionSession;
