use thiserror::Error;

use crate::pipeline::tracking::RoiId;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration Error: {0}")]
    Config(#[from] ConfigError),
    #[error("Transport Error: {0}")]
    Transport(#[from] TransportError),
    #[error("Decode Error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Frame {frame_id} already processed (last processed frame {last_frame_id})")]
    DuplicateFrame { frame_id: u64, last_frame_id: u64 },
    #[error("State invariant violated: {0}")]
    Invariant(String),
    #[error("Failed to read replay line {line}: {source}")]
    Replay {
        line: usize,
        source: serde_json::Error,
    },
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Pipeline Error: {0}")]
    Pipeline(String),
}

// Configuration problems are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No container regions configured")]
    NoRegions,
    #[error("Region C{0} has a degenerate rectangle")]
    InvalidRegion(RoiId),
    #[error("Region C{0} is defined more than once")]
    DuplicateRegion(RoiId),
    #[error("Invalid value {value} for {name}")]
    InvalidThreshold { name: &'static str, value: f64 },
    #[error("{0} must be greater than zero")]
    ZeroSized(&'static str),
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

// Broker, store and encoding failures on the side-effect path.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to encode frame {frame_id}: {reason}")]
    Encode { frame_id: u64, reason: String },
    #[error("Result queue closed")]
    QueueClosed,
    #[error("Timed out publishing frame {0}")]
    Timeout(u64),
    #[error("Failed to write record for frame {frame_id}: {source}")]
    Sink {
        frame_id: u64,
        source: std::io::Error,
    },
    #[error("Failed to serialize record for frame {frame_id}: {source}")]
    Serialize {
        frame_id: u64,
        source: serde_json::Error,
    },
    #[error("Side-effect task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Frame {0} has an empty payload")]
    Empty(u64),
    #[error("Failed to decode frame {frame_id}: {source}")]
    Image {
        frame_id: u64,
        source: image::ImageError,
    },
}
