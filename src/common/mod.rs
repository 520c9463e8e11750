pub mod frame;
pub mod geometry;

pub use frame::{decode_image, encode_jpeg, FrameResult, IngressFrame};
pub use geometry::{BBox, Point};
