use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;

use crate::common::geometry::BBox;
use crate::detection::Label;
use crate::error::{DecodeError, TransportError};
use crate::pipeline::events::ClassifiedEvent;

/// A frame as delivered by the ingestion queue: an encoded image and,
/// optionally, the producer's sequence number.
#[derive(Debug, Clone)]
pub struct IngressFrame {
    pub frame_id: Option<u64>,
    pub payload: Vec<u8>,
}

impl IngressFrame {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            frame_id: None,
            payload,
        }
    }

    pub fn with_id(frame_id: u64, payload: Vec<u8>) -> Self {
        Self {
            frame_id: Some(frame_id),
            payload,
        }
    }
}

/// Output of the detection core for one frame. Self-describing so the
/// side-effect stage can complete frames in any order.
#[derive(Debug, Clone)]
pub struct FrameResult {
    pub timestamp: DateTime<Utc>,
    pub frame_id: u64,
    pub is_violation: bool,
    pub is_safe_pickup: bool,
    pub labels: Vec<Label>,
    pub boxes: Vec<BBox>,
    pub messages: Vec<String>,
    pub classified: Vec<ClassifiedEvent>,
    pub annotated_frame: Option<Arc<RgbImage>>,
    pub processing_latency: Duration,
}

impl FrameResult {
    /// Frames carrying a terminal violation or safe pickup are persisted.
    pub fn is_event_frame(&self) -> bool {
        self.is_violation || self.is_safe_pickup
    }
}

pub fn decode_image(frame_id: u64, payload: &[u8]) -> Result<RgbImage, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::Empty(frame_id));
    }
    image::load_from_memory(payload)
        .map(|image| image.to_rgb8())
        .map_err(|source| DecodeError::Image { frame_id, source })
}

pub fn encode_jpeg(frame_id: u64, image: &RgbImage, quality: u8) -> Result<Vec<u8>, TransportError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(image)
        .map_err(|e| TransportError::Encode {
            frame_id,
            reason: e.to_string(),
        })?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn result_with_image(image: RgbImage) -> FrameResult {
        FrameResult {
            timestamp: Utc::now(),
            frame_id: 1,
            is_violation: false,
            is_safe_pickup: false,
            labels: Vec::new(),
            boxes: Vec::new(),
            messages: Vec::new(),
            classified: Vec::new(),
            annotated_frame: Some(Arc::new(image)),
            processing_latency: Duration::ZERO,
        }
    }

    #[test]
    fn cloning_result_shares_image_buffer() {
        let r1 = result_with_image(RgbImage::from_pixel(16, 16, Rgb([1, 2, 3])));
        let r2 = r1.clone();
        assert!(Arc::ptr_eq(
            r1.annotated_frame.as_ref().unwrap(),
            r2.annotated_frame.as_ref().unwrap()
        ));
    }

    #[test]
    fn jpeg_encode_then_decode_keeps_dimensions() {
        let image = RgbImage::from_pixel(32, 24, Rgb([200, 10, 10]));
        let bytes = encode_jpeg(7, &image, 90).unwrap();
        let decoded = decode_image(7, &bytes).unwrap();
        assert_eq!(decoded.dimensions(), (32, 24));
    }

    #[test]
    fn corrupt_payload_is_a_decode_error() {
        assert!(matches!(decode_image(3, &[]), Err(DecodeError::Empty(3))));
        assert!(matches!(
            decode_image(4, b"definitely not an image"),
            Err(DecodeError::Image { frame_id: 4, .. })
        ));
    }
}
