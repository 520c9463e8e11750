use chrono::{DateTime, Utc};
use image::RgbImage;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::Notify;

/// A decoded frame ready for display. The image is never mutated after
/// decoding; a newer frame replaces the whole value.
#[derive(Debug, Clone)]
pub struct LiveFrame {
    pub frame_id: u64,
    pub timestamp: DateTime<Utc>,
    pub is_violation: bool,
    pub image: Arc<RgbImage>,
    pub decoded_at: Instant,
}

#[derive(Debug, Default)]
struct Slot {
    frame: Mutex<Option<LiveFrame>>,
    updated: Notify,
}

/// Single shared "most recent frame" slot.
///
/// Decode workers may finish out of order; a frame older than the one
/// already held is discarded so the view never steps backwards.
#[derive(Debug, Clone, Default)]
pub struct LatestFrame {
    slot: Arc<Slot>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<LiveFrame>> {
        self.slot.frame.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `false` when a newer frame is already held.
    pub fn store(&self, frame: LiveFrame) -> bool {
        {
            let mut current = self.lock();
            if let Some(held) = current.as_ref() {
                if held.frame_id > frame.frame_id {
                    return false;
                }
            }
            *current = Some(frame);
        }
        self.slot.updated.notify_waiters();
        true
    }

    /// Owned copy of the current value, or `None` before the first decode.
    pub fn snapshot(&self) -> Option<LiveFrame> {
        self.lock().clone()
    }

    pub fn frame_id(&self) -> Option<u64> {
        self.lock().as_ref().map(|frame| frame.frame_id)
    }

    pub(crate) fn notify(&self) -> &Notify {
        &self.slot.updated
    }
}
