use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::pipeline::frame_context::FrameMetrics;

// EWMA smoothing factor
const ALPHA: f32 = 0.1;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub duplicate_frames: u64,
    pub decode_failures: u64,
    pub pipeline_failures: u64,
    pub results_published: u64,
    pub records_written: u64,
    pub publish_failures: u64,
    pub side_effects_dropped: u64,
    pub live_frames_dropped: u64,
    pub live_frames_decoded: u64,

    // EWMA timings
    pub average_frame_time_us: f32,
    pub average_identity_us: f32,
    pub average_association_us: f32,
    pub average_dwell_us: f32,
    pub average_events_us: f32,
    pub average_publish_time_us: f32,

    // Max timings for bottleneck detection
    pub max_frame_time_us: u64,
    pub max_publish_time_us: u64,
}

/// Counters shared by the detection lane, the publish pool and the live
/// view. Cloning shares the same counters.
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    stats: Arc<Mutex<PipelineStats>>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_stats(&self) -> PipelineStats {
        self.lock().clone()
    }

    pub fn get_stats_shared(&self) -> Arc<Mutex<PipelineStats>> {
        Arc::clone(&self.stats)
    }

    // A panicking holder cannot leave the counters half-written, so a
    // poisoned lock is still safe to read.
    fn lock(&self) -> MutexGuard<'_, PipelineStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_ewma(current: f32, new_value: u64, alpha: f32) -> f32 {
        current * (1.0 - alpha) + new_value as f32 * alpha
    }

    pub fn on_frame_processed(&self, metrics: &FrameMetrics) {
        let mut stats = self.lock();
        stats.frames_processed += 1;
        stats.average_frame_time_us = Self::update_ewma(
            stats.average_frame_time_us,
            metrics.total_processing_duration_us,
            ALPHA,
        );
        stats.max_frame_time_us = stats
            .max_frame_time_us
            .max(metrics.total_processing_duration_us);
        stats.average_identity_us =
            Self::update_ewma(stats.average_identity_us, metrics.identity_resolution_us, ALPHA);
        stats.average_association_us =
            Self::update_ewma(stats.average_association_us, metrics.association_us, ALPHA);
        stats.average_dwell_us =
            Self::update_ewma(stats.average_dwell_us, metrics.dwell_tracking_us, ALPHA);
        stats.average_events_us =
            Self::update_ewma(stats.average_events_us, metrics.event_evaluation_us, ALPHA);
    }

    pub fn on_published(&self, elapsed: Duration) {
        let mut stats = self.lock();
        let elapsed_us = elapsed.as_micros() as u64;
        stats.results_published += 1;
        stats.average_publish_time_us =
            Self::update_ewma(stats.average_publish_time_us, elapsed_us, ALPHA);
        stats.max_publish_time_us = stats.max_publish_time_us.max(elapsed_us);
    }

    pub fn on_duplicate_frame(&self) {
        self.lock().duplicate_frames += 1;
    }

    pub fn on_decode_failure(&self) {
        self.lock().decode_failures += 1;
    }

    pub fn on_pipeline_failure(&self) {
        self.lock().pipeline_failures += 1;
    }

    pub fn on_record_written(&self) {
        self.lock().records_written += 1;
    }

    pub fn on_publish_failure(&self) {
        self.lock().publish_failures += 1;
    }

    pub fn on_side_effect_dropped(&self) {
        self.lock().side_effects_dropped += 1;
    }

    pub fn on_live_frame_dropped(&self) {
        self.lock().live_frames_dropped += 1;
    }

    pub fn on_live_frame_decoded(&self) {
        self.lock().live_frames_decoded += 1;
    }
}
