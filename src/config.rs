use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::common::BBox;
use crate::error::ConfigError;
use crate::pipeline::tracking::{Region, RoiId};

const CONFIG_PATH_ENV: &str = "HYGIENE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "hygiene.toml";
const ENV_PREFIX: &str = "HYGIENE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub regions: Vec<RegionConfig>,
    pub tracking: TrackingSettings,
    pub events: EventSettings,
    pub pipeline: PipelineSettings,
    pub live_view: LiveViewSettings,
    pub replay: ReplaySettings,
    pub summary_cache_ms: u64,
    pub records_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub roi_id: RoiId,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl RegionConfig {
    pub fn new(roi_id: RoiId, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            roi_id,
            x1,
            y1,
            x2,
            y2,
        }
    }

    pub fn to_region(&self) -> Region {
        Region::new(self.roi_id, BBox::new(self.x1, self.y1, self.x2, self.y2))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    pub reid_radius: f32,
    pub max_association_distance: f32,
    /// Evict identities unseen for this many frames. `None` keeps them for
    /// the lifetime of the session.
    pub identity_ttl_frames: Option<u64>,
}

/// Which dwell transition opens an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerPolicy {
    /// Open on zone entry, classify `window_frames` after entry.
    #[default]
    Entry,
    /// Open on zone exit, classify `post_exit_grace_frames` after exit.
    Exit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    pub trigger: TriggerPolicy,
    pub window_frames: u64,
    pub post_exit_grace_frames: u64,
    pub cooldown_frames: u64,
    pub iou_epsilon: f32,
    pub fps: f32,
}

impl EventSettings {
    /// Evaluation window for the configured trigger policy.
    pub fn evaluation_window(&self) -> u64 {
        match self.trigger {
            TriggerPolicy::Entry => self.window_frames,
            TriggerPolicy::Exit => self.post_exit_grace_frames,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub ingest_credit: usize,
    pub publish_workers: usize,
    pub publish_queue_capacity: usize,
    pub publish_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    pub result_queue_capacity: usize,
    pub jpeg_quality: u8,
}

impl PipelineSettings {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveViewSettings {
    pub buffer_capacity: usize,
    pub decode_workers: usize,
    pub recv_timeout_ms: u64,
    pub stale_grace_ms: u64,
}

impl LiveViewSettings {
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn stale_grace(&self) -> Duration {
        Duration::from_millis(self.stale_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaySettings {
    pub path: Option<PathBuf>,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            regions: vec![
                RegionConfig::new(0, 480.0, 270.0, 525.0, 320.0),
                RegionConfig::new(1, 460.0, 317.0, 515.0, 350.0),
                RegionConfig::new(2, 460.0, 350.0, 510.0, 400.0),
            ],
            tracking: TrackingSettings::default(),
            events: EventSettings::default(),
            pipeline: PipelineSettings::default(),
            live_view: LiveViewSettings::default(),
            replay: ReplaySettings::default(),
            summary_cache_ms: 1000,
            records_path: None,
        }
    }
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            reid_radius: 150.0,
            max_association_distance: 300.0,
            identity_ttl_frames: None,
        }
    }
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            trigger: TriggerPolicy::Entry,
            window_frames: 50,
            post_exit_grace_frames: 90, // 3 seconds @ 30fps
            cooldown_frames: 90,
            iou_epsilon: 1e-4,
            fps: 30.0,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            ingest_credit: 1,
            publish_workers: 3,
            publish_queue_capacity: 64,
            publish_timeout_ms: 2000,
            shutdown_grace_ms: 1000,
            result_queue_capacity: 256,
            jpeg_quality: 90,
        }
    }
}

impl Default for LiveViewSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: 60,
            decode_workers: 3,
            recv_timeout_ms: 5000,
            stale_grace_ms: 500,
        }
    }
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            path: None,
            frame_width: 640,
            frame_height: 480,
        }
    }
}

impl Configuration {
    /// Defaults, overlaid by the TOML file named in `HYGIENE_CONFIG` (or
    /// `hygiene.toml` when present), overlaid by `HYGIENE__*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        let required = path.is_some();
        let path = path.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let configuration: Configuration = config::Config::builder()
            .add_source(config::File::with_name(&path).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.regions.is_empty() {
            return Err(ConfigError::NoRegions);
        }
        let mut seen = HashSet::new();
        for region in &self.regions {
            let rect = region.to_region().rect;
            if !rect.is_valid() || rect.area() <= 0.0 {
                return Err(ConfigError::InvalidRegion(region.roi_id));
            }
            if !seen.insert(region.roi_id) {
                return Err(ConfigError::DuplicateRegion(region.roi_id));
            }
        }

        positive("tracking.reid_radius", self.tracking.reid_radius)?;
        positive(
            "tracking.max_association_distance",
            self.tracking.max_association_distance,
        )?;
        positive("events.fps", self.events.fps)?;
        if !(0.0..1.0).contains(&self.events.iou_epsilon) {
            return Err(ConfigError::InvalidThreshold {
                name: "events.iou_epsilon",
                value: self.events.iou_epsilon as f64,
            });
        }
        if self.events.evaluation_window() == 0 {
            return Err(ConfigError::ZeroSized("events evaluation window"));
        }
        if self.pipeline.jpeg_quality == 0 || self.pipeline.jpeg_quality > 100 {
            return Err(ConfigError::InvalidThreshold {
                name: "pipeline.jpeg_quality",
                value: self.pipeline.jpeg_quality as f64,
            });
        }

        for (name, value) in [
            ("pipeline.ingest_credit", self.pipeline.ingest_credit),
            ("pipeline.publish_workers", self.pipeline.publish_workers),
            (
                "pipeline.publish_queue_capacity",
                self.pipeline.publish_queue_capacity,
            ),
            (
                "pipeline.result_queue_capacity",
                self.pipeline.result_queue_capacity,
            ),
            ("live_view.buffer_capacity", self.live_view.buffer_capacity),
            ("live_view.decode_workers", self.live_view.decode_workers),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroSized(name));
            }
        }
        if self.pipeline.publish_timeout_ms == 0 {
            return Err(ConfigError::ZeroSized("pipeline.publish_timeout_ms"));
        }
        Ok(())
    }

    pub fn regions(&self) -> Vec<Region> {
        self.regions.iter().map(RegionConfig::to_region).collect()
    }

    pub fn summary_cache_window(&self) -> Duration {
        Duration::from_millis(self.summary_cache_ms)
    }
}

fn positive(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold {
            name,
            value: value as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let configuration = Configuration::default();
        configuration.validate().unwrap();
        assert_eq!(configuration.regions().len(), 3);
        assert_eq!(configuration.pipeline.ingest_credit, 1);
        assert_eq!(configuration.pipeline.publish_workers, 3);
        assert_eq!(configuration.live_view.buffer_capacity, 60);
    }

    #[test]
    fn missing_regions_are_fatal() {
        let configuration = Configuration {
            regions: Vec::new(),
            ..Configuration::default()
        };
        assert!(matches!(configuration.validate(), Err(ConfigError::NoRegions)));
    }

    #[test]
    fn degenerate_and_duplicate_regions_are_rejected() {
        let mut configuration = Configuration::default();
        configuration.regions.push(RegionConfig::new(7, 10.0, 10.0, 10.0, 20.0));
        assert!(matches!(
            configuration.validate(),
            Err(ConfigError::InvalidRegion(7))
        ));

        let mut configuration = Configuration::default();
        configuration.regions.push(RegionConfig::new(0, 0.0, 0.0, 5.0, 5.0));
        assert!(matches!(
            configuration.validate(),
            Err(ConfigError::DuplicateRegion(0))
        ));
    }

    #[test]
    fn invalid_thresholds_are_rejected() {
        let mut configuration = Configuration::default();
        configuration.tracking.reid_radius = -1.0;
        assert!(matches!(
            configuration.validate(),
            Err(ConfigError::InvalidThreshold { name: "tracking.reid_radius", .. })
        ));

        let mut configuration = Configuration::default();
        configuration.events.iou_epsilon = 1.5;
        assert!(configuration.validate().is_err());

        let mut configuration = Configuration::default();
        configuration.pipeline.publish_workers = 0;
        assert!(matches!(
            configuration.validate(),
            Err(ConfigError::ZeroSized("pipeline.publish_workers"))
        ));
    }

    #[test]
    fn window_follows_trigger_policy() {
        let mut events = EventSettings::default();
        assert_eq!(events.evaluation_window(), 50);
        events.trigger = TriggerPolicy::Exit;
        assert_eq!(events.evaluation_window(), 90);
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let toml = r#"
            [events]
            trigger = "exit"
            window_frames = 40

            [[regions]]
            roi_id = 5
            x1 = 0.0
            y1 = 0.0
            x2 = 10.0
            y2 = 10.0
        "#;
        let configuration: Configuration = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(configuration.events.trigger, TriggerPolicy::Exit);
        assert_eq!(configuration.events.window_frames, 40);
        assert_eq!(configuration.events.cooldown_frames, 90);
        assert_eq!(configuration.regions.len(), 1);
        assert_eq!(configuration.tracking.reid_radius, 150.0);
        configuration.validate().unwrap();
    }
}
