//! Session configuration, tracker variants and validation

use crate::error::{Result, TrackingError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Which member of an overlapping pair survives a dedup pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupTieBreak {
    /// Higher confidence wins; equal confidence keeps the lower id
    #[default]
    KeepHigherConfidence,
    /// Earlier `created_frame` wins
    KeepOlderTracker,
    /// Larger box area wins
    KeepLargerBbox,
}

impl FromStr for DedupTieBreak {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "keep_higher_confidence" | "confidence" => Ok(Self::KeepHigherConfidence),
            "keep_older_tracker" | "older" => Ok(Self::KeepOlderTracker),
            "keep_larger_bbox" | "larger" => Ok(Self::KeepLargerBbox),
            other => Err(TrackingError::config(format!(
                "unknown dedup tie-break policy '{}'",
                other
            ))),
        }
    }
}

/// Single-object tracker flavour, chosen once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TrackerVariant {
    /// Cheapest per-frame update
    Fast,
    #[default]
    Balanced,
    /// Slowest, follows appearance changes best
    Accurate,
}

impl TrackerVariant {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::Accurate => "accurate",
        }
    }

    pub fn all() -> [Self; 3] {
        [Self::Fast, Self::Balanced, Self::Accurate]
    }
}

impl FromStr for TrackerVariant {
    type Err = TrackingError;

    /// Parse from string (case-insensitive). Classic tracker names map onto variants.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fast" | "kcf" => Ok(Self::Fast),
            "balanced" | "mil" => Ok(Self::Balanced),
            "accurate" | "csrt" => Ok(Self::Accurate),
            other => Err(TrackingError::UnknownTracker(other.to_string())),
        }
    }
}

impl TryFrom<String> for TrackerVariant {
    type Error = TrackingError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TrackerVariant> for String {
    fn from(value: TrackerVariant) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for TrackerVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable configuration of one tracking session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// IoU above which a new detection is considered a duplicate of a live track
    pub iou_threshold: f32,
    /// Intersection over smaller area above which two boxes are duplicates
    pub overlap_threshold: f32,
    /// IoU above which raw detections suppress each other before fusion
    pub nms_threshold: f32,
    /// IoU trigger for the dedup pass; `iou_threshold` when set to null
    pub dedup_iou_threshold: Option<f32>,
    /// Minimum box width and height in pixels
    pub min_bbox_size: f32,
    /// Consecutive failed updates tolerated before a track is removed
    pub max_lost_frames: u32,
    /// Multiplicative confidence decay on a successful update
    pub confidence_decay_success: f32,
    /// Multiplicative confidence decay on a failed update
    pub confidence_decay_failure: f32,
    /// Pixels around the frame in which a box still counts as inside
    pub boundary_margin: f32,
    pub boundary_check: bool,
    /// 1-based frame indices that force a detection round
    pub detection_frames: BTreeSet<u64>,
    pub min_detection_interval: u64,
    /// Hard ceiling on detection calls per session
    pub max_detection_calls: u32,
    pub dedup_interval_frames: u64,
    pub auto_dedup: bool,
    pub dedup_tie_break: DedupTieBreak,
    /// Confidence floor passed to the detector and applied before fusion
    pub confidence_threshold: f32,
    pub detection_timeout_ms: u64,
    /// Hard frame cap, for live sources that never end
    pub max_frames: Option<u64>,
    pub tracker: TrackerVariant,
    /// Frames between progress log lines
    pub progress_interval_frames: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            overlap_threshold: 0.4,
            nms_threshold: 0.3,
            dedup_iou_threshold: Some(0.05),
            min_bbox_size: 5.0,
            max_lost_frames: 30,
            confidence_decay_success: 0.995,
            confidence_decay_failure: 0.9,
            boundary_margin: 20.0,
            boundary_check: true,
            detection_frames: [1, 60, 150, 300].into_iter().collect(),
            min_detection_interval: 90,
            max_detection_calls: 4,
            dedup_interval_frames: 30,
            auto_dedup: true,
            dedup_tie_break: DedupTieBreak::default(),
            confidence_threshold: 0.5,
            detection_timeout_ms: 120_000,
            max_frames: None,
            tracker: TrackerVariant::default(),
            progress_interval_frames: 100,
        }
    }
}

impl SessionConfig {
    /// Defaults tuned for a tracker variant
    pub fn for_variant(variant: TrackerVariant) -> Self {
        let (max_lost_frames, confidence_decay_success) = match variant {
            TrackerVariant::Fast => (25, 0.95),
            TrackerVariant::Balanced => (30, 0.95),
            TrackerVariant::Accurate => (20, 0.98),
        };
        Self {
            tracker: variant,
            max_lost_frames,
            confidence_decay_success,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn dedup_iou(&self) -> f32 {
        self.dedup_iou_threshold.unwrap_or(self.iou_threshold)
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_millis(self.detection_timeout_ms)
    }

    /// Check every field once, before any frame is processed
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, value: f32| -> Result<()> {
            if value.is_finite() && value > 0.0 && value <= 1.0 {
                Ok(())
            } else {
                Err(TrackingError::config(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )))
            }
        };

        unit("iou_threshold", self.iou_threshold)?;
        unit("overlap_threshold", self.overlap_threshold)?;
        unit("nms_threshold", self.nms_threshold)?;
        if let Some(threshold) = self.dedup_iou_threshold {
            unit("dedup_iou_threshold", threshold)?;
        }
        unit("confidence_decay_success", self.confidence_decay_success)?;
        unit("confidence_decay_failure", self.confidence_decay_failure)?;
        unit("confidence_threshold", self.confidence_threshold)?;

        if !self.min_bbox_size.is_finite() || self.min_bbox_size < 0.0 {
            return Err(TrackingError::config(format!(
                "min_bbox_size must be a non-negative number, got {}",
                self.min_bbox_size
            )));
        }
        if !self.boundary_margin.is_finite() || self.boundary_margin < 0.0 {
            return Err(TrackingError::config(format!(
                "boundary_margin must be a non-negative number, got {}",
                self.boundary_margin
            )));
        }
        if self.max_detection_calls == 0 {
            return Err(TrackingError::config("max_detection_calls must be at least 1"));
        }
        if self.dedup_interval_frames == 0 {
            return Err(TrackingError::config("dedup_interval_frames must be at least 1"));
        }
        if self.detection_frames.contains(&0) {
            return Err(TrackingError::config(
                "detection_frames are 1-based; frame 0 does not exist",
            ));
        }
        if self.detection_timeout_ms == 0 {
            return Err(TrackingError::config("detection_timeout_ms must be positive"));
        }
        if self.max_frames == Some(0) {
            return Err(TrackingError::config("max_frames must be at least 1 when set"));
        }
        if self.progress_interval_frames == 0 {
            return Err(TrackingError::config("progress_interval_frames must be at least 1"));
        }
        Ok(())
    }
}
