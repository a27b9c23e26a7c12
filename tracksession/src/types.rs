//! Core value types shared by the tracking engine

use boxtrack::{Bbox, Scored};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Stable identity of a tracked object. Assigned monotonically, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Candidate object returned by the detection capability for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: Bbox,
    /// Detection confidence score (0-1)
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Detection {
    pub fn new(bbox: Bbox, confidence: f32) -> Self {
        Self {
            bbox,
            confidence,
            label: None,
        }
    }

    pub fn with_label<S: Into<String>>(mut self, label: S) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl Scored for Detection {
    fn bbox(&self) -> &Bbox {
        &self.bbox
    }

    fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// Frame with metadata. Indices start at 1.
#[derive(Clone)]
pub struct Frame {
    pub index: u64,
    pub image: RgbImage,
    /// Presentation time relative to the start of the stream
    pub timestamp: Duration,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage, timestamp: Duration) -> Self {
        Self {
            index,
            image,
            timestamp,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("size", &format_args!("{}x{}", self.width(), self.height()))
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Static properties of a frame source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    /// Unknown for live sources
    #[serde(default)]
    pub total_frames: Option<u64>,
}

impl VideoMetadata {
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Video length in seconds; None for live sources or an unknown frame rate
    pub fn duration_secs(&self) -> Option<f64> {
        match self.total_frames {
            Some(total) if self.frame_rate > 0.0 => Some(total as f64 / self.frame_rate),
            _ => None,
        }
    }

    /// Timestamp of a 1-based frame index at the nominal frame rate
    pub fn timestamp_of(&self, index: u64) -> Duration {
        if self.frame_rate > 0.0 {
            Duration::from_secs_f64(index.saturating_sub(1) as f64 / self.frame_rate)
        } else {
            Duration::ZERO
        }
    }
}

/// Lifecycle state of a tracked object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    /// Last update succeeded
    Active,
    /// Last update failed but the object is still followed
    Lost,
    /// Terminal; kept only for statistics
    Removed,
}

impl TrackState {
    /// Active or Lost: still updated, fused against, deduplicated and emitted
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Removed)
    }
}

/// Why a tracked object was removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// Too many consecutive failed updates, or confidence decayed below the floor
    Lost,
    /// Overlapped a preferred track during a dedup pass
    Duplicate,
    /// The tracking capability could not be initialized on the detection
    InitFailed,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lost => "lost",
            Self::Duplicate => "duplicate",
            Self::InitFailed => "init_failed",
        }
    }
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An object followed across frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub id: TrackId,
    /// Last known position
    pub bbox: Bbox,
    pub confidence: f32,
    /// Confidence of the detection that created the track
    pub first_confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub state: TrackState,
    /// Consecutive failed updates
    pub lost_frames: u32,
    pub created_frame: u64,
    pub last_update_frame: u64,
    /// Successful updates since creation
    pub update_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removal_reason: Option<RemovalReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_frame: Option<u64>,
}

impl TrackedObject {
    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }
}
