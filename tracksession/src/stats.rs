//! Session statistics and the final result handed to callers

use crate::config::SessionConfig;
use crate::session::SessionState;
use crate::types::{RemovalReason, TrackedObject, VideoMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters accumulated while a session runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub frames_processed: u64,
    /// Live tracks after the last processed frame
    pub active_tracks: usize,
    pub tracks_created: usize,
    pub tracks_removed: usize,
    pub lost_removed: usize,
    pub init_failed: usize,
    pub detection_calls_used: u32,
    /// Failed or timed-out detection calls
    pub detection_calls_skipped: u32,
    pub detection_calls_max: u32,
    pub dedup_operations: u64,
    pub dedup_removed: usize,
    pub max_concurrent_tracks: usize,
    pub successful_updates: u64,
    pub failed_updates: u64,
    /// Mean confidence of live tracks at session end
    pub average_confidence: f32,
    pub frame_rate: f64,
    pub total_frames: Option<u64>,
    /// Video length in seconds, when the frame count is known
    pub duration: Option<f64>,
    pub resolution: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl SessionStats {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            frames_processed: 0,
            active_tracks: 0,
            tracks_created: 0,
            tracks_removed: 0,
            lost_removed: 0,
            init_failed: 0,
            detection_calls_used: 0,
            detection_calls_skipped: 0,
            detection_calls_max: config.max_detection_calls,
            dedup_operations: 0,
            dedup_removed: 0,
            max_concurrent_tracks: 0,
            successful_updates: 0,
            failed_updates: 0,
            average_confidence: 0.0,
            frame_rate: 0.0,
            total_frames: None,
            duration: None,
            resolution: String::new(),
            start_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn set_video(&mut self, video: &VideoMetadata) {
        self.frame_rate = video.frame_rate;
        self.total_frames = video.total_frames;
        self.duration = video.duration_secs();
        self.resolution = video.resolution();
    }

    /// Close out one processed frame
    pub fn record_frame(&mut self, live_tracks: usize) {
        self.frames_processed += 1;
        self.active_tracks = live_tracks;
        self.max_concurrent_tracks = self.max_concurrent_tracks.max(live_tracks);
    }

    /// Fraction of tracker updates that succeeded
    pub fn tracking_success_rate(&self) -> f64 {
        let total = self.successful_updates + self.failed_updates;
        if total == 0 {
            0.0
        } else {
            self.successful_updates as f64 / total as f64
        }
    }

    pub fn processing_time_ms(&self) -> i64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).num_milliseconds()
    }

    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }

    /// Derive the end-of-session totals from the full track set and stamp the end time
    pub fn finalize(&mut self, tracks: &[TrackedObject]) {
        let live: Vec<&TrackedObject> = tracks.iter().filter(|t| t.is_live()).collect();
        let removed_with = |reason: RemovalReason| {
            tracks
                .iter()
                .filter(|t| t.removal_reason == Some(reason))
                .count()
        };

        self.tracks_created = tracks.len();
        self.tracks_removed = tracks.len() - live.len();
        self.lost_removed = removed_with(RemovalReason::Lost);
        self.dedup_removed = removed_with(RemovalReason::Duplicate);
        self.init_failed = removed_with(RemovalReason::InitFailed);
        self.active_tracks = live.len();
        self.average_confidence = if live.is_empty() {
            0.0
        } else {
            live.iter().map(|t| t.confidence).sum::<f32>() / live.len() as f32
        };
        self.end_time = Some(Utc::now());
    }
}

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    EndOfStream,
    /// Stopped at the configured `max_frames`
    FrameCap,
    Cancelled,
}

/// Everything a finished session reports
#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    pub state: SessionState,
    pub completion: CompletionReason,
    pub stats: SessionStats,
    /// Every object the session created, removed ones included
    pub tracks: Vec<TrackedObject>,
}

impl SessionResult {
    pub fn live_tracks(&self) -> impl Iterator<Item = &TrackedObject> + '_ {
        self.tracks.iter().filter(|t| t.is_live())
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
