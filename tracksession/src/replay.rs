//! Scripted capabilities for replaying recorded detections
//!
//! A [`Scenario`] describes a video by its metadata and the detections a detector
//! returned on each frame. Replaying it exercises the full session lifecycle
//! without decoding video or running a model.

use crate::capability::{Detector, FrameSink, FrameSource};
use crate::config::SessionConfig;
use crate::error::{Result, TrackingError};
use crate::types::{Detection, Frame, TrackId, TrackState, TrackedObject, VideoMetadata};
use async_trait::async_trait;
use boxtrack::Bbox;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Recorded input for one replayed session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub video: VideoMetadata,
    /// Frames to generate; `video.total_frames` when unset, endless when both are unset
    #[serde(default)]
    pub frames: Option<u64>,
    /// Detector output keyed by 1-based frame index
    #[serde(default)]
    pub detections: BTreeMap<u64, Vec<Detection>>,
    /// Frames on which the detector returns an error
    #[serde(default)]
    pub failing_frames: BTreeSet<u64>,
    /// Frames on which the detector outlives the detection timeout
    #[serde(default)]
    pub slow_frames: BTreeSet<u64>,
    #[serde(default)]
    pub config: SessionConfig,
}

impl Scenario {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let scenario: Self = serde_json::from_str(json)?;
        if scenario.frame_limit().is_none() && scenario.config.max_frames.is_none() {
            return Err(TrackingError::config(
                "scenario needs frames, video.total_frames or config.max_frames",
            ));
        }
        Ok(scenario)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn frame_limit(&self) -> Option<u64> {
        self.frames.or(self.video.total_frames)
    }

    pub fn source(&self) -> SyntheticFrameSource {
        let source = SyntheticFrameSource::new(self.video.clone());
        match self.frame_limit() {
            Some(limit) => source.with_limit(limit),
            None => source,
        }
    }

    pub fn detector(&self) -> ScriptedDetector {
        ScriptedDetector::new(self.detections.clone())
            .with_failing_frames(self.failing_frames.iter().copied())
            .with_slow_frames(
                self.slow_frames.iter().copied(),
                self.config.detection_timeout() * 2,
            )
    }
}

/// Emits blank frames of a fixed size
#[derive(Debug)]
pub struct SyntheticFrameSource {
    video: VideoMetadata,
    limit: Option<u64>,
    next_index: u64,
    opened: bool,
    closed: bool,
}

impl SyntheticFrameSource {
    /// Source bounded by `video.total_frames`, endless when that is unknown
    pub fn new(video: VideoMetadata) -> Self {
        Self {
            limit: video.total_frames,
            video,
            next_index: 1,
            opened: false,
            closed: false,
        }
    }

    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl FrameSource for SyntheticFrameSource {
    async fn open(&mut self) -> Result<VideoMetadata> {
        if self.video.width == 0 || self.video.height == 0 {
            return Err(TrackingError::source_open(format!(
                "invalid resolution {}",
                self.video.resolution()
            )));
        }
        self.opened = true;
        Ok(self.video.clone())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.opened || self.closed {
            return Err(TrackingError::source_read(self.next_index, "source is not open"));
        }
        if self.limit.map_or(false, |limit| self.next_index > limit) {
            return Ok(None);
        }
        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(Frame::new(
            index,
            RgbImage::new(self.video.width, self.video.height),
            self.video.timestamp_of(index),
        )))
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Detector replaying recorded per-frame output
#[derive(Debug, Default)]
pub struct ScriptedDetector {
    detections: BTreeMap<u64, Vec<Detection>>,
    failing_frames: BTreeSet<u64>,
    slow_frames: BTreeSet<u64>,
    slow_delay: Duration,
    calls: AtomicU32,
}

impl ScriptedDetector {
    pub fn new(detections: BTreeMap<u64, Vec<Detection>>) -> Self {
        Self {
            detections,
            ..Self::default()
        }
    }

    pub fn with_failing_frames<I: IntoIterator<Item = u64>>(mut self, frames: I) -> Self {
        self.failing_frames.extend(frames);
        self
    }

    /// Respond on these frames only after `delay`
    pub fn with_slow_frames<I: IntoIterator<Item = u64>>(mut self, frames: I, delay: Duration) -> Self {
        self.slow_frames.extend(frames);
        self.slow_delay = delay;
        self
    }

    /// Calls received so far, failed and slow ones included
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn detect(&self, frame: &Frame, confidence_floor: f32) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.failing_frames.contains(&frame.index) {
            return Err(TrackingError::detection(format!(
                "scripted failure at frame {}",
                frame.index
            )));
        }
        if self.slow_frames.contains(&frame.index) {
            tokio::time::sleep(self.slow_delay).await;
        }

        Ok(self
            .detections
            .get(&frame.index)
            .map(|detections| {
                detections
                    .iter()
                    .filter(|d| d.confidence >= confidence_floor)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// One emitted track inside a [`FrameRecord`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: TrackId,
    pub bbox: Bbox,
    pub confidence: f32,
    pub state: TrackState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl From<&TrackedObject> for TrackRecord {
    fn from(obj: &TrackedObject) -> Self {
        Self {
            id: obj.id,
            bbox: obj.bbox,
            confidence: obj.confidence,
            state: obj.state,
            label: obj.label.clone(),
        }
    }
}

/// Everything emitted for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame: u64,
    pub timestamp_ms: u64,
    pub tracks: Vec<TrackRecord>,
}

impl FrameRecord {
    pub fn new(frame: &Frame, tracks: &[TrackedObject]) -> Self {
        Self {
            frame: frame.index,
            timestamp_ms: frame.timestamp.as_millis() as u64,
            tracks: tracks.iter().map(TrackRecord::from).collect(),
        }
    }
}

/// Writes one JSON line per frame
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl JsonLinesSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            writer: None,
            written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

#[async_trait]
impl FrameSink for JsonLinesSink {
    async fn open(&mut self, _video: &VideoMetadata) -> Result<()> {
        let file = File::create(&self.path).await.map_err(|e| {
            TrackingError::sink_open(format!("{}: {}", self.path.display(), e))
        })?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    async fn write(&mut self, frame: &Frame, tracks: &[TrackedObject]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| TrackingError::sink_write(frame.index, "sink is not open"))?;

        let mut line = serde_json::to_vec(&FrameRecord::new(frame, tracks))?;
        line.push(b'\n');
        writer
            .write_all(&line)
            .await
            .map_err(|e| TrackingError::sink_write(frame.index, e.to_string()))?;
        self.written += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
            log::debug!("Wrote {} frame records to {}", self.written, self.path.display());
        }
        Ok(())
    }
}

/// Keeps emitted records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<FrameRecord>,
    fail_at: Option<u64>,
    opened: bool,
    closed: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the write of this frame index
    pub fn fail_at(mut self, frame: u64) -> Self {
        self.fail_at = Some(frame);
        self
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.records
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn open(&mut self, _video: &VideoMetadata) -> Result<()> {
        self.opened = true;
        Ok(())
    }

    async fn write(&mut self, frame: &Frame, tracks: &[TrackedObject]) -> Result<()> {
        if self.fail_at == Some(frame.index) {
            return Err(TrackingError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "sink disconnected",
            )));
        }
        self.records.push(FrameRecord::new(frame, tracks));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TrackingSession;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    const SCENARIO: &str = r#"{
        "video": {"width": 640, "height": 480, "frame_rate": 25.0, "total_frames": 40},
        "detections": {
            "1": [
                {"bbox": {"xmin": 10.0, "ymin": 10.0, "xmax": 60.0, "ymax": 60.0}, "confidence": 0.9, "label": "person"},
                {"bbox": {"xmin": 300.0, "ymin": 200.0, "xmax": 380.0, "ymax": 260.0}, "confidence": 0.7}
            ]
        },
        "failing_frames": [60],
        "config": {"tracker": "csrt", "detection_frames": [1, 60]}
    }"#;

    #[test]
    fn test_parse_scenario() {
        let scenario = Scenario::from_json_str(SCENARIO).unwrap();
        assert_eq!(scenario.frame_limit(), Some(40));
        assert_eq!(scenario.detections[&1].len(), 2);
        assert_eq!(scenario.detections[&1][0].label.as_deref(), Some("person"));
        assert!(scenario.failing_frames.contains(&60));
        assert_eq!(scenario.config.max_lost_frames, 30);
    }

    #[test]
    fn test_unbounded_scenario_needs_cap() {
        let json = r#"{"video": {"width": 64, "height": 64, "frame_rate": 10.0}}"#;
        assert!(Scenario::from_json_str(json).is_err());

        let capped = r#"{"video": {"width": 64, "height": 64, "frame_rate": 10.0}, "config": {"max_frames": 5}}"#;
        assert_eq!(Scenario::from_json_str(capped).unwrap().frame_limit(), None);
    }

    #[tokio::test]
    async fn test_source_requires_open() {
        let mut source = SyntheticFrameSource::new(VideoMetadata {
            width: 16,
            height: 16,
            frame_rate: 10.0,
            total_frames: Some(2),
        });
        assert!(source.next_frame().await.is_err());

        source.open().await.unwrap();
        assert_eq!(source.next_frame().await.unwrap().unwrap().index, 1);
        assert_eq!(source.next_frame().await.unwrap().unwrap().index, 2);
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scripted_detector_applies_floor() {
        let scenario = Scenario::from_json_str(SCENARIO).unwrap();
        let detector = scenario.detector();
        let frame = Frame::new(1, RgbImage::new(8, 8), Duration::ZERO);

        assert_eq!(detector.detect(&frame, 0.5).await.unwrap().len(), 2);
        assert_eq!(detector.detect(&frame, 0.8).await.unwrap().len(), 1);
        let failing = Frame::new(60, RgbImage::new(8, 8), Duration::ZERO);
        assert!(detector.detect(&failing, 0.5).await.is_err());
        assert_eq!(detector.calls(), 3);
    }

    #[tokio::test]
    async fn test_replay_to_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("tracks.jsonl");
        let scenario = Scenario::from_json_str(SCENARIO).unwrap();

        let mut session =
            TrackingSession::with_motion_tracker(scenario.config.clone(), Arc::new(scenario.detector()));
        let mut source = scenario.source();
        let mut sink = JsonLinesSink::new(&out);
        let result = session
            .run(&mut source, &mut sink, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.stats.frames_processed, 40);
        assert_eq!(sink.written(), 40);

        let contents = std::fs::read_to_string(&out).unwrap();
        let records: Vec<FrameRecord> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 40);
        assert_eq!(records[0].frame, 1);
        assert_eq!(records[0].tracks.len(), 2);
        assert_eq!(records[0].tracks[0].label.as_deref(), Some("person"));
        assert_eq!(records[25].timestamp_ms, 1000);
    }

    #[tokio::test]
    async fn test_json_sink_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonLinesSink::new(dir.path().join("missing").join("tracks.jsonl"));
        let video = VideoMetadata {
            width: 8,
            height: 8,
            frame_rate: 1.0,
            total_frames: None,
        };
        assert!(matches!(sink.open(&video).await, Err(TrackingError::SinkOpen(_))));
    }
}
