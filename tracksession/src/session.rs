//! Session orchestrator: drives frames through detection, tracking and dedup

use crate::capability::{
    run_detection, DetectionOutcome, Detector, FrameSink, FrameSource, MotionTrackerFactory,
    ObjectTracker, TrackerFactory,
};
use crate::config::SessionConfig;
use crate::dedup::{self, deduplicate};
use crate::error::{Result, TrackingError};
use crate::fusion::fuse;
use crate::scheduler::DetectionScheduler;
use crate::stats::{CompletionReason, SessionResult, SessionStats};
use crate::store::{LifecyclePolicy, TrackStore, UpdateOutcome};
use crate::types::{Frame, RemovalReason, TrackId, TrackedObject, VideoMetadata};
use boxtrack::Bbox;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one session. Completed and Failed are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    Running,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Initializing, Running) | (Initializing, Failed) | (Running, Completed) | (Running, Failed)
        )
    }
}

/// One tracking session over one video.
///
/// A session owns its configuration and capability handles and runs exactly once.
/// Independent sessions share nothing and can run as separate tokio tasks.
pub struct TrackingSession {
    config: SessionConfig,
    detector: Arc<dyn Detector>,
    trackers: Arc<dyn TrackerFactory>,
    state: SessionState,
}

impl TrackingSession {
    pub fn new(
        config: SessionConfig,
        detector: Arc<dyn Detector>,
        trackers: Arc<dyn TrackerFactory>,
    ) -> Self {
        Self {
            config,
            detector,
            trackers,
            state: SessionState::Initializing,
        }
    }

    /// Session using the built-in motion-only tracker
    pub fn with_motion_tracker(config: SessionConfig, detector: Arc<dyn Detector>) -> Self {
        Self::new(config, detector, Arc::new(MotionTrackerFactory::new()))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn transition(&mut self, to: SessionState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(TrackingError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        log::debug!("Session state {:?} -> {:?}", self.state, to);
        self.state = to;
        Ok(())
    }

    fn fail(&mut self, error: TrackingError) -> TrackingError {
        log::error!("Tracking session failed: {}", error);
        if let Err(e) = self.transition(SessionState::Failed) {
            log::warn!("{}", e);
        }
        error
    }

    /// Process the source to its end, the frame cap, or cancellation.
    ///
    /// Source and sink are closed on every exit path once opened. Fatal errors
    /// leave the session Failed and are returned; detection and tracker failures
    /// are absorbed into the statistics.
    pub async fn run(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        cancel: CancellationToken,
    ) -> Result<SessionResult> {
        if self.state != SessionState::Initializing {
            return Err(TrackingError::InvalidTransition {
                from: self.state,
                to: SessionState::Running,
            });
        }
        if let Err(e) = self.config.validate() {
            return Err(self.fail(e));
        }

        let video = match source.open().await {
            Ok(video) => video,
            Err(e) => {
                if let Err(close_err) = source.close().await {
                    log::warn!("Failed to close frame source: {}", close_err);
                }
                return Err(self.fail(into_source_open(e)));
            }
        };
        if let Err(e) = sink.open(&video).await {
            if let Err(close_err) = source.close().await {
                log::warn!("Failed to close frame source: {}", close_err);
            }
            return Err(self.fail(into_sink_open(e)));
        }
        self.transition(SessionState::Running)?;

        log::info!(
            "Starting tracking session: {} @ {:.1} fps, {} frames, tracker {}, detector {}",
            video.resolution(),
            video.frame_rate,
            video
                .total_frames
                .map_or_else(|| "unknown".to_string(), |n| n.to_string()),
            self.config.tracker,
            self.detector.name()
        );

        let mut pipeline = Pipeline::new(
            self.config.clone(),
            self.detector.clone(),
            self.trackers.clone(),
            video,
        );
        let driven = pipeline.drive(source, sink, &cancel).await;

        let sink_closed = sink.close().await;
        if let Err(e) = source.close().await {
            log::warn!("Failed to close frame source: {}", e);
        }

        let completion = match (driven, sink_closed) {
            (Ok(completion), Ok(())) => completion,
            (Ok(_), Err(e)) => {
                return Err(self.fail(into_sink_write(e, pipeline.stats.frames_processed)));
            }
            (Err(e), sink_closed) => {
                if let Err(close_err) = sink_closed {
                    log::warn!("Failed to close frame sink: {}", close_err);
                }
                return Err(self.fail(e));
            }
        };

        self.transition(SessionState::Completed)?;
        Ok(pipeline.finish(completion))
    }
}

fn into_source_open(e: TrackingError) -> TrackingError {
    match e {
        TrackingError::SourceOpen(_) => e,
        other => TrackingError::source_open(other.to_string()),
    }
}

fn into_sink_open(e: TrackingError) -> TrackingError {
    match e {
        TrackingError::SinkOpen(_) => e,
        other => TrackingError::sink_open(other.to_string()),
    }
}

fn into_source_read(e: TrackingError, frame: u64) -> TrackingError {
    match e {
        TrackingError::SourceRead { .. } => e,
        other => TrackingError::source_read(frame, other.to_string()),
    }
}

fn into_sink_write(e: TrackingError, frame: u64) -> TrackingError {
    match e {
        TrackingError::SinkWrite { .. } => e,
        other => TrackingError::sink_write(frame, other.to_string()),
    }
}

/// Mutable state of a running session
struct Pipeline {
    config: SessionConfig,
    detector: Arc<dyn Detector>,
    factory: Arc<dyn TrackerFactory>,
    video: VideoMetadata,
    store: TrackStore,
    handles: BTreeMap<TrackId, Box<dyn ObjectTracker>>,
    scheduler: DetectionScheduler,
    stats: SessionStats,
}

impl Pipeline {
    fn new(
        config: SessionConfig,
        detector: Arc<dyn Detector>,
        factory: Arc<dyn TrackerFactory>,
        video: VideoMetadata,
    ) -> Self {
        let mut stats = SessionStats::new(&config);
        stats.set_video(&video);
        Self {
            store: TrackStore::new(LifecyclePolicy::new(&config, &video)),
            config,
            detector,
            factory,
            video,
            handles: BTreeMap::new(),
            scheduler: DetectionScheduler::new(),
            stats,
        }
    }

    async fn drive(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        cancel: &CancellationToken,
    ) -> Result<CompletionReason> {
        loop {
            if cancel.is_cancelled() {
                log::info!(
                    "Session cancelled after {} frames",
                    self.stats.frames_processed
                );
                return Ok(CompletionReason::Cancelled);
            }
            if let Some(max) = self.config.max_frames {
                if self.stats.frames_processed >= max {
                    log::info!("Reached frame cap of {} frames", max);
                    return Ok(CompletionReason::FrameCap);
                }
            }

            let expected = self.stats.frames_processed + 1;
            let frame = match source.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(CompletionReason::EndOfStream),
                Err(e) => return Err(into_source_read(e, expected)),
            };

            self.process_frame(&frame).await;

            let live: Vec<TrackedObject> = self.store.iter_active().cloned().collect();
            sink.write(&frame, &live)
                .await
                .map_err(|e| into_sink_write(e, frame.index))?;

            self.log_progress();
        }
    }

    async fn process_frame(&mut self, frame: &Frame) {
        if self.scheduler.should_detect(frame.index, &self.config) {
            self.detect_and_fuse(frame).await;
        }

        self.update_tracks(frame);

        if self.config.auto_dedup && dedup::is_due(frame.index, self.config.dedup_interval_frames) {
            let outcome = deduplicate(&mut self.store, frame.index, &self.config);
            self.stats.dedup_operations += 1;
            self.stats.dedup_removed += outcome.removed_count();
            for id in &outcome.removed {
                self.handles.remove(id);
            }
        }

        self.stats.record_frame(self.store.live_count());
    }

    async fn detect_and_fuse(&mut self, frame: &Frame) {
        let outcome = run_detection(
            self.detector.as_ref(),
            frame,
            self.config.confidence_threshold,
            self.config.detection_timeout(),
        )
        .await;

        let detections = match outcome {
            DetectionOutcome::Detected(detections) => detections,
            DetectionOutcome::TimedOut => {
                self.scheduler.record_failure();
                self.stats.detection_calls_skipped = self.scheduler.calls_skipped();
                log::warn!(
                    "Detection timed out at frame {} after {:?}, continuing with existing tracks",
                    frame.index,
                    self.config.detection_timeout()
                );
                return;
            }
            DetectionOutcome::Failed(reason) => {
                self.scheduler.record_failure();
                self.stats.detection_calls_skipped = self.scheduler.calls_skipped();
                log::warn!(
                    "Detection failed at frame {}: {}, continuing with existing tracks",
                    frame.index,
                    reason
                );
                return;
            }
        };

        self.scheduler.record_success(frame.index);
        self.stats.detection_calls_used = self.scheduler.calls_used();

        let fused = fuse(detections, frame.index, &mut self.store, &self.config);
        for (id, bbox) in &fused.observed {
            if let Some(handle) = self.handles.get_mut(id) {
                handle.observe(bbox);
            }
        }
        let mut initialized = 0usize;
        for id in &fused.created {
            if self.init_tracker(*id, frame) {
                initialized += 1;
            }
        }

        log::info!(
            "Detection {}/{} at frame {}: {} raw, {} suppressed, {} overlapping ({} tracks re-observed), {} new tracks",
            self.scheduler.calls_used(),
            self.config.max_detection_calls,
            frame.index,
            fused.raw,
            fused.suppressed,
            fused.rejected_overlap,
            fused.observed.len(),
            initialized
        );
    }

    fn init_tracker(&mut self, id: TrackId, frame: &Frame) -> bool {
        let Some(bbox) = self.store.get(id).map(|obj| obj.bbox) else {
            return false;
        };
        match self.factory.create(self.config.tracker, frame, &bbox) {
            Ok(handle) => {
                self.handles.insert(id, handle);
                true
            }
            Err(e) => {
                log::warn!("Tracker init failed for {} at frame {}: {}", id, frame.index, e);
                self.store.remove(id, RemovalReason::InitFailed, frame.index);
                false
            }
        }
    }

    /// Step every tracker created before this frame, then apply results in id order
    fn update_tracks(&mut self, frame: &Frame) {
        let store = &self.store;
        let mut work: Vec<(TrackId, &mut Box<dyn ObjectTracker>)> = self
            .handles
            .iter_mut()
            .filter(|(id, _)| {
                store
                    .get(**id)
                    .map_or(false, |obj| obj.is_live() && obj.created_frame < frame.index)
            })
            .map(|(id, handle)| (*id, handle))
            .collect();

        let results: Vec<(TrackId, Option<Bbox>)> = work
            .par_iter_mut()
            .map(|(id, handle)| (*id, handle.update(frame)))
            .collect();

        for (id, result) in results {
            let outcome = match result {
                Some(bbox) => self.store.mark_successful_update(id, bbox, frame.index),
                None => self.store.mark_failed_update(id, frame.index),
            };
            match outcome {
                Some(UpdateOutcome::Updated) => self.stats.successful_updates += 1,
                Some(UpdateOutcome::Lost { .. }) => self.stats.failed_updates += 1,
                Some(UpdateOutcome::Removed) => {
                    self.stats.failed_updates += 1;
                    self.handles.remove(&id);
                }
                None => {}
            }
        }
    }

    fn log_progress(&self) {
        let processed = self.stats.frames_processed;
        if processed % self.config.progress_interval_frames != 0 {
            return;
        }
        match self.video.total_frames {
            Some(total) if total > 0 => log::info!(
                "Progress: {}/{} frames ({:.1}%), {} live tracks, {} removed",
                processed,
                total,
                processed as f64 / total as f64 * 100.0,
                self.store.live_count(),
                self.store.removed_count()
            ),
            _ => log::info!(
                "Progress: {} frames, {} live tracks, {} removed",
                processed,
                self.store.live_count(),
                self.store.removed_count()
            ),
        }
    }

    fn finish(self, completion: CompletionReason) -> SessionResult {
        let mut stats = self.stats;
        stats.detection_calls_used = self.scheduler.calls_used();
        stats.detection_calls_skipped = self.scheduler.calls_skipped();
        let tracks = self.store.into_objects();
        stats.finalize(&tracks);

        log::info!(
            "Tracking session finished ({:?}): {} frames, {} detection calls used ({} skipped), {} tracks created, {} dedup removed, {} live",
            completion,
            stats.frames_processed,
            stats.detection_calls_used,
            stats.detection_calls_skipped,
            stats.tracks_created,
            stats.dedup_removed,
            stats.active_tracks
        );

        SessionResult {
            state: SessionState::Completed,
            completion,
            stats,
            tracks,
        }
    }
}
