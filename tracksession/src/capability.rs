//! Interfaces to the outside world: frame source and sink, detector, trackers
//!
//! Source, sink and detector calls are the only suspension points of a session
//! and are async. Single-object trackers are synchronous and run on the rayon
//! pool, one handle per tracked object.

use crate::config::TrackerVariant;
use crate::error::{Result, TrackingError};
use crate::types::{Detection, Frame, TrackedObject, VideoMetadata};
use async_trait::async_trait;
use boxtrack::{Bbox, BoxPredictor, MotionNoise};
use std::time::Duration;

/// Produces frames in order, starting at index 1
#[async_trait]
pub trait FrameSource: Send {
    /// Open the source and report its static properties
    async fn open(&mut self) -> Result<VideoMetadata>;

    /// Next frame, or None at end of stream
    async fn next_frame(&mut self) -> Result<Option<Frame>>;

    async fn close(&mut self) -> Result<()>;
}

/// Receives every processed frame together with the live tracks on it
#[async_trait]
pub trait FrameSink: Send {
    async fn open(&mut self, video: &VideoMetadata) -> Result<()>;

    async fn write(&mut self, frame: &Frame, tracks: &[TrackedObject]) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// External object detector
#[async_trait]
pub trait Detector: Send + Sync {
    /// Detector name (for logging)
    fn name(&self) -> &str;

    /// Detect objects with confidence at or above `confidence_floor`
    async fn detect(&self, frame: &Frame, confidence_floor: f32) -> Result<Vec<Detection>>;
}

/// Result of one detection call after the timeout is applied
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    Detected(Vec<Detection>),
    TimedOut,
    Failed(String),
}

/// Call the detector, giving up after `timeout`
pub async fn run_detection(
    detector: &dyn Detector,
    frame: &Frame,
    confidence_floor: f32,
    timeout: Duration,
) -> DetectionOutcome {
    match tokio::time::timeout(timeout, detector.detect(frame, confidence_floor)).await {
        Ok(Ok(detections)) => DetectionOutcome::Detected(detections),
        Ok(Err(e)) => DetectionOutcome::Failed(e.to_string()),
        Err(_) => DetectionOutcome::TimedOut,
    }
}

/// Follows one object from frame to frame
pub trait ObjectTracker: Send {
    /// Locate the object on `frame`; None when it was lost
    fn update(&mut self, frame: &Frame) -> Option<Bbox>;

    /// A detection re-observed the object at `bbox` on the frame about to be
    /// updated. Trackers that follow pixels can ignore it.
    fn observe(&mut self, _bbox: &Bbox) {}
}

/// Creates tracker handles for new tracked objects
pub trait TrackerFactory: Send + Sync {
    fn create(
        &self,
        variant: TrackerVariant,
        frame: &Frame,
        bbox: &Bbox,
    ) -> Result<Box<dyn ObjectTracker>>;
}

/// Tracker that extrapolates the box with a constant-velocity motion model.
///
/// It never looks at pixels. Velocity is learned from the detections that
/// re-observe the object; between them it coasts, and it reports failure once
/// the predicted box degenerates or the coast limit runs out.
#[derive(Debug, Clone)]
pub struct MotionTracker {
    predictor: BoxPredictor,
    pending: Option<Bbox>,
    max_coast_frames: Option<u32>,
}

fn usable(bbox: Bbox) -> Option<Bbox> {
    (bbox.is_finite() && bbox.width() > 0.0 && bbox.height() > 0.0).then_some(bbox)
}

impl MotionTracker {
    pub fn new(bbox: &Bbox, noise: MotionNoise) -> Result<Self> {
        let predictor =
            BoxPredictor::new(bbox, noise).map_err(|e| TrackingError::tracker_init(e.to_string()))?;
        Ok(Self {
            predictor,
            pending: None,
            max_coast_frames: None,
        })
    }

    /// Report failure after this many predictions
    pub fn with_max_coast_frames(mut self, frames: u32) -> Self {
        self.max_coast_frames = Some(frames);
        self
    }
}

impl ObjectTracker for MotionTracker {
    fn update(&mut self, _frame: &Frame) -> Option<Bbox> {
        let predicted = self.predictor.predict();
        if let Some(observed) = self.pending.take() {
            match self.predictor.correct(&observed) {
                Ok(()) => {
                    let (vx, vy) = self.predictor.velocity();
                    log::trace!(
                        "Corrected to {} after {} observations, velocity ({:.2}, {:.2})",
                        self.predictor.bbox(),
                        self.predictor.hits,
                        vx,
                        vy
                    );
                    return usable(self.predictor.bbox());
                }
                Err(e) => log::debug!("Ignored observation {}: {}", observed, e),
            }
        }
        let predicted = predicted?;
        match self.max_coast_frames {
            Some(max) if self.predictor.steps_since_correction > max => None,
            _ => Some(predicted),
        }
    }

    fn observe(&mut self, bbox: &Bbox) {
        self.pending = usable(*bbox);
    }
}

/// Built-in factory producing [`MotionTracker`]s
#[derive(Debug, Clone, Default)]
pub struct MotionTrackerFactory {
    max_coast_frames: Option<u32>,
}

impl MotionTrackerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_coast_frames(mut self, frames: u32) -> Self {
        self.max_coast_frames = Some(frames);
        self
    }

    fn noise_for(variant: TrackerVariant) -> MotionNoise {
        match variant {
            TrackerVariant::Fast => MotionNoise::responsive(),
            TrackerVariant::Balanced => MotionNoise::default(),
            TrackerVariant::Accurate => MotionNoise::smooth(),
        }
    }
}

impl TrackerFactory for MotionTrackerFactory {
    fn create(
        &self,
        variant: TrackerVariant,
        _frame: &Frame,
        bbox: &Bbox,
    ) -> Result<Box<dyn ObjectTracker>> {
        if !bbox.is_finite() || bbox.width() <= 0.0 || bbox.height() <= 0.0 {
            return Err(TrackingError::tracker_init(format!(
                "cannot follow degenerate box {}",
                bbox
            )));
        }
        let mut tracker = MotionTracker::new(bbox, Self::noise_for(variant))?;
        if let Some(frames) = self.max_coast_frames {
            tracker = tracker.with_max_coast_frames(frames);
        }
        Ok(Box::new(tracker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use image::RgbImage;

    fn frame(index: u64) -> Frame {
        Frame::new(index, RgbImage::new(64, 48), Duration::ZERO)
    }

    struct SlowDetector {
        delay: Duration,
    }

    #[async_trait]
    impl Detector for SlowDetector {
        fn name(&self) -> &str {
            "slow"
        }

        async fn detect(&self, _frame: &Frame, _floor: f32) -> Result<Vec<Detection>> {
            tokio::time::sleep(self.delay).await;
            Ok(vec![Detection::new(Bbox::from_xywh(1.0, 1.0, 10.0, 10.0), 0.9)])
        }
    }

    struct BrokenDetector;

    #[async_trait]
    impl Detector for BrokenDetector {
        fn name(&self) -> &str {
            "broken"
        }

        async fn detect(&self, _frame: &Frame, _floor: f32) -> Result<Vec<Detection>> {
            Err(TrackingError::detection("service unavailable"))
        }
    }

    #[tokio::test]
    async fn test_detection_outcomes() {
        let fast = SlowDetector {
            delay: Duration::from_millis(1),
        };
        let outcome = run_detection(&fast, &frame(1), 0.5, Duration::from_secs(5)).await;
        assert!(matches!(outcome, DetectionOutcome::Detected(ref found) if found.len() == 1));

        let slow = SlowDetector {
            delay: Duration::from_secs(5),
        };
        let outcome = run_detection(&slow, &frame(1), 0.5, Duration::from_millis(20)).await;
        assert_eq!(outcome, DetectionOutcome::TimedOut);

        let outcome = run_detection(&BrokenDetector, &frame(1), 0.5, Duration::from_secs(1)).await;
        assert!(matches!(outcome, DetectionOutcome::Failed(msg) if msg.contains("unavailable")));
    }

    #[test]
    fn test_motion_tracker_holds_still_box() {
        let factory = MotionTrackerFactory::new();
        let bbox = Bbox::from_xywh(10.0, 10.0, 20.0, 20.0);
        for variant in TrackerVariant::all() {
            let mut tracker = factory.create(variant, &frame(1), &bbox).unwrap();
            let next = tracker.update(&frame(2)).unwrap();
            assert_abs_diff_eq!(next.center_x(), bbox.center_x(), epsilon = 0.01);
            assert_abs_diff_eq!(next.center_y(), bbox.center_y(), epsilon = 0.01);
        }
    }

    #[test]
    fn test_motion_tracker_coast_limit() {
        let factory = MotionTrackerFactory::new().with_max_coast_frames(2);
        let bbox = Bbox::from_xywh(10.0, 10.0, 20.0, 20.0);
        let mut tracker = factory.create(TrackerVariant::Fast, &frame(1), &bbox).unwrap();
        assert!(tracker.update(&frame(2)).is_some());
        assert!(tracker.update(&frame(3)).is_some());
        assert!(tracker.update(&frame(4)).is_none());
    }

    #[test]
    fn test_motion_tracker_follows_observations() {
        let factory = MotionTrackerFactory::new();
        let start = Bbox::from_xywh(100.0, 100.0, 40.0, 40.0);
        let mut tracker = factory.create(TrackerVariant::Balanced, &frame(1), &start).unwrap();

        let mut last = start;
        for step in 1..=10u64 {
            let observed = Bbox::from_xywh(100.0 + step as f32 * 4.0, 100.0, 40.0, 40.0);
            tracker.observe(&observed);
            last = tracker.update(&frame(step + 1)).unwrap();
        }
        assert!(last.center_x() > start.center_x() + 30.0);

        // Keeps moving on the learned velocity once observations stop
        let coasting = tracker.update(&frame(12)).unwrap();
        assert!(coasting.center_x() > last.center_x() + 1.0);
        assert_abs_diff_eq!(coasting.center_y(), start.center_y(), epsilon = 1.0);
    }

    #[test]
    fn test_variants_weigh_observations_differently() {
        let factory = MotionTrackerFactory::new();
        let start = Bbox::from_xywh(100.0, 100.0, 40.0, 40.0);
        let mut finals = Vec::new();

        for variant in TrackerVariant::all() {
            let mut tracker = factory.create(variant, &frame(1), &start).unwrap();
            let mut last = start;
            for step in 1..=20u64 {
                // Steady drift with alternating jitter
                let jitter = if step % 2 == 0 { 6.0 } else { -6.0 };
                let x = 100.0 + step as f32 * 3.0 + jitter;
                tracker.observe(&Bbox::from_xywh(x, 100.0, 40.0, 40.0));
                last = tracker.update(&frame(step + 1)).unwrap();
            }
            finals.push(last.center_x());
        }

        assert!((finals[0] - finals[2]).abs() > 0.01, "{:?}", finals);
        assert!(finals.iter().all(|x| *x > 140.0), "{:?}", finals);
    }

    #[test]
    fn test_observation_resets_coast_limit() {
        let factory = MotionTrackerFactory::new().with_max_coast_frames(2);
        let bbox = Bbox::from_xywh(10.0, 10.0, 20.0, 20.0);
        let mut tracker = factory.create(TrackerVariant::Fast, &frame(1), &bbox).unwrap();
        assert!(tracker.update(&frame(2)).is_some());
        assert!(tracker.update(&frame(3)).is_some());
        tracker.observe(&Bbox::from_xywh(12.0, 10.0, 20.0, 20.0));
        assert!(tracker.update(&frame(4)).is_some());
        assert!(tracker.update(&frame(5)).is_some());
        assert!(tracker.update(&frame(6)).is_some());
        assert!(tracker.update(&frame(7)).is_none());
    }

    #[test]
    fn test_factory_rejects_degenerate_box() {
        let factory = MotionTrackerFactory::new();
        let flat = Bbox::new(10.0, 10.0, 30.0, 10.0);
        assert!(matches!(
            factory.create(TrackerVariant::Balanced, &frame(1), &flat),
            Err(TrackingError::TrackerInit(_))
        ));
    }
}
