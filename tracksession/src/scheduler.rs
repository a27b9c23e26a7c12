//! Decides on which frames the detection capability is called

use crate::config::SessionConfig;

/// Whether the detector should run on `frame`.
///
/// The call budget is checked first and is never exceeded. Within budget, a frame
/// listed in `detection_frames` always qualifies, and so does any frame at least
/// `min_detection_interval` after the last successful detection. Before the first
/// successful detection the interval counts as elapsed.
pub fn should_detect(
    frame: u64,
    last_detection_frame: Option<u64>,
    calls_used: u32,
    config: &SessionConfig,
) -> bool {
    if calls_used >= config.max_detection_calls {
        return false;
    }
    if config.detection_frames.contains(&frame) {
        return true;
    }
    match last_detection_frame {
        None => true,
        Some(last) => frame.saturating_sub(last) >= config.min_detection_interval,
    }
}

/// Per-session detection bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionScheduler {
    calls_used: u32,
    calls_skipped: u32,
    last_detection_frame: Option<u64>,
}

impl DetectionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_detect(&self, frame: u64, config: &SessionConfig) -> bool {
        should_detect(frame, self.last_detection_frame, self.calls_used, config)
    }

    /// A detection call returned results; it consumes budget
    pub fn record_success(&mut self, frame: u64) {
        self.calls_used += 1;
        self.last_detection_frame = Some(frame);
    }

    /// A detection call failed or timed out; budget and schedule are unchanged
    pub fn record_failure(&mut self) {
        self.calls_skipped += 1;
    }

    pub fn calls_used(&self) -> u32 {
        self.calls_used
    }

    pub fn calls_skipped(&self) -> u32 {
        self.calls_skipped
    }

    pub fn last_detection_frame(&self) -> Option<u64> {
        self.last_detection_frame
    }
}
