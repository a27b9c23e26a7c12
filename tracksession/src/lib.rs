//! Multi-object tracking lifecycle and deduplication engine
//!
//! Drives a video, one frame at a time, through sparse detection, per-object
//! tracking and periodic duplicate removal. Frame decoding, detection models and
//! single-object tracking algorithms are plugged in through the traits in
//! [`capability`]; the engine owns track identity, lifecycle and statistics.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use tracksession::replay::{MemorySink, Scenario};
//! use tracksession::TrackingSession;
//!
//! # async fn demo() -> tracksession::Result<()> {
//! let scenario = Scenario::from_file("demos/crossing.json")?;
//! let mut session =
//!     TrackingSession::with_motion_tracker(scenario.config.clone(), Arc::new(scenario.detector()));
//! let mut source = scenario.source();
//! let mut sink = MemorySink::new();
//! let result = session.run(&mut source, &mut sink, CancellationToken::new()).await?;
//! println!("{} tracks", result.stats.tracks_created);
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fusion;
pub mod replay;
pub mod scheduler;
pub mod session;
pub mod stats;
pub mod store;
pub mod types;

pub use capability::{
    DetectionOutcome, Detector, FrameSink, FrameSource, MotionTrackerFactory, ObjectTracker,
    TrackerFactory,
};
pub use config::{DedupTieBreak, SessionConfig, TrackerVariant};
pub use dedup::{deduplicate, DedupOutcome};
pub use error::{Result, TrackingError};
pub use fusion::{fuse, FusionOutcome};
pub use scheduler::{should_detect, DetectionScheduler};
pub use session::{SessionState, TrackingSession};
pub use stats::{CompletionReason, SessionResult, SessionStats};
pub use store::{LifecyclePolicy, TrackStore, UpdateOutcome};
pub use types::{
    Detection, Frame, RemovalReason, TrackId, TrackState, TrackedObject, VideoMetadata,
};

/// Get library version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
