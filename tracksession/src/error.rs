//! Error types for tracking sessions

use crate::session::SessionState;
use thiserror::Error;

/// Result type alias for the tracking library
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Errors raised while configuring or running a tracking session.
///
/// Only the source, sink, configuration and state-machine variants are fatal to a
/// session; detection and tracker failures are absorbed into the session statistics.
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown tracker variant: {0}")]
    UnknownTracker(String),

    #[error("Failed to open frame source: {0}")]
    SourceOpen(String),

    #[error("Frame source failed at frame {frame}: {reason}")]
    SourceRead { frame: u64, reason: String },

    #[error("Failed to open frame sink: {0}")]
    SinkOpen(String),

    #[error("Frame sink failed at frame {frame}: {reason}")]
    SinkWrite { frame: u64, reason: String },

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Tracker initialization failed: {0}")]
    TrackerInit(String),

    #[error("Invalid session transition from {from:?} to {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TrackingError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn source_open<S: Into<String>>(msg: S) -> Self {
        Self::SourceOpen(msg.into())
    }

    pub fn source_read<S: Into<String>>(frame: u64, reason: S) -> Self {
        Self::SourceRead {
            frame,
            reason: reason.into(),
        }
    }

    pub fn sink_open<S: Into<String>>(msg: S) -> Self {
        Self::SinkOpen(msg.into())
    }

    pub fn sink_write<S: Into<String>>(frame: u64, reason: S) -> Self {
        Self::SinkWrite {
            frame,
            reason: reason.into(),
        }
    }

    pub fn detection<S: Into<String>>(msg: S) -> Self {
        Self::Detection(msg.into())
    }

    pub fn tracker_init<S: Into<String>>(msg: S) -> Self {
        Self::TrackerInit(msg.into())
    }

    /// Whether this error ends the session it occurs in
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Detection(_) | Self::TrackerInit(_))
    }
}
