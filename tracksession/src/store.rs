//! Arena of tracked objects keyed by stable ids

use crate::config::SessionConfig;
use crate::types::{RemovalReason, TrackId, TrackState, TrackedObject, VideoMetadata};
use boxtrack::{is_valid, Bbox, ValidityBounds};

/// Below this confidence a failing track is dropped
pub const CONFIDENCE_FLOOR: f32 = 0.05;

/// Successful updates never decay confidence below this value
pub const MIN_TRACKED_CONFIDENCE: f32 = 0.1;

/// Rules applied to every lifecycle transition of a store
#[derive(Debug, Clone, PartialEq)]
pub struct LifecyclePolicy {
    pub max_lost_frames: u32,
    pub decay_success: f32,
    pub decay_failure: f32,
    pub bounds: ValidityBounds,
}

impl LifecyclePolicy {
    pub fn new(config: &SessionConfig, video: &VideoMetadata) -> Self {
        Self {
            max_lost_frames: config.max_lost_frames,
            decay_success: config.confidence_decay_success,
            decay_failure: config.confidence_decay_failure,
            bounds: ValidityBounds::new(
                video.width,
                video.height,
                config.min_bbox_size,
                config.boundary_margin,
            )
            .with_boundary_check(config.boundary_check),
        }
    }
}

/// Result of routing one tracker update into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Box and confidence refreshed, state is Active
    Updated,
    /// Update counted as a failure, track still live
    Lost { lost_frames: u32 },
    /// Track crossed a removal threshold on this update
    Removed,
}

/// Owns every tracked object of a session.
///
/// Objects live in a dense vector indexed by `id - 1`. Removed objects stay in
/// place as tombstones, so ids are never reused and lookups stay O(1).
#[derive(Debug, Clone)]
pub struct TrackStore {
    objects: Vec<TrackedObject>,
    policy: LifecyclePolicy,
    live: usize,
}

impl TrackStore {
    pub fn new(policy: LifecyclePolicy) -> Self {
        Self {
            objects: Vec::new(),
            policy,
            live: 0,
        }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    /// Create an Active object and return its fresh id
    pub fn create(&mut self, bbox: Bbox, confidence: f32, frame: u64) -> TrackId {
        self.create_labeled(bbox, confidence, None, frame)
    }

    pub fn create_labeled(
        &mut self,
        bbox: Bbox,
        confidence: f32,
        label: Option<String>,
        frame: u64,
    ) -> TrackId {
        let id = TrackId(self.objects.len() as u64 + 1);
        self.objects.push(TrackedObject {
            id,
            bbox,
            confidence,
            first_confidence: confidence,
            label,
            state: TrackState::Active,
            lost_frames: 0,
            created_frame: frame,
            last_update_frame: frame,
            update_count: 0,
            removal_reason: None,
            removed_frame: None,
        });
        self.live += 1;
        log::debug!("Created track {} (conf {:.2}) at frame {}", id, confidence, frame);
        id
    }

    pub fn get(&self, id: TrackId) -> Option<&TrackedObject> {
        let index = id.0.checked_sub(1)? as usize;
        self.objects.get(index)
    }

    fn get_live_mut(&mut self, id: TrackId) -> Option<&mut TrackedObject> {
        let index = id.0.checked_sub(1)? as usize;
        self.objects.get_mut(index).filter(|obj| obj.is_live())
    }

    /// Live (Active or Lost) objects in ascending id order
    pub fn iter_active(&self) -> impl Iterator<Item = &TrackedObject> + '_ {
        self.objects.iter().filter(|obj| obj.is_live())
    }

    pub fn active_ids(&self) -> Vec<TrackId> {
        self.iter_active().map(|obj| obj.id).collect()
    }

    /// Every object ever created, removed ones included
    pub fn iter_all(&self) -> impl Iterator<Item = &TrackedObject> + '_ {
        self.objects.iter()
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn removed_count(&self) -> usize {
        self.objects.len() - self.live
    }

    /// Count a failed tracker update against a live object.
    ///
    /// Returns None when the id is unknown or already removed.
    pub fn mark_failed_update(&mut self, id: TrackId, frame: u64) -> Option<UpdateOutcome> {
        let max_lost = self.policy.max_lost_frames;
        let decay = self.policy.decay_failure;
        let obj = self.get_live_mut(id)?;

        obj.lost_frames += 1;
        obj.confidence *= decay;

        if obj.lost_frames > max_lost || obj.confidence < CONFIDENCE_FLOOR {
            self.remove(id, RemovalReason::Lost, frame);
            return Some(UpdateOutcome::Removed);
        }

        obj.state = TrackState::Lost;
        Some(UpdateOutcome::Lost {
            lost_frames: obj.lost_frames,
        })
    }

    /// Apply a box reported by the tracker. Boxes that fail the validity check
    /// count as a failed update.
    pub fn mark_successful_update(
        &mut self,
        id: TrackId,
        bbox: Bbox,
        frame: u64,
    ) -> Option<UpdateOutcome> {
        if !is_valid(&bbox, &self.policy.bounds) {
            log::debug!("Track {} reported invalid box {} at frame {}", id, bbox, frame);
            return self.mark_failed_update(id, frame);
        }

        let decay = self.policy.decay_success;
        let obj = self.get_live_mut(id)?;
        obj.bbox = bbox;
        obj.confidence = (obj.confidence * decay).max(MIN_TRACKED_CONFIDENCE);
        obj.lost_frames = 0;
        obj.last_update_frame = frame;
        obj.update_count += 1;
        obj.state = TrackState::Active;
        Some(UpdateOutcome::Updated)
    }

    /// Move a live object to Removed. Returns false if it was not live.
    pub fn remove(&mut self, id: TrackId, reason: RemovalReason, frame: u64) -> bool {
        let Some(obj) = self.get_live_mut(id) else {
            return false;
        };
        obj.state = TrackState::Removed;
        obj.removal_reason = Some(reason);
        obj.removed_frame = Some(frame);
        self.live -= 1;
        log::debug!("Removed track {} ({}) at frame {}", id, reason, frame);
        true
    }

    pub fn into_objects(self) -> Vec<TrackedObject> {
        self.objects
    }
}
