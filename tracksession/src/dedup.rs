//! Periodic removal of live tracks that drifted onto each other

use crate::config::{DedupTieBreak, SessionConfig};
use crate::store::TrackStore;
use crate::types::{RemovalReason, TrackId, TrackedObject};
use boxtrack::Bbox;
use std::cmp::Ordering;

/// Result of one dedup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupOutcome {
    /// Pairs whose overlap was measured
    pub compared: usize,
    /// Tracks removed as duplicates, in removal order
    pub removed: Vec<TrackId>,
}

impl DedupOutcome {
    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }
}

/// Whether a dedup pass is scheduled on this frame
pub fn is_due(frame: u64, interval: u64) -> bool {
    interval > 0 && frame % interval == 0
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    id: TrackId,
    bbox: Bbox,
    confidence: f32,
    created_frame: u64,
}

impl From<&TrackedObject> for Candidate {
    fn from(obj: &TrackedObject) -> Self {
        Self {
            id: obj.id,
            bbox: obj.bbox,
            confidence: obj.confidence,
            created_frame: obj.created_frame,
        }
    }
}

/// Which side of a duplicate pair to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keep {
    First,
    Second,
}

fn choose(policy: DedupTieBreak, a: &Candidate, b: &Candidate) -> Keep {
    let by_id = if a.id <= b.id { Keep::First } else { Keep::Second };
    match policy {
        DedupTieBreak::KeepHigherConfidence => match a.confidence.total_cmp(&b.confidence) {
            Ordering::Greater => Keep::First,
            Ordering::Less => Keep::Second,
            Ordering::Equal => by_id,
        },
        DedupTieBreak::KeepOlderTracker => match a.created_frame.cmp(&b.created_frame) {
            Ordering::Less => Keep::First,
            Ordering::Greater => Keep::Second,
            Ordering::Equal => by_id,
        },
        DedupTieBreak::KeepLargerBbox => {
            if b.bbox.area() > a.bbox.area() {
                Keep::Second
            } else {
                Keep::First
            }
        }
    }
}

/// Single pass over live tracks sorted by confidence (descending, ties by id).
///
/// Every pair whose IoU exceeds the dedup IoU threshold, or whose overlap ratio
/// exceeds `overlap_threshold`, loses one member to the tie-break policy. Tracks
/// removed earlier in the pass are skipped, so an overlapping chain collapses in
/// comparison order rather than by full clustering.
pub fn deduplicate(store: &mut TrackStore, frame: u64, config: &SessionConfig) -> DedupOutcome {
    let mut candidates: Vec<Candidate> = store.iter_active().map(Candidate::from).collect();
    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.id.cmp(&b.id))
    });

    let iou_threshold = config.dedup_iou();
    let mut removed = vec![false; candidates.len()];
    let mut outcome = DedupOutcome::default();

    for i in 0..candidates.len() {
        if removed[i] {
            continue;
        }
        for j in (i + 1)..candidates.len() {
            if removed[j] {
                continue;
            }
            let (a, b) = (&candidates[i], &candidates[j]);
            outcome.compared += 1;

            let iou = a.bbox.iou(&b.bbox);
            let overlap = a.bbox.overlap_ratio(&b.bbox);
            if iou <= iou_threshold && overlap <= config.overlap_threshold {
                continue;
            }

            let (loser, keeper) = match choose(config.dedup_tie_break, a, b) {
                Keep::First => (j, i),
                Keep::Second => (i, j),
            };
            log::debug!(
                "Dedup: {} duplicates {} (IoU {:.3}, overlap {:.3}), removing {}",
                candidates[loser].id,
                candidates[keeper].id,
                iou,
                overlap,
                candidates[loser].id
            );
            removed[loser] = true;
            store.remove(candidates[loser].id, RemovalReason::Duplicate, frame);
            outcome.removed.push(candidates[loser].id);

            if loser == i {
                break;
            }
        }
    }

    if !outcome.removed.is_empty() {
        log::info!(
            "Dedup at frame {}: removed {} duplicate tracks, {} remaining",
            frame,
            outcome.removed_count(),
            store.live_count()
        );
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LifecyclePolicy;
    use crate::types::{TrackState, VideoMetadata};

    fn store_for(config: &SessionConfig) -> TrackStore {
        let video = VideoMetadata {
            width: 1280,
            height: 720,
            frame_rate: 30.0,
            total_frames: None,
        };
        TrackStore::new(LifecyclePolicy::new(config, &video))
    }

    fn config_with(tie_break: DedupTieBreak) -> SessionConfig {
        SessionConfig {
            dedup_tie_break: tie_break,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_is_due() {
        assert!(is_due(30, 30));
        assert!(is_due(60, 30));
        assert!(!is_due(31, 30));
        assert!(!is_due(5, 0));
    }

    #[test]
    fn test_keep_higher_confidence() {
        let config = config_with(DedupTieBreak::KeepHigherConfidence);
        let mut store = store_for(&config);
        let low = store.create(Bbox::from_xywh(100.0, 100.0, 50.0, 50.0), 0.5, 1);
        let high = store.create(Bbox::from_xywh(105.0, 100.0, 50.0, 50.0), 0.9, 2);

        let outcome = deduplicate(&mut store, 30, &config);
        assert_eq!(outcome.removed, vec![low]);
        assert_eq!(store.active_ids(), vec![high]);
        assert_eq!(
            store.get(low).unwrap().removal_reason,
            Some(RemovalReason::Duplicate)
        );
    }

    #[test]
    fn test_equal_confidence_keeps_lower_id() {
        let config = config_with(DedupTieBreak::KeepHigherConfidence);
        let mut store = store_for(&config);
        let first = store.create(Bbox::from_xywh(100.0, 100.0, 50.0, 50.0), 0.7, 1);
        store.create(Bbox::from_xywh(102.0, 100.0, 50.0, 50.0), 0.7, 1);

        deduplicate(&mut store, 30, &config);
        assert_eq!(store.active_ids(), vec![first]);
    }

    #[test]
    fn test_keep_older_tracker() {
        let config = config_with(DedupTieBreak::KeepOlderTracker);
        let mut store = store_for(&config);
        let old = store.create(Bbox::from_xywh(100.0, 100.0, 50.0, 50.0), 0.4, 1);
        let young = store.create(Bbox::from_xywh(104.0, 100.0, 50.0, 50.0), 0.95, 60);

        let outcome = deduplicate(&mut store, 60, &config);
        assert_eq!(outcome.removed, vec![young]);
        assert_eq!(store.active_ids(), vec![old]);
    }

    #[test]
    fn test_keep_larger_bbox() {
        let config = config_with(DedupTieBreak::KeepLargerBbox);
        let mut store = store_for(&config);
        let small = store.create(Bbox::from_xywh(110.0, 110.0, 20.0, 20.0), 0.9, 1);
        let large = store.create(Bbox::from_xywh(100.0, 100.0, 80.0, 80.0), 0.6, 1);

        deduplicate(&mut store, 30, &config);
        assert_eq!(store.active_ids(), vec![large]);
        assert_eq!(store.get(small).unwrap().state, TrackState::Removed);
    }

    #[test]
    fn test_chain_collapses_in_single_pass() {
        let config = config_with(DedupTieBreak::KeepHigherConfidence);
        let mut store = store_for(&config);
        let best = store.create(Bbox::from_xywh(100.0, 100.0, 50.0, 50.0), 0.9, 1);
        store.create(Bbox::from_xywh(104.0, 100.0, 50.0, 50.0), 0.8, 1);
        store.create(Bbox::from_xywh(108.0, 100.0, 50.0, 50.0), 0.7, 1);

        let outcome = deduplicate(&mut store, 30, &config);
        assert_eq!(outcome.removed_count(), 2);
        assert_eq!(store.active_ids(), vec![best]);
    }

    #[test]
    fn test_second_pass_is_idempotent() {
        let config = config_with(DedupTieBreak::KeepHigherConfidence);
        let mut store = store_for(&config);
        store.create(Bbox::from_xywh(100.0, 100.0, 50.0, 50.0), 0.9, 1);
        store.create(Bbox::from_xywh(110.0, 105.0, 50.0, 50.0), 0.8, 1);
        store.create(Bbox::from_xywh(400.0, 300.0, 50.0, 50.0), 0.8, 1);

        assert_eq!(deduplicate(&mut store, 30, &config).removed_count(), 1);
        assert_eq!(deduplicate(&mut store, 30, &config).removed_count(), 0);
        assert_eq!(store.live_count(), 2);
    }

    #[test]
    fn test_default_trigger_catches_partial_overlap() {
        let config = SessionConfig::default();
        let mut store = store_for(&config);
        let strong = store.create(Bbox::from_xywh(100.0, 100.0, 50.0, 50.0), 0.9, 1);
        let weak = store.create(Bbox::from_xywh(135.0, 100.0, 50.0, 50.0), 0.8, 1);

        let a = store.get(strong).unwrap().bbox;
        let b = store.get(weak).unwrap().bbox;
        assert!((a.iou(&b) - 0.176).abs() < 0.001);
        assert!((a.overlap_ratio(&b) - 0.3).abs() < 0.001);

        // Under the fusion IoU and overlap thresholds, over the dedup IoU trigger
        let outcome = deduplicate(&mut store, 30, &config);
        assert_eq!(outcome.removed, vec![weak]);
        assert_eq!(store.active_ids(), vec![strong]);
    }

    #[test]
    fn test_null_trigger_falls_back_to_iou_threshold() {
        let config = SessionConfig::from_json_str(r#"{"dedup_iou_threshold": null}"#).unwrap();
        assert_eq!(config.dedup_iou(), config.iou_threshold);

        let mut store = store_for(&config);
        store.create(Bbox::from_xywh(100.0, 100.0, 50.0, 50.0), 0.9, 1);
        store.create(Bbox::from_xywh(135.0, 100.0, 50.0, 50.0), 0.8, 1);
        assert_eq!(deduplicate(&mut store, 30, &config).removed_count(), 0);
    }

    #[test]
    fn test_separate_iou_threshold() {
        let config = SessionConfig {
            dedup_iou_threshold: Some(0.9),
            overlap_threshold: 0.95,
            ..SessionConfig::default()
        };
        let mut store = store_for(&config);
        store.create(Bbox::from_xywh(100.0, 100.0, 50.0, 50.0), 0.9, 1);
        store.create(Bbox::from_xywh(110.0, 100.0, 50.0, 50.0), 0.8, 1);

        // IoU 0.67 and overlap 0.8 are under both thresholds
        assert_eq!(deduplicate(&mut store, 30, &config).removed_count(), 0);
    }
}
