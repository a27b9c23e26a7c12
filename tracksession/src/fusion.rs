//! Merges a detection batch into the tracked-object store

use crate::config::SessionConfig;
use crate::store::TrackStore;
use crate::types::{Detection, TrackId};
use boxtrack::{is_valid, non_max_suppression, Bbox};
use rayon::prelude::*;

/// Accounting for one fusion round
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusionOutcome {
    /// Detections handed to fusion
    pub raw: usize,
    /// Dropped for confidence under the floor
    pub below_floor: usize,
    /// Dropped by non-maximum suppression
    pub suppressed: usize,
    /// Dropped for overlapping a live track
    pub rejected_overlap: usize,
    /// Dropped by the size and boundary checks
    pub rejected_invalid: usize,
    /// New tracks, in creation order
    pub created: Vec<TrackId>,
    /// Live tracks re-observed by a rejected detection, with the detected box.
    /// At most one entry per track, from its most confident match.
    pub observed: Vec<(TrackId, Bbox)>,
}

impl FusionOutcome {
    pub fn created_count(&self) -> usize {
        self.created.len()
    }
}

fn duplicates(a: &Bbox, b: &Bbox, config: &SessionConfig) -> bool {
    a.iou(b) > config.iou_threshold || a.overlap_ratio(b) > config.overlap_threshold
}

/// Live track the box duplicates, preferring the highest IoU
fn best_match(bbox: &Bbox, existing: &[(TrackId, Bbox)], config: &SessionConfig) -> Option<TrackId> {
    existing
        .iter()
        .filter(|(_, live)| duplicates(bbox, live, config))
        .max_by(|(a_id, a), (b_id, b)| {
            a.iou(bbox)
                .total_cmp(&b.iou(bbox))
                .then_with(|| b_id.cmp(a_id))
        })
        .map(|(id, _)| *id)
}

/// Create tracks for the detections that do not duplicate a live track.
///
/// Detections are filtered by the confidence floor, reduced with NMS, then each
/// survivor is compared against every live track (including tracks created earlier
/// in this call) and finally checked for size and frame bounds. A survivor that
/// duplicates an existing track is reported in `observed` instead of creating one.
pub fn fuse(
    detections: Vec<Detection>,
    frame: u64,
    store: &mut TrackStore,
    config: &SessionConfig,
) -> FusionOutcome {
    let mut outcome = FusionOutcome {
        raw: detections.len(),
        ..FusionOutcome::default()
    };

    let confident: Vec<Detection> = detections
        .into_iter()
        .filter(|d| d.confidence >= config.confidence_threshold)
        .collect();
    outcome.below_floor = outcome.raw - confident.len();

    let before_nms = confident.len();
    let survivors = non_max_suppression(confident, config.nms_threshold);
    outcome.suppressed = before_nms - survivors.len();

    let existing: Vec<(TrackId, Bbox)> = store.iter_active().map(|obj| (obj.id, obj.bbox)).collect();
    let matches: Vec<Option<TrackId>> = survivors
        .par_iter()
        .map(|d| best_match(&d.bbox, &existing, config))
        .collect();

    let bounds = store.policy().bounds;
    let mut created_boxes: Vec<Bbox> = Vec::new();

    for (detection, matched) in survivors.into_iter().zip(matches) {
        if let Some(id) = matched {
            outcome.rejected_overlap += 1;
            if outcome.observed.iter().all(|(seen, _)| *seen != id) {
                outcome.observed.push((id, detection.bbox));
            }
            continue;
        }
        if created_boxes.iter().any(|b| duplicates(&detection.bbox, b, config)) {
            outcome.rejected_overlap += 1;
            continue;
        }
        if !is_valid(&detection.bbox, &bounds) {
            log::debug!(
                "Rejected detection {} at frame {}: size or bounds",
                detection.bbox,
                frame
            );
            outcome.rejected_invalid += 1;
            continue;
        }

        created_boxes.push(detection.bbox);
        let id = store.create_labeled(detection.bbox, detection.confidence, detection.label, frame);
        outcome.created.push(id);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LifecyclePolicy;
    use crate::types::VideoMetadata;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn store_for(config: &SessionConfig) -> TrackStore {
        let video = VideoMetadata {
            width: 640,
            height: 480,
            frame_rate: 30.0,
            total_frames: None,
        };
        TrackStore::new(LifecyclePolicy::new(config, &video))
    }

    #[test]
    fn test_nms_collapses_cluster() {
        let config = SessionConfig::default();
        let mut store = store_for(&config);
        let detections = vec![
            Detection::new(Bbox::new(100.0, 100.0, 200.0, 200.0), 0.9),
            Detection::new(Bbox::new(105.0, 105.0, 205.0, 205.0), 0.8),
            Detection::new(Bbox::new(400.0, 100.0, 450.0, 150.0), 0.7),
        ];

        let outcome = fuse(detections, 1, &mut store, &config);
        assert_eq!(outcome.raw, 3);
        assert_eq!(outcome.suppressed, 1);
        assert_eq!(outcome.created_count(), 2);
        assert_eq!(store.get(outcome.created[0]).unwrap().confidence, 0.9);
    }

    #[test]
    fn test_rejects_overlap_with_live_track() {
        let config = SessionConfig::default();
        let mut store = store_for(&config);
        store.create(Bbox::new(100.0, 100.0, 200.0, 200.0), 0.8, 1);

        // Low IoU but fully nested, caught by the overlap ratio
        let nested = Detection::new(Bbox::new(120.0, 120.0, 150.0, 150.0), 0.9);
        let far = Detection::new(Bbox::new(300.0, 300.0, 350.0, 350.0), 0.9);

        let outcome = fuse(vec![nested, far], 60, &mut store, &config);
        assert_eq!(outcome.rejected_overlap, 1);
        assert_eq!(outcome.created_count(), 1);
        assert_eq!(store.get(outcome.created[0]).unwrap().created_frame, 60);
    }

    #[test]
    fn test_rejected_detection_reobserves_best_track() {
        let config = SessionConfig::default();
        let mut store = store_for(&config);
        let left = store.create(Bbox::new(100.0, 100.0, 200.0, 200.0), 0.8, 1);
        let right = store.create(Bbox::new(300.0, 100.0, 400.0, 200.0), 0.8, 1);

        let moved = Bbox::new(310.0, 105.0, 410.0, 205.0);
        let weaker = Bbox::new(305.0, 100.0, 405.0, 200.0);
        let outcome = fuse(
            vec![Detection::new(weaker, 0.6), Detection::new(moved, 0.9)],
            60,
            &mut store,
            &config,
        );

        assert_eq!(outcome.created_count(), 0);
        assert_eq!(outcome.rejected_overlap, 1);
        assert_eq!(outcome.observed, vec![(right, moved)]);
        assert!(outcome.observed.iter().all(|(id, _)| *id != left));
    }

    #[test]
    fn test_floor_and_validity_filters() {
        let config = SessionConfig::default();
        let mut store = store_for(&config);
        let detections = vec![
            Detection::new(Bbox::new(10.0, 10.0, 60.0, 60.0), 0.2),
            Detection::new(Bbox::new(100.0, 100.0, 103.0, 103.0), 0.9),
            Detection::new(Bbox::new(900.0, 900.0, 950.0, 950.0), 0.9),
            Detection::new(Bbox::new(200.0, 200.0, 260.0, 260.0), 0.6).with_label("car"),
        ];

        let outcome = fuse(detections, 1, &mut store, &config);
        assert_eq!(outcome.below_floor, 1);
        assert_eq!(outcome.rejected_invalid, 2);
        assert_eq!(outcome.created_count(), 1);
        assert_eq!(store.get(outcome.created[0]).unwrap().label.as_deref(), Some("car"));
    }

    #[test]
    fn test_never_creates_overlapping_tracks() {
        let config = SessionConfig::default();
        let mut rng = StdRng::seed_from_u64(7);

        for round in 0..20u64 {
            let mut store = store_for(&config);
            for _ in 0..3 {
                let detections: Vec<Detection> = (0..15)
                    .map(|_| {
                        let x = rng.gen_range(0.0..560.0);
                        let y = rng.gen_range(0.0..400.0);
                        let w = rng.gen_range(8.0..80.0);
                        let h = rng.gen_range(8.0..80.0);
                        Detection::new(Bbox::from_xywh(x, y, w, h), rng.gen_range(0.5..1.0))
                    })
                    .collect();
                fuse(detections, round + 1, &mut store, &config);
            }

            let live: Vec<Bbox> = store.iter_active().map(|o| o.bbox).collect();
            for (i, a) in live.iter().enumerate() {
                for b in &live[i + 1..] {
                    assert!(a.iou(b) <= config.iou_threshold);
                    assert!(a.overlap_ratio(b) <= config.overlap_threshold);
                }
            }
        }
    }
}
