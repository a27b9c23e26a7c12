//! Box geometry and motion primitives for multi-object tracking
//!
//! - [`bbox`]: IoU, overlap ratio and validity checks
//! - [`nms`]: greedy non-maximum suppression over anything [`Scored`]
//! - [`motion`]: constant-velocity Kalman prediction for a single box
//!
//! ```rust
//! use boxtrack::{Bbox, non_max_suppression};
//!
//! let kept = non_max_suppression(
//!     vec![
//!         (Bbox::from_xywh(0.0, 0.0, 10.0, 10.0), 0.9),
//!         (Bbox::from_xywh(1.0, 1.0, 10.0, 10.0), 0.5),
//!     ],
//!     0.3,
//! );
//! assert_eq!(kept.len(), 1);
//! ```

pub mod bbox;
pub mod kalman;
pub mod motion;
pub mod nms;

pub use bbox::{calculate_iou, calculate_overlap_ratio, is_valid, Bbox, ValidityBounds};
pub use motion::{BoxPredictor, MotionNoise};
pub use nms::{nms_indices, non_max_suppression, Scored};
