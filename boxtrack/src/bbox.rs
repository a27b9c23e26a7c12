//! Bounding box operations, overlap metrics and validity checks

use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned box in pixel coordinates, stored as corners
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Create from top-left corner plus size
    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    /// Corners are swapped where needed so that width and height are non-negative
    pub fn normalized(&self) -> Self {
        Self {
            xmin: self.xmin.min(self.xmax),
            ymin: self.ymin.min(self.ymax),
            xmax: self.xmin.max(self.xmax),
            ymax: self.ymin.max(self.ymax),
        }
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center_x(&self) -> f32 {
        (self.xmin + self.xmax) / 2.0
    }

    pub fn center_y(&self) -> f32 {
        (self.ymin + self.ymax) / 2.0
    }

    pub fn is_finite(&self) -> bool {
        self.xmin.is_finite() && self.ymin.is_finite() && self.xmax.is_finite() && self.ymax.is_finite()
    }

    /// Area shared with `other`, zero when the boxes only touch or are disjoint
    pub fn intersection_area(&self, other: &Bbox) -> f32 {
        let x1 = self.xmin.max(other.xmin);
        let y1 = self.ymin.max(other.ymin);
        let x2 = self.xmax.min(other.xmax);
        let y2 = self.ymax.min(other.ymax);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }
        (x2 - x1) * (y2 - y1)
    }

    pub fn iou(&self, other: &Bbox) -> f32 {
        calculate_iou(self, other)
    }

    pub fn overlap_ratio(&self, other: &Bbox) -> f32 {
        calculate_overlap_ratio(self, other)
    }

    /// Convert to center format [center_x, center_y, area, aspect_ratio]
    /// Used as the Kalman measurement vector
    pub fn to_z(&self) -> [f32; 4] {
        let w = self.width();
        let h = self.height();
        let aspect_ratio = if h != 0.0 { w / h } else { 1.0 };
        [self.center_x(), self.center_y(), w * h, aspect_ratio]
    }

    /// Create from center format [center_x, center_y, area, aspect_ratio]
    pub fn from_z(z: &[f32; 4]) -> Self {
        let [center_x, center_y, area, aspect_ratio] = *z;

        let h = (area / aspect_ratio).sqrt();
        let w = aspect_ratio * h;

        Self {
            xmin: center_x - w / 2.0,
            ymin: center_y - h / 2.0,
            xmax: center_x + w / 2.0,
            ymax: center_y + h / 2.0,
        }
    }
}

impl fmt::Display for Bbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bbox({:.1}, {:.1}, {:.1}, {:.1})",
            self.xmin, self.ymin, self.xmax, self.ymax
        )
    }
}

/// Calculate IoU between two bounding boxes
pub fn calculate_iou(bbox1: &Bbox, bbox2: &Bbox) -> f32 {
    let intersection = bbox1.intersection_area(bbox2);
    if intersection <= 0.0 {
        return 0.0;
    }

    let union = bbox1.area() + bbox2.area() - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Intersection divided by the smaller of the two areas.
///
/// A small box nested inside a large one scores 1.0 here while its IoU stays low.
pub fn calculate_overlap_ratio(bbox1: &Bbox, bbox2: &Bbox) -> f32 {
    let intersection = bbox1.intersection_area(bbox2);
    if intersection <= 0.0 {
        return 0.0;
    }

    let smaller = bbox1.area().min(bbox2.area());
    if smaller > 0.0 {
        intersection / smaller
    } else {
        0.0
    }
}

/// Frame extent and size limits a box must satisfy to be tracked
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidityBounds {
    pub frame_width: f32,
    pub frame_height: f32,
    /// Minimum width and height in pixels
    pub min_size: f32,
    /// Slack added around the frame before a box counts as outside
    pub margin: f32,
    /// When false only the size checks apply
    pub check_boundary: bool,
}

impl ValidityBounds {
    pub fn new(frame_width: u32, frame_height: u32, min_size: f32, margin: f32) -> Self {
        Self {
            frame_width: frame_width as f32,
            frame_height: frame_height as f32,
            min_size,
            margin,
            check_boundary: true,
        }
    }

    pub fn with_boundary_check(mut self, check_boundary: bool) -> Self {
        self.check_boundary = check_boundary;
        self
    }
}

/// Reject non-finite boxes, boxes with non-positive or too small sides, and boxes
/// lying entirely outside the frame grown by `margin` on every side.
pub fn is_valid(bbox: &Bbox, bounds: &ValidityBounds) -> bool {
    if !bbox.is_finite() {
        return false;
    }

    let w = bbox.width();
    let h = bbox.height();
    if w <= 0.0 || h <= 0.0 || w < bounds.min_size || h < bounds.min_size {
        return false;
    }

    if bounds.check_boundary {
        let left = -bounds.margin;
        let top = -bounds.margin;
        let right = bounds.frame_width + bounds.margin;
        let bottom = bounds.frame_height + bounds.margin;

        let outside = bbox.xmax <= left || bbox.xmin >= right || bbox.ymax <= top || bbox.ymin >= bottom;
        if outside {
            return false;
        }
    }

    true
}
