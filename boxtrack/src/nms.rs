//! Greedy non-maximum suppression over scored boxes

use crate::bbox::Bbox;

/// Anything carrying a box and a confidence can be suppressed
pub trait Scored {
    fn bbox(&self) -> &Bbox;
    fn confidence(&self) -> f32;
}

impl Scored for (Bbox, f32) {
    fn bbox(&self) -> &Bbox {
        &self.0
    }

    fn confidence(&self) -> f32 {
        self.1
    }
}

/// Indices of the items NMS keeps, in descending confidence order.
///
/// Ties in confidence keep input order, so equal input always yields equal output.
/// NaN confidences sort last.
pub fn nms_indices<T: Scored>(items: &[T], iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| {
        items[b]
            .confidence()
            .partial_cmp(&items[a].confidence())
            .unwrap_or_else(|| items[a].confidence().is_nan().cmp(&items[b].confidence().is_nan()))
            .then(a.cmp(&b))
    });

    let mut keep: Vec<usize> = Vec::with_capacity(order.len());
    for index in order {
        let candidate = items[index].bbox();
        let suppressed = keep
            .iter()
            .any(|&kept| items[kept].bbox().iou(candidate) > iou_threshold);
        if !suppressed {
            keep.push(index);
        }
    }
    keep
}

/// Reduce `items` to a non-overlapping subset, highest confidence first
pub fn non_max_suppression<T: Scored>(items: Vec<T>, iou_threshold: f32) -> Vec<T> {
    let keep = nms_indices(&items, iou_threshold);

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    keep.into_iter()
        .filter_map(|index| slots[index].take())
        .collect()
}
