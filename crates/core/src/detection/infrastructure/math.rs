//! Box geometry shared by the pose detector and the tracker.

/// `[x1, y1, x2, y2]` in pixels.
pub type BBox = [f64; 4];

pub fn bbox_area(b: &BBox) -> f64 {
    (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0)
}

/// Intersection over union; zero for disjoint or degenerate boxes.
pub fn bbox_iou(a: &BBox, b: &BBox) -> f64 {
    let overlap: BBox = [a[0].max(b[0]), a[1].max(b[1]), a[2].min(b[2]), a[3].min(b[3])];
    let inter = bbox_area(&overlap);
    if inter <= 0.0 {
        return 0.0;
    }
    inter / (bbox_area(a) + bbox_area(b) - inter)
}
