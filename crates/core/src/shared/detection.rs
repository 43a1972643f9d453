/// Axis-aligned box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl BoundingBox {
    pub fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Corners truncated toward zero, the way pixel coordinates are drawn.
    pub fn truncated(&self) -> (i32, i32, i32, i32) {
        (
            self.min_x as i32,
            self.min_y as i32,
            self.max_x as i32,
            self.max_y as i32,
        )
    }

    /// Integer midpoint of the truncated corners, using floor division.
    ///
    /// Summed in `i64`, so corners saturated at the `i32` limits still give
    /// an in-range midpoint.
    pub fn center(&self) -> (i32, i32) {
        let (x1, y1, x2, y2) = self.truncated();
        let mid = |a: i32, b: i32| (i64::from(a) + i64::from(b)).div_euclid(2) as i32;
        (mid(x1, x2), mid(y1, y2))
    }

    pub fn is_finite(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite())
    }

    pub fn as_array(&self) -> [f64; 4] {
        [
            self.min_x as f64,
            self.min_y as f64,
            self.max_x as f64,
            self.max_y as f64,
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }
}

/// One physical object/person instance reported by a detector.
///
/// `track_id` is `None` whenever the detector ran with tracking disabled.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub track_id: Option<u32>,
    pub confidence: f32,
    pub category: u32,
    pub keypoints: Vec<Keypoint>,
}

impl Detection {
    /// Track ids of all tracked detections, in order of appearance.
    pub fn track_ids(detections: &[Detection]) -> Vec<u32> {
        detections.iter().filter_map(|d| d.track_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn detection(track_id: Option<u32>) -> Detection {
        Detection {
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            track_id,
            confidence: 0.9,
            category: 0,
            keypoints: Vec::new(),
        }
    }

    #[rstest]
    #[case(BoundingBox::new(10.0, 20.0, 20.0, 40.0), (15, 30))]
    #[case(BoundingBox::new(10.9, 20.9, 21.9, 41.9), (15, 30))]
    #[case(BoundingBox::new(0.0, 0.0, 1.0, 1.0), (0, 0))]
    #[case(BoundingBox::new(-3.0, -3.0, 0.0, 0.0), (-2, -2))]
    #[case(BoundingBox::new(3e9, 3e9, 3e9, 3e9), (i32::MAX, i32::MAX))]
    #[case(BoundingBox::new(-3e9, -3e9, 3e9, 3e9), (-1, -1))]
    fn test_center_truncates_then_floors(#[case] bbox: BoundingBox, #[case] expected: (i32, i32)) {
        assert_eq!(bbox.center(), expected);
    }

    #[test]
    fn test_truncated_drops_fraction() {
        let bbox = BoundingBox::new(1.7, 2.2, 3.99, 4.5);
        assert_eq!(bbox.truncated(), (1, 2, 3, 4));
    }

    #[test]
    fn test_track_ids_skips_untracked() {
        let dets = vec![detection(Some(4)), detection(None), detection(Some(2))];
        assert_eq!(Detection::track_ids(&dets), vec![4, 2]);
    }
}
