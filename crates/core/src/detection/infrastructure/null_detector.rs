use crate::detection::domain::detector::Detector;
use crate::shared::detection::Detection;
use crate::shared::frame::Frame;

/// Detector that never finds anything; frames pass through unannotated.
pub struct NullDetector;

impl Detector for NullDetector {
    fn detect(
        &mut self,
        _frame: &Frame,
        _track_enabled: bool,
    ) -> Result<Vec<Detection>, Box<dyn std::error::Error>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_no_detections() {
        let frame = Frame::new(vec![0u8; 12], 2, 2, 3, 0);
        assert!(NullDetector.detect(&frame, true).unwrap().is_empty());
    }
}
