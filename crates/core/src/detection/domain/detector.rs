use crate::shared::detection::Detection;
use crate::shared::frame::Frame;

/// Domain interface for the object/pose detector.
///
/// Implementations may be stateful (e.g., tracking across invocations),
/// hence `&mut self`. When `track_enabled` is false every returned
/// detection must have `track_id == None`.
pub trait Detector: Send {
    fn detect(
        &mut self,
        frame: &Frame,
        track_enabled: bool,
    ) -> Result<Vec<Detection>, Box<dyn std::error::Error>>;
}

/// Builds one detector per consumer stream.
pub type DetectorFactory =
    Box<dyn Fn() -> Result<Box<dyn Detector>, Box<dyn std::error::Error>> + Send + Sync>;
