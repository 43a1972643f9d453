use super::detection::Detection;
use super::frame::Frame;

/// Unit of hand-off between a producer and the stream consumers.
///
/// `detections` is only present for pushed frames that carried their own
/// detection payload; consumers then skip the detector for that frame.
#[derive(Clone, Debug)]
pub struct FramePacket {
    pub frame: Frame,
    pub detections: Option<Vec<Detection>>,
}

impl FramePacket {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            detections: None,
        }
    }

    pub fn with_detections(frame: Frame, detections: Vec<Detection>) -> Self {
        Self {
            frame,
            detections: Some(detections),
        }
    }
}
