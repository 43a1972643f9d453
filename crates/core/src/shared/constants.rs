/// Default display resolution (width, height).
pub const DEFAULT_RESOLUTION: (u32, u32) = (640, 360);

/// Run the detector on every Nth frame.
pub const DEFAULT_CADENCE_INTERVAL: usize = 3;

/// Consecutive grab/decode failures tolerated before capture gives up.
pub const DEFAULT_CAPTURE_RETRIES: usize = 3;

pub const DEFAULT_BOX_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_KEYPOINT_CONFIDENCE: f32 = 0.5;

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Max detector invocations a track can be lost before ByteTrack drops it.
pub const TRACKER_MAX_LOST: usize = 30;

pub const MULTIPART_BOUNDARY: &str = "frame";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Separates image bytes from the JSON detection payload in push messages.
pub const PUSH_DELIMITER: &[u8] = b"\r\n--detections--\r\n";
