use crate::shared::frame::Frame;

/// A live or file-backed stream of decoded RGB frames.
///
/// Implementations own the decode handle. The pipeline only sees frames,
/// end of stream (`Ok(None)`), or a read error it may retry.
pub trait VideoSource: Send {
    /// The URI or device path this source was created for.
    fn uri(&self) -> &str;

    fn open(&mut self) -> Result<(), Box<dyn std::error::Error>>;

    /// Decodes the next frame. `Ok(None)` marks end of stream.
    fn read(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>>;

    fn is_open(&self) -> bool;

    /// Releases the decode handle. Safe to call more than once.
    fn release(&mut self);
}

/// Maps a bare device index such as `"0"` to `/dev/video0`.
///
/// Anything else (file path, `rtsp://` URL, explicit device) is returned unchanged.
pub fn normalize_source_uri(source: &str) -> String {
    if !source.is_empty() && source.bytes().all(|b| b.is_ascii_digit()) {
        format!("/dev/video{source}")
    } else {
        source.to_string()
    }
}
