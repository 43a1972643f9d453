use thiserror::Error;

/// Failures of the frame pipeline.
///
/// `SourceUnavailable`, `InvalidInterval`, `DegeneratePolygon` and
/// `OutOfBounds` surface at startup. `CaptureFailure` ends the capture
/// thread. `EncodeFailure` costs a single frame. `UnknownTrack` means a
/// caller queried a track outside the synchronize/query ordering.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("video source unavailable: {uri}: {reason}")]
    SourceUnavailable { uri: String, reason: String },

    #[error("capture failed after {attempts} consecutive attempts: {reason}")]
    CaptureFailure { attempts: usize, reason: String },

    #[error("failed to encode frame {sequence}: {source}")]
    EncodeFailure {
        sequence: u64,
        #[source]
        source: image::ImageError,
    },

    #[error("cadence interval must be at least 2, got {0}")]
    InvalidInterval(usize),

    #[error("region polygon needs at least 3 distinct vertices, got {0}")]
    DegeneratePolygon(usize),

    #[error("point ({x}, {y}) lies outside the {width}x{height} mask")]
    OutOfBounds {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },

    #[error("no timer for track {0}")]
    UnknownTrack(u32),
}
