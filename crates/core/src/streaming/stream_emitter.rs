use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::shared::constants::{DEFAULT_JPEG_QUALITY, MULTIPART_BOUNDARY};
use crate::shared::error::PipelineError;
use crate::shared::frame::Frame;

const PART_HEADER: &[u8] = b"Content-Type: image/jpeg\r\n\r\n";

/// Encodes annotated frames for transport.
#[derive(Clone, Debug)]
pub struct StreamEmitter {
    quality: u8,
}

impl StreamEmitter {
    /// `quality` is clamped to the JPEG range 1..=100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn encode_jpeg(&self, frame: &Frame) -> Result<Vec<u8>, PipelineError> {
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, self.quality)
            .write_image(
                frame.data(),
                frame.width(),
                frame.height(),
                ExtendedColorType::Rgb8,
            )
            .map_err(|source| PipelineError::EncodeFailure {
                sequence: frame.sequence(),
                source,
            })?;
        Ok(buffer)
    }
}

impl Default for StreamEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

/// `--frame\r\nContent-Type: image/jpeg\r\n\r\n<jpeg>\r\n`
pub fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    let boundary = boundary_line();
    let mut chunk = Vec::with_capacity(boundary.len() + PART_HEADER.len() + jpeg.len() + 2);
    chunk.extend_from_slice(&boundary);
    chunk.extend_from_slice(PART_HEADER);
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    chunk
}

fn boundary_line() -> Vec<u8> {
    format!("--{MULTIPART_BOUNDARY}\r\n").into_bytes()
}

/// Splits a concatenation of multipart chunks back into the image payloads.
///
/// Returns `None` if the bytes are not a sequence of complete chunks.
pub fn split_multipart(mut bytes: &[u8]) -> Option<Vec<Vec<u8>>> {
    let boundary = boundary_line();
    let mut payloads = Vec::new();
    while !bytes.is_empty() {
        bytes = bytes.strip_prefix(boundary.as_slice())?;
        // Skip part headers up to the blank line.
        let header_end = find(bytes, b"\r\n\r\n")? + 4;
        bytes = &bytes[header_end..];

        let body_end = match find(bytes, &[b"\r\n".as_slice(), &boundary].concat()) {
            Some(pos) => pos,
            None => bytes.len().checked_sub(2)?,
        };
        if bytes.get(body_end..body_end + 2) != Some(b"\r\n".as_slice()) {
            return None;
        }
        payloads.push(bytes[..body_end].to_vec());
        bytes = &bytes[body_end + 2..];
    }
    Some(payloads)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
