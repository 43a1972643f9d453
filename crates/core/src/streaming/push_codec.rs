//! Binary push message: encoded image bytes, optionally followed by
//! [`PUSH_DELIMITER`] and a JSON detection payload.
//!
//! Box rows are `[x1, y1, x2, y2, track_id, conf, class]` when tracked and
//! `[x1, y1, x2, y2, conf, class]` otherwise. `kptss[i]` holds the
//! `[x, y, conf]` keypoints of box `i` and may be shorter than `boxes`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::constants::PUSH_DELIMITER;
use crate::shared::detection::{BoundingBox, Detection, Keypoint};
use crate::shared::frame::Frame;
use crate::shared::frame_packet::FramePacket;

#[derive(Error, Debug)]
pub enum PushDecodeError {
    #[error("cannot decode pushed image: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid detection payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("box row {index} has {len} values, expected 6 or 7")]
    MalformedBox { index: usize, len: usize },

    #[error("box row {index} has a non-finite coordinate")]
    NonFinite { index: usize },
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct DetectionPayload {
    #[serde(default)]
    pub boxes: Vec<Vec<f32>>,
    #[serde(default)]
    pub kptss: Vec<Vec<[f32; 3]>>,
}

impl DetectionPayload {
    pub fn from_detections(detections: &[Detection]) -> Self {
        let boxes = detections
            .iter()
            .map(|d| {
                let b = &d.bbox;
                let mut row = vec![b.min_x, b.min_y, b.max_x, b.max_y];
                if let Some(id) = d.track_id {
                    row.push(id as f32);
                }
                row.push(d.confidence);
                row.push(d.category as f32);
                row
            })
            .collect();
        let kptss = detections
            .iter()
            .map(|d| {
                d.keypoints
                    .iter()
                    .map(|k| [k.x, k.y, k.confidence])
                    .collect()
            })
            .collect();
        Self { boxes, kptss }
    }

    pub fn into_detections(self) -> Result<Vec<Detection>, PushDecodeError> {
        let mut kptss = self.kptss.into_iter();
        self.boxes
            .into_iter()
            .enumerate()
            .map(|(index, row)| {
                let keypoints = kptss
                    .next()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|[x, y, c]| Keypoint::new(x, y, c))
                    .collect();
                let (track_id, confidence, category) = match row.len() {
                    7 => (Some(row[4] as u32), row[5], row[6] as u32),
                    6 => (None, row[4], row[5] as u32),
                    len => return Err(PushDecodeError::MalformedBox { index, len }),
                };
                let bbox = BoundingBox::new(row[0], row[1], row[2], row[3]);
                if !bbox.is_finite() {
                    return Err(PushDecodeError::NonFinite { index });
                }
                Ok(Detection {
                    bbox,
                    track_id,
                    confidence,
                    category,
                    keypoints,
                })
            })
            .collect()
    }
}

/// Builds a push message from already-encoded image bytes.
pub fn encode_push(
    image: &[u8],
    detections: Option<&[Detection]>,
) -> Result<Vec<u8>, serde_json::Error> {
    let mut message = image.to_vec();
    if let Some(detections) = detections {
        message.extend_from_slice(PUSH_DELIMITER);
        serde_json::to_writer(&mut message, &DetectionPayload::from_detections(detections))?;
    }
    Ok(message)
}

/// Splits a push message into image bytes and the optional JSON payload.
///
/// JSON never contains a raw CRLF, so the last delimiter is the separator.
pub fn split_push(message: &[u8]) -> (&[u8], Option<&[u8]>) {
    let n = PUSH_DELIMITER.len();
    if message.len() >= n {
        if let Some(pos) = (0..=message.len() - n)
            .rev()
            .find(|&i| &message[i..i + n] == PUSH_DELIMITER)
        {
            return (&message[..pos], Some(&message[pos + n..]));
        }
    }
    (message, None)
}

/// Decodes a push message into a frame at the output resolution.
///
/// Detection coordinates are scaled along with the image.
pub fn decode_push(
    message: &[u8],
    width: u32,
    height: u32,
    sequence: u64,
) -> Result<FramePacket, PushDecodeError> {
    let (image_bytes, payload) = split_push(message);

    let image = image::load_from_memory(image_bytes)?.to_rgb8();
    let (src_w, src_h) = image.dimensions();
    let frame = Frame::from_rgb_image(image, sequence).resized(width, height);

    let Some(payload) = payload else {
        return Ok(FramePacket::new(frame));
    };
    let payload: DetectionPayload = serde_json::from_slice(payload)?;
    let mut detections = confine_to_image(payload.into_detections()?, src_w, src_h);

    if (src_w, src_h) != (width, height) {
        let sx = width as f32 / src_w as f32;
        let sy = height as f32 / src_h as f32;
        for d in &mut detections {
            d.bbox = BoundingBox::new(
                d.bbox.min_x * sx,
                d.bbox.min_y * sy,
                d.bbox.max_x * sx,
                d.bbox.max_y * sy,
            );
            for k in &mut d.keypoints {
                k.x *= sx;
                k.y *= sy;
            }
        }
    }
    Ok(FramePacket::with_detections(frame, detections))
}

/// Clamps boxes to the pushed image and drops those entirely outside it.
/// Keypoints off the image lose their confidence so they are never drawn.
fn confine_to_image(detections: Vec<Detection>, width: u32, height: u32) -> Vec<Detection> {
    let (w, h) = (width as f32, height as f32);
    detections
        .into_iter()
        .filter_map(|mut d| {
            let b = d.bbox;
            if b.max_x <= 0.0 || b.max_y <= 0.0 || b.min_x >= w || b.min_y >= h {
                log::debug!("Dropping pushed box outside the {width}x{height} image: {b:?}");
                return None;
            }
            d.bbox = BoundingBox::new(
                b.min_x.clamp(0.0, w),
                b.min_y.clamp(0.0, h),
                b.max_x.clamp(0.0, w),
                b.max_y.clamp(0.0, h),
            );
            for k in &mut d.keypoints {
                if !((0.0..w).contains(&k.x) && (0.0..h).contains(&k.y)) {
                    k.x = k.x.clamp(0.0, w);
                    k.y = k.y.clamp(0.0, h);
                    k.confidence = 0.0;
                }
            }
            Some(d)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::codecs::png::PngEncoder;
    use image::{ExtendedColorType, ImageEncoder};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Vec::new();
        PngEncoder::new(&mut out)
            .write_image(
                &vec![200u8; (width * height * 3) as usize],
                width,
                height,
                ExtendedColorType::Rgb8,
            )
            .unwrap();
        out
    }

    fn tracked(id: u32) -> Detection {
        Detection {
            bbox: BoundingBox::new(10.0, 20.0, 30.0, 40.0),
            track_id: Some(id),
            confidence: 0.75,
            category: 0,
            keypoints: vec![Keypoint::new(12.0, 22.0, 0.9)],
        }
    }

    #[test]
    fn test_image_only_message() {
        let packet = decode_push(&png(8, 6), 8, 6, 3).unwrap();
        assert_eq!(packet.frame.sequence(), 3);
        assert_eq!((packet.frame.width(), packet.frame.height()), (8, 6));
        assert!(packet.detections.is_none());
    }

    #[test]
    fn test_image_resized_to_output_resolution() {
        let packet = decode_push(&png(16, 12), 8, 6, 0).unwrap();
        assert_eq!((packet.frame.width(), packet.frame.height()), (8, 6));
    }

    #[test]
    fn test_tracked_and_untracked_rows() {
        let json = br#"{"boxes": [[1,2,3,4,9,0.8,0],[5,6,7,8,0.6,2]], "kptss": [[[1,1,0.5]]]}"#;
        let message = [png(16, 12).as_slice(), PUSH_DELIMITER, json.as_slice()].concat();
        let detections = decode_push(&message, 16, 12, 0).unwrap().detections.unwrap();

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].track_id, Some(9));
        assert_relative_eq!(detections[0].confidence, 0.8);
        assert_eq!(detections[0].keypoints.len(), 1);
        assert_eq!(detections[1].track_id, None);
        assert_eq!(detections[1].category, 2);
        assert!(detections[1].keypoints.is_empty());
    }

    #[test]
    fn test_missing_kptss_defaults_to_empty() {
        let json = br#"{"boxes": [[1,2,3,4,0.8,0]]}"#;
        let message = [png(4, 4).as_slice(), PUSH_DELIMITER, json.as_slice()].concat();
        let detections = decode_push(&message, 4, 4, 0).unwrap().detections.unwrap();
        assert_eq!(detections.len(), 1);
    }

    #[test]
    fn test_malformed_box_row() {
        let json = br#"{"boxes": [[1,2,3,4,0.8]]}"#;
        let message = [png(4, 4).as_slice(), PUSH_DELIMITER, json.as_slice()].concat();
        assert!(matches!(
            decode_push(&message, 4, 4, 0),
            Err(PushDecodeError::MalformedBox { index: 0, len: 5 })
        ));
    }

    #[test]
    fn test_bad_json_and_bad_image() {
        let message = [png(4, 4).as_slice(), PUSH_DELIMITER, b"{nope".as_slice()].concat();
        assert!(matches!(
            decode_push(&message, 4, 4, 0),
            Err(PushDecodeError::Json(_))
        ));
        assert!(matches!(
            decode_push(b"not an image", 4, 4, 0),
            Err(PushDecodeError::Image(_))
        ));
    }

    #[test]
    fn test_detections_scaled_with_image() {
        let json = br#"{"boxes": [[10,20,30,40,0.9,0]], "kptss": [[[10,20,1.0]]]}"#;
        let message = [png(64, 48).as_slice(), PUSH_DELIMITER, json.as_slice()].concat();
        let detections = decode_push(&message, 32, 24, 0).unwrap().detections.unwrap();
        assert_eq!(detections[0].bbox, BoundingBox::new(5.0, 10.0, 15.0, 20.0));
        assert_relative_eq!(detections[0].keypoints[0].x, 5.0);
        assert_relative_eq!(detections[0].keypoints[0].y, 10.0);
    }

    #[test]
    fn test_far_away_boxes_are_dropped() {
        let json = br#"{"boxes": [[3e9,0,3e9,10,0.9,0],[3e9,3e9,3e9,3e9,0.9,0],[1,1,4,4,0.9,0]]}"#;
        let message = [png(8, 6).as_slice(), PUSH_DELIMITER, json.as_slice()].concat();
        let detections = decode_push(&message, 8, 6, 0).unwrap().detections.unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox, BoundingBox::new(1.0, 1.0, 4.0, 4.0));
    }

    #[test]
    fn test_overhanging_box_and_keypoints_are_confined() {
        let json = br#"{"boxes": [[-50,2,300,5,0.9,0]], "kptss": [[[2,2,0.9],[-1e9,3,0.9]]]}"#;
        let message = [png(8, 6).as_slice(), PUSH_DELIMITER, json.as_slice()].concat();
        let detections = decode_push(&message, 8, 6, 0).unwrap().detections.unwrap();

        assert_eq!(detections[0].bbox, BoundingBox::new(0.0, 2.0, 8.0, 5.0));
        assert_relative_eq!(detections[0].keypoints[0].confidence, 0.9);
        assert_relative_eq!(detections[0].keypoints[1].confidence, 0.0);
        assert_relative_eq!(detections[0].keypoints[1].x, 0.0);
    }

    #[test]
    fn test_confined_boxes_render_and_filter() {
        use crate::overlay::overlay_renderer::{OverlayRenderer, RenderConfig};
        use crate::pipeline::region_filter::RegionFilter;
        use crate::shared::skeleton::SkeletonSchema;

        let json = br#"{"boxes": [[3e9,0,3e9,10,0.9,0],[-3e9,-3e9,3e9,3e9,0.9,0]]}"#;
        let message = [png(8, 6).as_slice(), PUSH_DELIMITER, json.as_slice()].concat();
        let packet = decode_push(&message, 8, 6, 0).unwrap();
        let mut frame = packet.frame;
        let detections = packet.detections.unwrap();
        assert_eq!(detections.len(), 1);

        let region = RegionFilter::new(&[(0, 0), (7, 0), (7, 5), (0, 5)], 8, 6).unwrap();
        let kept = region.filter(detections.clone());
        assert_eq!(kept.len(), 1);
        OverlayRenderer::new(RenderConfig::default(), SkeletonSchema::coco17())
            .render(&mut frame, &detections, None, Some(region.vertices()));
    }

    #[test]
    fn test_non_finite_box_rejected() {
        let payload = DetectionPayload {
            boxes: vec![vec![f32::INFINITY, 0.0, 1.0, 1.0, 0.9, 0.0]],
            kptss: Vec::new(),
        };
        assert!(matches!(
            payload.into_detections(),
            Err(PushDecodeError::NonFinite { index: 0 })
        ));
    }

    #[test]
    fn test_split_uses_last_delimiter() {
        let message = [b"img".as_slice(), PUSH_DELIMITER, b"more".as_slice(), PUSH_DELIMITER, b"{}".as_slice()].concat();
        let (image, payload) = split_push(&message);
        assert_eq!(image, [b"img".as_slice(), PUSH_DELIMITER, b"more".as_slice()].concat());
        assert_eq!(payload, Some(b"{}".as_slice()));
        assert_eq!(split_push(b"abc"), (b"abc".as_slice(), None));
    }

    #[test]
    fn test_encoded_detections_decode_back() {
        let detections = vec![tracked(4), Detection { track_id: None, ..tracked(0) }];
        let message = encode_push(&png(40, 50), Some(&detections)).unwrap();
        let decoded = decode_push(&message, 40, 50, 0).unwrap().detections.unwrap();
        assert_eq!(decoded, detections);
    }

    #[test]
    fn test_encode_without_detections_is_raw_image() {
        let image = png(4, 4);
        assert_eq!(encode_push(&image, None).unwrap(), image);
    }
}
