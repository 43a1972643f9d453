/// YOLO pose detector using ONNX Runtime via `ort`.
///
/// Handles letterbox preprocessing, inference, NMS post-processing and,
/// when tracking is requested, ByteTrack id assignment.
use std::path::Path;

use crate::detection::domain::detector::Detector;
use crate::shared::detection::{BoundingBox, Detection, Keypoint};
use crate::shared::frame::Frame;

use super::bytetrack_tracker::{ByteTracker, Candidate};
use super::math::bbox_iou;

/// Fallback model input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// Minimum score for a raw prediction to survive decoding.
pub const DEFAULT_CONFIDENCE: f64 = 0.25;

const NMS_IOU_THRESH: f64 = 0.45;

/// COCO person pose models emit 17 keypoints.
pub const DEFAULT_NUM_KEYPOINTS: usize = 17;

pub struct OnnxPoseDetector {
    session: ort::session::Session,
    tracker: ByteTracker,
    confidence: f64,
    num_keypoints: usize,
    input_size: u32,
}

impl OnnxPoseDetector {
    /// Load a YOLO pose ONNX model and prepare for inference.
    ///
    /// The input resolution is read from the model's input shape (expecting NCHW).
    /// Falls back to 640 if the shape is dynamic or unreadable.
    pub fn new(
        model_path: &Path,
        tracker: ByteTracker,
        confidence: f64,
        num_keypoints: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let session = ort::session::Session::builder()?.commit_from_file(model_path)?;

        let input_size = session
            .inputs()
            .first()
            .and_then(|input| {
                if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
                    if shape.len() >= 4 && shape[2] > 0 {
                        Some(shape[2] as u32)
                    } else {
                        None
                    }
                } else {
                    None
                }
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        log::info!(
            "Loaded pose model {} (input {input_size}x{input_size}, {num_keypoints} keypoints)",
            model_path.display()
        );

        Ok(Self {
            session,
            tracker,
            confidence,
            num_keypoints,
            input_size,
        })
    }
}

impl Detector for OnnxPoseDetector {
    fn detect(
        &mut self,
        frame: &Frame,
        track_enabled: bool,
    ) -> Result<Vec<Detection>, Box<dyn std::error::Error>> {
        let (input_tensor, scale, pad_x, pad_y) = letterbox(frame, self.input_size);

        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let outputs = self.session.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("pose model produced no outputs".into());
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let shape = tensor.shape().to_vec();
        if shape.len() != 3 {
            return Err(format!("Unexpected pose output shape: {shape:?}").into());
        }

        // Output is [1, features, predictions] (transposed) or
        // [1, predictions, features].
        let transposed = shape[1] < shape[2];
        let (num_preds, num_feats) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        let num_classes = class_count(num_feats, self.num_keypoints)?;

        let data = tensor.as_slice().ok_or("Cannot get tensor slice")?;
        let letterbox = Letterbox { scale, pad_x, pad_y };

        let mut raw = Vec::new();
        for i in 0..num_preds {
            let row: Vec<f32> = if transposed {
                (0..num_feats).map(|f| data[f * num_preds + i]).collect()
            } else {
                data[i * num_feats..(i + 1) * num_feats].to_vec()
            };
            if let Some(pred) = decode_row(&row, num_classes, &letterbox, self.confidence) {
                raw.push(pred);
            }
        }

        let kept = nms(&mut raw, NMS_IOU_THRESH);

        if !track_enabled {
            return Ok(kept.into_iter().map(|p| p.into_detection(None)).collect());
        }

        let candidates: Vec<Candidate> = kept
            .iter()
            .map(|p| Candidate {
                bbox: p.bbox,
                score: p.confidence,
            })
            .collect();
        let tracks = self.tracker.update(&candidates);

        Ok(tracks
            .iter()
            .filter_map(|track| {
                let index = track.candidate_index?;
                kept.get(index)
                    .cloned()
                    .map(|p| p.into_detection(Some(track.id)))
            })
            .collect())
    }
}

/// Number of class scores in a prediction row of `[cx, cy, w, h, classes.., kpts..]`.
fn class_count(num_feats: usize, num_keypoints: usize) -> Result<usize, Box<dyn std::error::Error>> {
    let fixed = 4 + num_keypoints * 3;
    if num_feats <= fixed {
        return Err(format!(
            "pose output has {num_feats} features, expected more than {fixed} for {num_keypoints} keypoints"
        )
        .into());
    }
    Ok(num_feats - fixed)
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

struct Letterbox {
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn unmap(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.pad_x as f64) / self.scale,
            (y - self.pad_y as f64) / self.scale,
        )
    }
}

/// Letterbox-resize a frame to `target_size` × `target_size`.
///
/// Returns `(NCHW float32 tensor, scale, pad_x, pad_y)`.
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, f64, u32, u32) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = (fw * scale).round() as u32;
    let new_h = (fh * scale).round() as u32;
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    // Padding is 114/255 gray, the YOLO convention
    let gray = 114.0f32 / 255.0;
    let mut tensor =
        ndarray::Array4::<f32>::from_elem((1, 3, target_size as usize, target_size as usize), gray);

    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;

    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    (tensor, scale, pad_x, pad_y)
}

// ---------------------------------------------------------------------------
// Decoding and NMS
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct RawPrediction {
    bbox: [f64; 4],
    confidence: f64,
    category: u32,
    keypoints: Vec<Keypoint>,
}

impl RawPrediction {
    fn into_detection(self, track_id: Option<u32>) -> Detection {
        Detection {
            bbox: BoundingBox::new(
                self.bbox[0] as f32,
                self.bbox[1] as f32,
                self.bbox[2] as f32,
                self.bbox[3] as f32,
            ),
            track_id,
            confidence: self.confidence as f32,
            category: self.category,
            keypoints: self.keypoints,
        }
    }
}

/// Decodes one prediction row, mapping coordinates back to frame space.
fn decode_row(
    row: &[f32],
    num_classes: usize,
    letterbox: &Letterbox,
    min_confidence: f64,
) -> Option<RawPrediction> {
    let scores = row.get(4..4 + num_classes)?;
    let (category, &score) = scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;
    let confidence = score as f64;
    if confidence < min_confidence {
        return None;
    }

    let cx = row[0] as f64;
    let cy = row[1] as f64;
    let w = row[2] as f64;
    let h = row[3] as f64;
    let (x1, y1) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
    let (x2, y2) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);

    let keypoints = row[4 + num_classes..]
        .chunks_exact(3)
        .map(|k| {
            let (x, y) = letterbox.unmap(k[0] as f64, k[1] as f64);
            Keypoint::new(x as f32, y as f32, k[2])
        })
        .collect();

    Some(RawPrediction {
        bbox: [x1, y1, x2, y2],
        confidence,
        category: category as u32,
        keypoints,
    })
}

/// Greedy NMS: sort by confidence descending, suppress overlapping boxes.
fn nms(preds: &mut [RawPrediction], iou_thresh: f64) -> Vec<RawPrediction> {
    preds.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<RawPrediction> = Vec::new();
    for pred in preds.iter() {
        let suppressed = keep
            .iter()
            .any(|k| k.category == pred.category && bbox_iou(&k.bbox, &pred.bbox) > iou_thresh);
        if !suppressed {
            keep.push(pred.clone());
        }
    }
    keep
}
