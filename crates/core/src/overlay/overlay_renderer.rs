use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_text_mut, text_size,
};
use imageproc::rect::Rect;

use crate::detection::domain::track_lifecycle_manager::TrackLifecycleManager;
use crate::shared::constants::{DEFAULT_BOX_CONFIDENCE, DEFAULT_KEYPOINT_CONFIDENCE};
use crate::shared::detection::{Detection, Keypoint};
use crate::shared::frame::Frame;
use crate::shared::skeleton::SkeletonSchema;

use super::palette::{track_color, LABEL_TEXT, REGION_OUTLINE};

/// Drawing parameters for [`OverlayRenderer`].
#[derive(Clone, Debug)]
pub struct RenderConfig {
    /// Detections below this confidence are not drawn.
    pub box_threshold: f32,
    /// Keypoints below this confidence are neither drawn nor joined.
    pub keypoint_threshold: f32,
    pub box_thickness: u32,
    pub keypoint_radius: i32,
    pub region_thickness: u32,
    pub font_size: f32,
    /// Category names indexed by category id.
    pub class_names: Vec<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            box_threshold: DEFAULT_BOX_CONFIDENCE,
            keypoint_threshold: DEFAULT_KEYPOINT_CONFIDENCE,
            box_thickness: 1,
            keypoint_radius: 2,
            region_thickness: 2,
            font_size: 16.0,
            class_names: vec!["person".to_string()],
        }
    }
}

/// Draws boxes, labels, skeletons and the region outline onto a frame.
///
/// Holds no per-stream state; track timers are passed in by the caller.
pub struct OverlayRenderer {
    config: RenderConfig,
    schema: SkeletonSchema,
    font: Option<FontVec>,
}

impl OverlayRenderer {
    pub fn new(config: RenderConfig, schema: SkeletonSchema) -> Self {
        Self {
            config,
            schema,
            font: None,
        }
    }

    /// Renders label text with `font`. Without a font only the label band is drawn.
    pub fn with_font(mut self, font: FontVec) -> Self {
        self.font = Some(font);
        self
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Draws everything in place. `tracks` adds elapsed times to labels of
    /// tracked detections; `region` outlines the monitored polygon.
    pub fn render(
        &self,
        frame: &mut Frame,
        detections: &[Detection],
        tracks: Option<&TrackLifecycleManager>,
        region: Option<&[(i32, i32)]>,
    ) {
        frame.with_rgb_image(|img| {
            if let Some(vertices) = region {
                self.draw_region(img, vertices);
            }
            for detection in detections {
                if detection.confidence < self.config.box_threshold {
                    continue;
                }
                let color = track_color(detection.track_id);
                self.draw_skeleton(img, &detection.keypoints, color);
                let Some(corners) = clip_to_image(detection, img.width(), img.height()) else {
                    continue;
                };
                self.draw_box(img, corners, color);

                let elapsed = match (tracks, detection.track_id) {
                    (Some(tracks), Some(id)) => match tracks.elapsed(id) {
                        Ok(elapsed) => Some(elapsed),
                        Err(e) => {
                            log::debug!("No label time: {e}");
                            None
                        }
                    },
                    _ => None,
                };
                let text = label_text(
                    self.class_name(detection.category).as_deref(),
                    detection.category,
                    detection.confidence,
                    elapsed.as_deref(),
                );
                self.draw_label(img, corners, &text, color);
            }
        });
    }

    fn class_name(&self, category: u32) -> Option<String> {
        self.config.class_names.get(category as usize).cloned()
    }

    fn draw_box(&self, img: &mut RgbImage, corners: Corners, color: Rgb<u8>) {
        let (x1, y1, x2, y2) = corners;
        for t in 0..self.config.box_thickness as i32 {
            let w = x2 - x1 + 1 - 2 * t;
            let h = y2 - y1 + 1 - 2 * t;
            if w <= 0 || h <= 0 {
                break;
            }
            draw_hollow_rect_mut(
                img,
                Rect::at(x1 + t, y1 + t).of_size(w as u32, h as u32),
                color,
            );
        }
    }

    fn draw_skeleton(&self, img: &mut RgbImage, keypoints: &[Keypoint], color: Rgb<u8>) {
        let (w, h) = (img.width() as f32, img.height() as f32);
        let visible = |i: usize| {
            keypoints.get(i).filter(|k| {
                k.confidence >= self.config.keypoint_threshold
                    && (0.0..w).contains(&k.x)
                    && (0.0..h).contains(&k.y)
            })
        };

        for (from, to) in self.schema.edges() {
            if let (Some(a), Some(b)) = (visible(from), visible(to)) {
                draw_line_segment_mut(img, point(a), point(b), color);
            }
        }
        for i in 0..keypoints.len() {
            if let Some(k) = visible(i) {
                draw_filled_circle_mut(
                    img,
                    (k.x as i32, k.y as i32),
                    self.config.keypoint_radius,
                    color,
                );
            }
        }
    }

    fn draw_label(&self, img: &mut RgbImage, corners: Corners, text: &str, color: Rgb<u8>) {
        let scale = PxScale::from(self.config.font_size);
        let (text_w, text_h) = match &self.font {
            Some(font) => text_size(scale, font, text),
            None => estimated_text_size(self.config.font_size, text),
        };
        let (x1, y1, _, _) = corners;
        let band_h = text_h as i32 + 2;
        // Above the box, or just inside it when there is no room at the top.
        let band_y = if y1 - band_h >= 0 { y1 - band_h } else { y1 };

        draw_filled_rect_mut(
            img,
            Rect::at(x1, band_y).of_size(text_w.max(1) + 4, band_h as u32),
            color,
        );
        if let Some(font) = &self.font {
            draw_text_mut(img, LABEL_TEXT, x1 + 2, band_y + 1, scale, font, text);
        }
    }

    fn draw_region(&self, img: &mut RgbImage, vertices: &[(i32, i32)]) {
        if vertices.len() < 2 {
            return;
        }
        let offsets = 0..self.config.region_thickness.max(1) as i32;
        for t in offsets {
            for (i, &(x, y)) in vertices.iter().enumerate() {
                let (nx, ny) = vertices[(i + 1) % vertices.len()];
                draw_line_segment_mut(
                    img,
                    ((x + t) as f32, (y + t) as f32),
                    ((nx + t) as f32, (ny + t) as f32),
                    REGION_OUTLINE,
                );
            }
        }
    }
}

/// Truncated box corners, inclusive.
type Corners = (i32, i32, i32, i32);

/// The part of the box inside the image, or `None` when none of it is.
fn clip_to_image(detection: &Detection, width: u32, height: u32) -> Option<Corners> {
    if !detection.bbox.is_finite() || width == 0 || height == 0 {
        return None;
    }
    let (x1, y1, x2, y2) = detection.bbox.truncated();
    let (max_x, max_y) = (width as i32 - 1, height as i32 - 1);
    if x2 < 0 || y2 < 0 || x1 > max_x || y1 > max_y || x2 < x1 || y2 < y1 {
        return None;
    }
    Some((x1.max(0), y1.max(0), x2.min(max_x), y2.min(max_y)))
}

fn point(k: &Keypoint) -> (f32, f32) {
    (k.x.trunc(), k.y.trunc())
}

fn estimated_text_size(font_size: f32, text: &str) -> (u32, u32) {
    let width = (text.chars().count() as f32 * font_size * 0.55).ceil() as u32;
    (width, font_size.ceil() as u32)
}

/// `"<name> <conf> [<elapsed>]"`, e.g. `person 0.873 00:01:05`.
///
/// Uses the numeric category when no name is known.
pub fn label_text(
    name: Option<&str>,
    category: u32,
    confidence: f32,
    elapsed: Option<&str>,
) -> String {
    let name = name.map_or_else(|| category.to_string(), str::to_string);
    match elapsed {
        Some(elapsed) => format!("{name} {confidence:.3} {elapsed}"),
        None => format!("{name} {confidence:.3}"),
    }
}

/// Loads a TTF/OTF font for label text.
pub fn load_font(path: &Path) -> Result<FontVec, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    Ok(FontVec::try_from_vec(bytes)?)
}
