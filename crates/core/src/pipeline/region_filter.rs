use image::{GrayImage, Luma};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;

use crate::shared::detection::Detection;
use crate::shared::error::PipelineError;

const INSIDE: Luma<u8> = Luma([255]);

/// Point-in-region test backed by a filled polygon mask.
///
/// The mask is rasterized once at construction and never changes, so two
/// filters built from the same polygon and size always agree.
#[derive(Clone, Debug)]
pub struct RegionFilter {
    vertices: Vec<(i32, i32)>,
    mask: GrayImage,
}

impl RegionFilter {
    /// Rasterizes `vertices` into a `width` × `height` mask.
    ///
    /// A trailing vertex equal to the first is ignored, as are consecutive
    /// repeats.
    pub fn new(vertices: &[(i32, i32)], width: u32, height: u32) -> Result<Self, PipelineError> {
        let vertices = normalize_vertices(vertices);
        let distinct = {
            let mut unique = vertices.clone();
            unique.sort_unstable();
            unique.dedup();
            unique.len()
        };
        if distinct < 3 {
            return Err(PipelineError::DegeneratePolygon(distinct));
        }

        let mut mask = GrayImage::new(width, height);
        let points: Vec<Point<i32>> = vertices.iter().map(|&(x, y)| Point::new(x, y)).collect();
        draw_polygon_mut(&mut mask, &points, INSIDE);

        Ok(Self { vertices, mask })
    }

    /// Mask membership of pixel (x, y).
    pub fn contains(&self, x: i32, y: i32) -> Result<bool, PipelineError> {
        let (width, height) = self.mask.dimensions();
        if x < 0 || y < 0 || x as u32 >= width || y as u32 >= height {
            return Err(PipelineError::OutOfBounds {
                x,
                y,
                width,
                height,
            });
        }
        Ok(self.mask.get_pixel(x as u32, y as u32) == &INSIDE)
    }

    /// Whether the detection's box midpoint lies in the region.
    pub fn contains_detection(&self, detection: &Detection) -> Result<bool, PipelineError> {
        let (x, y) = detection.bbox.center();
        self.contains(x, y)
    }

    /// Keeps detections inside the region. Midpoints outside the frame count
    /// as outside the region.
    pub fn filter(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections
            .into_iter()
            .filter(|d| self.contains_detection(d).unwrap_or(false))
            .collect()
    }

    /// The polygon as drawn, without a closing vertex.
    pub fn vertices(&self) -> &[(i32, i32)] {
        &self.vertices
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.mask.dimensions()
    }
}

fn normalize_vertices(vertices: &[(i32, i32)]) -> Vec<(i32, i32)> {
    let mut out: Vec<(i32, i32)> = Vec::with_capacity(vertices.len());
    for &v in vertices {
        if out.last() != Some(&v) {
            out.push(v);
        }
    }
    while out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    out
}

/// Parses `"x,y;x,y;..."` into vertices.
pub fn parse_vertices(text: &str) -> Result<Vec<(i32, i32)>, String> {
    text.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (x, y) = pair
                .split_once(',')
                .ok_or_else(|| format!("Vertex '{pair}' must be 'x,y'"))?;
            let x = x
                .trim()
                .parse::<i32>()
                .map_err(|e| format!("Vertex '{pair}': {e}"))?;
            let y = y
                .trim()
                .parse::<i32>()
                .map_err(|e| format!("Vertex '{pair}': {e}"))?;
            Ok((x, y))
        })
        .collect()
}
