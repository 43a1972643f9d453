use image::Rgb;

/// Material Design 500 shades of the 19 standard hues.
pub const MATERIAL_500: [Rgb<u8>; 19] = [
    Rgb([0xF4, 0x43, 0x36]), // red
    Rgb([0xE9, 0x1E, 0x63]), // pink
    Rgb([0x9C, 0x27, 0xB0]), // purple
    Rgb([0x67, 0x3A, 0xB7]), // deep purple
    Rgb([0x3F, 0x51, 0xB5]), // indigo
    Rgb([0x21, 0x96, 0xF3]), // blue
    Rgb([0x03, 0xA9, 0xF4]), // light blue
    Rgb([0x00, 0xBC, 0xD4]), // cyan
    Rgb([0x00, 0x96, 0x88]), // teal
    Rgb([0x4C, 0xAF, 0x50]), // green
    Rgb([0x8B, 0xC3, 0x4A]), // light green
    Rgb([0xCD, 0xDC, 0x39]), // lime
    Rgb([0xFF, 0xEB, 0x3B]), // yellow
    Rgb([0xFF, 0xC1, 0x07]), // amber
    Rgb([0xFF, 0x98, 0x00]), // orange
    Rgb([0xFF, 0x57, 0x22]), // deep orange
    Rgb([0x79, 0x55, 0x48]), // brown
    Rgb([0x9E, 0x9E, 0x9E]), // grey
    Rgb([0x60, 0x7D, 0x8B]), // blue grey
];

/// Colour for detections without a track id.
pub const UNTRACKED: Rgb<u8> = MATERIAL_500[9];

/// Red outline of the monitored region.
pub const REGION_OUTLINE: Rgb<u8> = Rgb([0xFF, 0x00, 0x00]);

pub const LABEL_TEXT: Rgb<u8> = Rgb([0x00, 0x00, 0x00]);

/// Stable colour for a track id.
pub fn track_color(track_id: Option<u32>) -> Rgb<u8> {
    match track_id {
        Some(id) => MATERIAL_500[id as usize % MATERIAL_500.len()],
        None => UNTRACKED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some(0), MATERIAL_500[0])]
    #[case(Some(5), MATERIAL_500[5])]
    #[case(Some(19), MATERIAL_500[0])]
    #[case(Some(42), MATERIAL_500[4])]
    #[case(None, Rgb([0x4C, 0xAF, 0x50]))]
    fn test_track_color(#[case] id: Option<u32>, #[case] expected: Rgb<u8>) {
        assert_eq!(track_color(id), expected);
    }
}
