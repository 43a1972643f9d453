use ndarray::{ArrayView3, ArrayViewMut3};

/// A single video frame: contiguous RGB bytes in row-major order.
///
/// Tagged with the sequence number assigned by whichever producer
/// published it. Format conversion happens at I/O boundaries only.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    sequence: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, sequence: u64) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            sequence,
        }
    }

    /// Wraps an RGB image produced by the `image` crate.
    pub fn from_rgb_image(image: image::RgbImage, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, 3, sequence)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    pub fn as_ndarray_mut(&mut self) -> ArrayViewMut3<'_, u8> {
        ArrayViewMut3::from_shape(self.shape(), &mut self.data)
            .expect("Frame data length must match dimensions")
    }

    /// Lends the pixel buffer to `draw` as an `RgbImage` and takes it back.
    ///
    /// The buffer is moved, not copied, so drawing stays in place.
    pub fn with_rgb_image<R>(&mut self, draw: impl FnOnce(&mut image::RgbImage) -> R) -> R {
        debug_assert_eq!(self.channels, 3, "drawing requires a 3-channel frame");
        let data = std::mem::take(&mut self.data);
        let mut img = image::RgbImage::from_raw(self.width, self.height, data)
            .expect("Frame data length must match dimensions");
        let result = draw(&mut img);
        self.data = img.into_raw();
        result
    }

    /// Returns a copy scaled to `width` x `height`, or `self` unchanged if
    /// it already has those dimensions.
    pub fn resized(self, width: u32, height: u32) -> Self {
        if self.width == width && self.height == height {
            return self;
        }
        let sequence = self.sequence;
        let img = image::RgbImage::from_raw(self.width, self.height, self.data)
            .expect("Frame data length must match dimensions");
        let scaled =
            image::imageops::resize(&img, width, height, image::imageops::FilterType::Triangle);
        Self::from_rgb_image(scaled, sequence)
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
