use crate::shared::frame::Frame;
use crate::video::domain::video_source::{normalize_source_uri, VideoSource};

/// Decodes a file, network stream or capture device via ffmpeg-next.
///
/// The scaler converts every decoded frame straight to RGB24 at the
/// configured output resolution.
pub struct FfmpegSource {
    uri: String,
    width: u32,
    height: u32,
    state: Option<DecodeState>,
}

// Safety: FfmpegSource is moved into the capture thread and only used there.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegSource {}

struct DecodeState {
    input_ctx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    video_stream_index: usize,
    flushing: bool,
}

impl FfmpegSource {
    pub fn new(source: &str, width: u32, height: u32) -> Self {
        Self {
            uri: normalize_source_uri(source),
            width,
            height,
            state: None,
        }
    }
}

impl VideoSource for FfmpegSource {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn open(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        ffmpeg_next::init()?;
        ffmpeg_next::device::register_all();

        let input_ctx = ffmpeg_next::format::input(&self.uri)?;

        let stream = input_ctx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or("No video stream found")?;
        let video_stream_index = stream.index();
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = codec_ctx.decoder().video()?;

        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg_next::format::Pixel::RGB24,
            self.width,
            self.height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        log::info!(
            "Opened {} ({}x{} {}, output {}x{})",
            self.uri,
            decoder.width(),
            decoder.height(),
            decoder
                .codec()
                .map(|c| c.name().to_string())
                .unwrap_or_default(),
            self.width,
            self.height
        );

        self.state = Some(DecodeState {
            input_ctx,
            decoder,
            scaler,
            video_stream_index,
            flushing: false,
        });
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
        let state = self.state.as_mut().ok_or("FfmpegSource: not opened")?;
        state.next_frame(self.width, self.height)
    }

    fn is_open(&self) -> bool {
        self.state.is_some()
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::debug!("Released {}", self.uri);
        }
    }
}

impl DecodeState {
    fn try_receive(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::empty();
        self.scaler.run(&decoded, &mut rgb_frame)?;
        let pixels = extract_rgb_pixels(&rgb_frame, width, height);
        Ok(Some(Frame::new(pixels, width, height, 3, 0)))
    }

    fn next_frame(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
        if let Some(frame) = self.try_receive(width, height)? {
            return Ok(Some(frame));
        }
        if self.flushing {
            return Ok(None);
        }

        loop {
            let next = self
                .input_ctx
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            let Some((stream_index, packet)) = next else {
                let _ = self.decoder.send_eof();
                self.flushing = true;
                return self.try_receive(width, height);
            };

            if stream_index != self.video_stream_index {
                continue;
            }

            self.decoder.send_packet(&packet)?;

            if let Some(frame) = self.try_receive(width, height)? {
                return Ok(Some(frame));
            }
        }
    }
}

/// Copies pixel data from an ffmpeg frame into a contiguous RGB buffer.
///
/// ffmpeg frames may have padding bytes at the end of each row (stride > width*3).
fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let w = width as usize;
    let h = height as usize;

    let mut pixels = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + w * 3]);
    }
    pixels
}
