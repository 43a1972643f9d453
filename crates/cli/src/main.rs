mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;

use vigil_core::detection::domain::detector::{Detector, DetectorFactory};
use vigil_core::detection::infrastructure::bytetrack_tracker::ByteTracker;
use vigil_core::detection::infrastructure::model_resolver;
use vigil_core::detection::infrastructure::null_detector::NullDetector;
use vigil_core::detection::infrastructure::onnx_pose_detector::{
    OnnxPoseDetector, DEFAULT_CONFIDENCE, DEFAULT_NUM_KEYPOINTS,
};
use vigil_core::overlay::overlay_renderer::{load_font, OverlayRenderer, RenderConfig};
use vigil_core::pipeline::cadence_controller::CadenceController;
use vigil_core::pipeline::frame_source::{CaptureConfig, FrameSource};
use vigil_core::pipeline::region_filter::{parse_vertices, RegionFilter};
use vigil_core::pipeline::relay_hub::RelayHub;
use vigil_core::pipeline::stream_consumer::ConsumerConfig;
use vigil_core::shared::constants::TRACKER_MAX_LOST;
use vigil_core::shared::skeleton::SkeletonSchema;
use vigil_core::video::infrastructure::ffmpeg_source::FfmpegSource;

use server::{AppState, StreamSettings};

type DetectorResult = Result<Box<dyn Detector>, Box<dyn std::error::Error>>;

/// Live pose detection overlay served as an MJPEG / websocket stream.
#[derive(Parser)]
#[command(name = "vigil")]
struct Cli {
    /// Video source: device index, device path, file or stream URL.
    source: String,

    /// Output resolution as WIDTHxHEIGHT.
    #[arg(long, default_value = "640x360")]
    resolution: String,

    /// Address the HTTP server listens on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Run detection every Nth frame and reuse results in between (>= 2).
    #[arg(long, default_value = "3")]
    interval: usize,

    /// Disable track ids and elapsed-time labels.
    #[arg(long)]
    no_track: bool,

    /// YOLO pose ONNX model (path or file name in the model cache).
    #[arg(long)]
    model: Option<String>,

    /// Minimum detection confidence to draw (0.0-1.0).
    #[arg(long, default_value = "0.5")]
    confidence: f32,

    /// Minimum keypoint confidence to draw (0.0-1.0).
    #[arg(long, default_value = "0.5")]
    keypoint_confidence: f32,

    /// Region of interest polygon as "x,y;x,y;x,y".
    #[arg(long)]
    region: Option<String>,

    /// TTF/OTF font used for box labels. Labels are omitted without one.
    #[arg(long)]
    font: Option<PathBuf>,

    /// Category names indexed by class id (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "person")]
    class_names: Vec<String>,

    /// JPEG quality (1-100).
    #[arg(long, default_value = "80")]
    jpeg_quality: u8,

    /// Consecutive capture failures tolerated before giving up.
    #[arg(long, default_value = "3")]
    capture_retries: usize,

    /// Stop capturing while no client is connected.
    #[arg(long)]
    idle_pause: bool,

    /// Accept pushed frames on /ingest instead of capturing `source`.
    #[arg(long)]
    ingest: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;

    let (width, height) = parse_resolution(&cli.resolution)?;
    let region = build_region(&cli, width, height)?;
    let renderer = Arc::new(build_renderer(&cli)?);
    let detector_factory = build_detector_factory(&cli)?;

    let hub = Arc::new(RelayHub::new());
    let mut capture = if cli.ingest {
        log::info!("Ingest mode: ignoring source {}", cli.source);
        None
    } else {
        let source = FfmpegSource::new(&cli.source, width, height);
        let config = CaptureConfig {
            width,
            height,
            max_retries: cli.capture_retries,
            pause_when_idle: cli.idle_pause,
        };
        Some(FrameSource::start(Box::new(source), hub.clone(), config)?)
    };

    let settings = StreamSettings {
        width,
        height,
        consumer: ConsumerConfig {
            interval: cli.interval,
            track_enabled: !cli.no_track,
            ..ConsumerConfig::default()
        },
        renderer,
        region,
        jpeg_quality: cli.jpeg_quality,
        detector_factory,
    };
    let state = AppState::new(hub, settings);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server::serve(cli.bind, state, cli.ingest))?;

    if let Some(capture) = capture.as_mut() {
        capture.stop()?;
    }
    log::info!("Stopped");
    Ok(())
}

fn build_region(
    cli: &Cli,
    width: u32,
    height: u32,
) -> Result<Option<Arc<RegionFilter>>, Box<dyn std::error::Error>> {
    let Some(text) = cli.region.as_deref() else {
        return Ok(None);
    };
    let vertices = parse_vertices(text).map_err(|e| format!("Invalid --region: {e}"))?;
    let filter = RegionFilter::new(&vertices, width, height)?;
    log::info!("Region of interest: {:?}", filter.vertices());
    Ok(Some(Arc::new(filter)))
}

fn build_renderer(cli: &Cli) -> Result<OverlayRenderer, Box<dyn std::error::Error>> {
    let config = RenderConfig {
        box_threshold: cli.confidence,
        keypoint_threshold: cli.keypoint_confidence,
        class_names: cli.class_names.clone(),
        ..RenderConfig::default()
    };
    let renderer = OverlayRenderer::new(config, SkeletonSchema::coco17());
    match &cli.font {
        Some(path) => Ok(renderer.with_font(load_font(path)?)),
        None => {
            log::warn!("No --font given; label bands are drawn without text");
            Ok(renderer)
        }
    }
}

/// Each connected client gets its own detector so tracker state is never
/// shared between streams.
fn build_detector_factory(cli: &Cli) -> Result<DetectorFactory, Box<dyn std::error::Error>> {
    let Some(model) = cli.model.as_deref() else {
        log::warn!("No --model given; frames are streamed without local detection");
        return Ok(Box::new(|| -> DetectorResult { Ok(Box::new(NullDetector)) }));
    };

    log::info!("Resolving model: {model}");
    let model_path = model_resolver::resolve(model, None)?;
    // Low-score boxes feed ByteTrack's second association pass; the renderer
    // applies the display threshold.
    let confidence = f64::from(cli.confidence).min(DEFAULT_CONFIDENCE);

    Ok(Box::new(move || -> DetectorResult {
        let detector = OnnxPoseDetector::new(
            &model_path,
            ByteTracker::new(TRACKER_MAX_LOST),
            confidence,
            DEFAULT_NUM_KEYPOINTS,
        )?;
        Ok(Box::new(detector))
    }))
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    parse_resolution(&cli.resolution)?;
    CadenceController::new(cli.interval)?;
    if !(0.0..=1.0).contains(&cli.confidence) {
        return Err(format!(
            "Confidence must be between 0.0 and 1.0, got {}",
            cli.confidence
        )
        .into());
    }
    if !(0.0..=1.0).contains(&cli.keypoint_confidence) {
        return Err(format!(
            "Keypoint confidence must be between 0.0 and 1.0, got {}",
            cli.keypoint_confidence
        )
        .into());
    }
    if !(1..=100).contains(&cli.jpeg_quality) {
        return Err(format!(
            "JPEG quality must be between 1 and 100, got {}",
            cli.jpeg_quality
        )
        .into());
    }
    if cli.class_names.iter().any(|name| name.trim().is_empty()) {
        return Err("--class-names must not contain empty names".into());
    }
    if let Some(font) = &cli.font {
        if !font.is_file() {
            return Err(format!("Font file not found: {}", font.display()).into());
        }
    }
    Ok(())
}

fn parse_resolution(text: &str) -> Result<(u32, u32), String> {
    let parsed = text
        .split_once(['x', 'X'])
        .and_then(|(w, h)| Some((w.trim().parse::<u32>().ok()?, h.trim().parse::<u32>().ok()?)));
    match parsed {
        Some((w, h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(format!(
            "Resolution must be WIDTHxHEIGHT with positive values, got '{text}'"
        )),
    }
}
