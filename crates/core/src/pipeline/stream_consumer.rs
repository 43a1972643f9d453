use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::detection::domain::detector::Detector;
use crate::detection::domain::track_lifecycle_manager::TrackLifecycleManager;
use crate::overlay::overlay_renderer::OverlayRenderer;
use crate::pipeline::cadence_controller::{CadenceController, CadenceDecision};
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::pipeline::region_filter::RegionFilter;
use crate::pipeline::single_slot_relay::{RelayConsumer, RelayRecv};
use crate::shared::constants::DEFAULT_CADENCE_INTERVAL;
use crate::shared::detection::Detection;
use crate::shared::error::PipelineError;
use crate::shared::frame_packet::FramePacket;
use crate::streaming::stream_emitter::StreamEmitter;

/// Per-consumer settings.
#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    /// Run the detector on every `interval`-th frame.
    pub interval: usize,
    /// Ask the detector for track ids and keep per-track timers.
    pub track_enabled: bool,
    /// How long to wait for a frame before rechecking cancellation.
    pub poll_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CADENCE_INTERVAL,
            track_enabled: true,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// One annotated, encoded frame ready for a transport.
#[derive(Clone, Debug)]
pub struct EmittedFrame {
    pub sequence: u64,
    pub jpeg: Vec<u8>,
    /// The detections drawn on this frame.
    pub detections: Vec<Detection>,
}

/// Why [`StreamConsumer::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerExit {
    /// The producer stopped and the relay was closed.
    SourceClosed,
    /// The sink refused a frame.
    Disconnected,
    Cancelled,
}

/// Turns raw frames from one relay into annotated JPEGs for one client.
///
/// Owns all per-stream state: cadence position, detector, track timers and
/// the last detection result.
pub struct StreamConsumer {
    cadence: CadenceController,
    detector: Box<dyn Detector>,
    track_enabled: bool,
    poll_interval: Duration,
    tracks: Option<TrackLifecycleManager>,
    region: Option<Arc<RegionFilter>>,
    renderer: Arc<OverlayRenderer>,
    emitter: StreamEmitter,
    logger: Box<dyn PipelineLogger>,
    last_detections: Vec<Detection>,
}

impl StreamConsumer {
    pub fn new(
        config: ConsumerConfig,
        detector: Box<dyn Detector>,
        renderer: Arc<OverlayRenderer>,
        region: Option<Arc<RegionFilter>>,
        emitter: StreamEmitter,
        logger: Box<dyn PipelineLogger>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            cadence: CadenceController::new(config.interval)?,
            detector,
            track_enabled: config.track_enabled,
            poll_interval: config.poll_interval,
            tracks: config.track_enabled.then(TrackLifecycleManager::new),
            region,
            renderer,
            emitter,
            logger,
            last_detections: Vec::new(),
        })
    }

    /// Track timers, when tracking is enabled.
    pub fn tracks(&self) -> Option<&TrackLifecycleManager> {
        self.tracks.as_ref()
    }

    /// Detections that will be drawn until the next detector run.
    pub fn last_detections(&self) -> &[Detection] {
        &self.last_detections
    }

    /// Runs one iteration: detect or reuse, annotate, encode.
    ///
    /// Fails only with [`PipelineError::EncodeFailure`]; the caller skips
    /// that frame and carries on.
    pub fn process(&mut self, packet: FramePacket) -> Result<EmittedFrame, PipelineError> {
        let FramePacket {
            mut frame,
            detections,
        } = packet;
        let decision = self.cadence.advance();

        match detections {
            Some(pushed) => self.observe(pushed),
            None if decision == CadenceDecision::Run => {
                let start = Instant::now();
                let result = self.detector.detect(&frame, self.track_enabled);
                self.logger.timing("detect", elapsed_ms(start));
                match result {
                    Ok(detected) => self.observe(detected),
                    Err(e) => log::warn!(
                        "Detector failed on frame {}, reusing previous result: {e}",
                        frame.sequence()
                    ),
                }
            }
            None => {}
        }

        let start = Instant::now();
        self.renderer.render(
            &mut frame,
            &self.last_detections,
            self.tracks.as_ref(),
            self.region.as_deref().map(RegionFilter::vertices),
        );
        self.logger.timing("render", elapsed_ms(start));

        let start = Instant::now();
        let jpeg = self.emitter.encode_jpeg(&frame)?;
        self.logger.timing("encode", elapsed_ms(start));

        Ok(EmittedFrame {
            sequence: frame.sequence(),
            jpeg,
            detections: self.last_detections.clone(),
        })
    }

    /// Timers follow every observed id, then the region narrows what is drawn.
    ///
    /// Pushed detections may carry ids even when tracking is off; those are
    /// stripped so nothing downstream sees them.
    fn observe(&mut self, mut detections: Vec<Detection>) {
        if !self.track_enabled {
            for detection in &mut detections {
                detection.track_id = None;
            }
        }
        if let Some(tracks) = self.tracks.as_mut() {
            tracks.synchronize(Detection::track_ids(&detections));
        }
        self.last_detections = match &self.region {
            Some(region) => region.filter(detections),
            None => detections,
        };
        self.logger
            .metric("detections", self.last_detections.len() as f64);
    }

    /// Consumes the relay until it closes, `sink` refuses a frame, or
    /// `cancelled` is set. `sink` returns `false` once its client is gone.
    pub fn run<F>(
        mut self,
        relay: RelayConsumer<FramePacket>,
        cancelled: &AtomicBool,
        mut sink: F,
    ) -> ConsumerExit
    where
        F: FnMut(EmittedFrame) -> bool,
    {
        let exit = loop {
            if cancelled.load(Ordering::Relaxed) {
                break ConsumerExit::Cancelled;
            }
            let packet = match relay.get_timeout(self.poll_interval) {
                RelayRecv::Item(packet) => packet,
                RelayRecv::Empty => continue,
                RelayRecv::Closed => break ConsumerExit::SourceClosed,
            };
            match self.process(packet) {
                Ok(emitted) => {
                    let sequence = emitted.sequence;
                    if !sink(emitted) {
                        break ConsumerExit::Disconnected;
                    }
                    self.logger.frame_emitted(sequence);
                }
                Err(e) => log::warn!("{e}; frame skipped"),
            }
        };

        self.logger.info(&format!("stream ended ({exit:?})"));
        self.logger.summary();
        exit
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::overlay_renderer::RenderConfig;
    use crate::pipeline::pipeline_logger::NullPipelineLogger;
    use crate::pipeline::relay_hub::RelayHub;
    use crate::shared::detection::BoundingBox;
    use crate::shared::frame::Frame;
    use crate::shared::skeleton::SkeletonSchema;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Replays scripted results; an exhausted script returns no detections.
    struct ScriptedDetector {
        results: VecDeque<Result<Vec<Detection>, String>>,
        calls: Arc<AtomicUsize>,
    }

    impl Detector for ScriptedDetector {
        fn detect(
            &mut self,
            _frame: &Frame,
            _track_enabled: bool,
        ) -> Result<Vec<Detection>, Box<dyn std::error::Error>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.results.pop_front() {
                Some(Ok(d)) => Ok(d),
                Some(Err(e)) => Err(e.into()),
                None => Ok(Vec::new()),
            }
        }
    }

    fn person(track_id: Option<u32>, center: (f32, f32)) -> Detection {
        Detection {
            bbox: BoundingBox::new(center.0 - 2.0, center.1 - 2.0, center.0 + 2.0, center.1 + 2.0),
            track_id,
            confidence: 0.9,
            category: 0,
            keypoints: Vec::new(),
        }
    }

    fn packet(sequence: u64) -> FramePacket {
        FramePacket::new(Frame::new(vec![0; 64 * 48 * 3], 64, 48, 3, sequence))
    }

    fn consumer(
        results: Vec<Result<Vec<Detection>, String>>,
        config: ConsumerConfig,
        region: Option<RegionFilter>,
    ) -> (StreamConsumer, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let detector = ScriptedDetector {
            results: results.into(),
            calls: calls.clone(),
        };
        let renderer = Arc::new(OverlayRenderer::new(
            RenderConfig::default(),
            SkeletonSchema::coco17(),
        ));
        let consumer = StreamConsumer::new(
            config,
            Box::new(detector),
            renderer,
            region.map(Arc::new),
            StreamEmitter::default(),
            Box::new(NullPipelineLogger),
        )
        .unwrap();
        (consumer, calls)
    }

    #[test]
    fn test_invalid_interval_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = StreamConsumer::new(
            ConsumerConfig {
                interval: 1,
                ..ConsumerConfig::default()
            },
            Box::new(ScriptedDetector {
                results: VecDeque::new(),
                calls,
            }),
            Arc::new(OverlayRenderer::new(RenderConfig::default(), SkeletonSchema::coco17())),
            None,
            StreamEmitter::default(),
            Box::new(NullPipelineLogger),
        );
        assert!(matches!(result, Err(PipelineError::InvalidInterval(1))));
    }

    #[test]
    fn test_detector_runs_once_per_interval() {
        let (mut consumer, calls) = consumer(Vec::new(), ConsumerConfig::default(), None);
        for seq in 0..9 {
            let emitted = consumer.process(packet(seq)).unwrap();
            assert_eq!(emitted.sequence, seq);
            assert_eq!(&emitted.jpeg[..2], &[0xFF, 0xD8]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_reuse_frames_draw_previous_result() {
        let (mut consumer, _) = consumer(
            vec![Ok(vec![person(Some(1), (10.0, 10.0))])],
            ConsumerConfig::default(),
            None,
        );
        let first = consumer.process(packet(0)).unwrap();
        let second = consumer.process(packet(1)).unwrap();
        assert_eq!(first.detections.len(), 1);
        assert_eq!(second.detections, first.detections);
    }

    #[test]
    fn test_detector_failure_reuses_previous_result() {
        let (mut consumer, calls) = consumer(
            vec![Ok(vec![person(Some(1), (10.0, 10.0))]), Err("gpu lost".into())],
            ConsumerConfig {
                interval: 2,
                ..ConsumerConfig::default()
            },
            None,
        );
        for seq in 0..4 {
            consumer.process(packet(seq)).unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(consumer.last_detections().len(), 1);
        assert!(consumer.tracks().unwrap().is_tracked(1));
    }

    #[test]
    fn test_timers_follow_detector_runs() {
        let (mut consumer, _) = consumer(
            vec![
                Ok(vec![person(Some(1), (10.0, 10.0))]),
                Ok(vec![person(Some(1), (10.0, 10.0)), person(Some(2), (30.0, 30.0))]),
                Ok(vec![person(Some(2), (30.0, 30.0))]),
            ],
            ConsumerConfig::default(),
            None,
        );
        let mut seen = Vec::new();
        for seq in 0..9 {
            consumer.process(packet(seq)).unwrap();
            seen.push(consumer.tracks().unwrap().tracked_ids());
        }
        assert_eq!(seen[0], vec![1]);
        assert_eq!(seen[3], vec![1, 2]);
        assert_eq!(seen[8], vec![2]);
        assert!(consumer.tracks().unwrap().elapsed(1).is_err());
    }

    #[test]
    fn test_tracking_disabled_has_no_timers() {
        let (mut consumer, _) = consumer(
            vec![Ok(vec![person(None, (10.0, 10.0))])],
            ConsumerConfig {
                track_enabled: false,
                ..ConsumerConfig::default()
            },
            None,
        );
        consumer.process(packet(0)).unwrap();
        assert!(consumer.tracks().is_none());
        assert_eq!(consumer.last_detections().len(), 1);
    }

    #[test]
    fn test_region_filters_drawn_detections_but_not_timers() {
        let region = RegionFilter::new(&[(0, 0), (20, 0), (20, 20), (0, 20)], 64, 48).unwrap();
        let (mut consumer, _) = consumer(
            vec![Ok(vec![
                person(Some(1), (10.0, 10.0)),
                person(Some(2), (40.0, 30.0)),
            ])],
            ConsumerConfig::default(),
            Some(region),
        );
        let emitted = consumer.process(packet(0)).unwrap();
        assert_eq!(emitted.detections.len(), 1);
        assert_eq!(emitted.detections[0].track_id, Some(1));
        assert_eq!(consumer.tracks().unwrap().tracked_ids(), vec![1, 2]);
    }

    #[test]
    fn test_pushed_detections_bypass_detector() {
        let (mut consumer, calls) = consumer(Vec::new(), ConsumerConfig::default(), None);
        let frame = Frame::new(vec![0; 64 * 48 * 3], 64, 48, 3, 0);
        let pushed = FramePacket::with_detections(frame, vec![person(Some(7), (10.0, 10.0))]);

        let emitted = consumer.process(pushed).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(emitted.detections[0].track_id, Some(7));
        assert!(consumer.tracks().unwrap().is_tracked(7));
    }

    #[test]
    fn test_pushed_ids_dropped_when_tracking_disabled() {
        let (mut consumer, _) = consumer(
            Vec::new(),
            ConsumerConfig {
                track_enabled: false,
                ..ConsumerConfig::default()
            },
            None,
        );
        let frame = Frame::new(vec![0; 64 * 48 * 3], 64, 48, 3, 0);
        let pushed = FramePacket::with_detections(frame, vec![person(Some(7), (10.0, 10.0))]);

        let emitted = consumer.process(pushed).unwrap();
        assert_eq!(emitted.detections.len(), 1);
        assert_eq!(emitted.detections[0].track_id, None);
        assert_eq!(consumer.last_detections()[0].track_id, None);
        assert!(consumer.tracks().is_none());
    }

    #[test]
    fn test_run_ends_when_source_closes() {
        let hub = RelayHub::new();
        let relay = hub.subscribe();
        hub.publish(&packet(0));
        hub.close();

        let (consumer, _) = consumer(Vec::new(), ConsumerConfig::default(), None);
        let mut emitted = Vec::new();
        let exit = consumer.run(relay, &AtomicBool::new(false), |frame| {
            emitted.push(frame.sequence);
            true
        });
        assert_eq!(exit, ConsumerExit::SourceClosed);
        assert_eq!(emitted, vec![0]);
    }

    #[test]
    fn test_run_ends_when_sink_refuses() {
        let hub = RelayHub::new();
        let relay = hub.subscribe();
        hub.publish(&packet(0));

        let (consumer, _) = consumer(Vec::new(), ConsumerConfig::default(), None);
        let exit = consumer.run(relay, &AtomicBool::new(false), |_| false);
        assert_eq!(exit, ConsumerExit::Disconnected);
        assert_eq!(hub.publish(&packet(1)), 0);
    }

    #[test]
    fn test_run_honours_cancellation() {
        let hub = RelayHub::<FramePacket>::new();
        let relay = hub.subscribe();
        let (consumer, _) = consumer(
            Vec::new(),
            ConsumerConfig {
                poll_interval: Duration::from_millis(5),
                ..ConsumerConfig::default()
            },
            None,
        );
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let handle = std::thread::spawn(move || consumer.run(relay, &flag, |_| true));
        std::thread::sleep(Duration::from_millis(20));
        cancelled.store(true, Ordering::SeqCst);
        assert_eq!(handle.join().unwrap(), ConsumerExit::Cancelled);
    }
}
