use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::pipeline::relay_hub::RelayHub;
use crate::shared::constants::{DEFAULT_CAPTURE_RETRIES, DEFAULT_RESOLUTION};
use crate::shared::error::PipelineError;
use crate::shared::frame_packet::FramePacket;
use crate::video::domain::video_source::VideoSource;

/// How often an idle capture thread rechecks for subscribers.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Settings for the capture thread.
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    /// Consecutive read failures tolerated before capture gives up.
    pub max_retries: usize,
    /// Stop reading while the hub has no subscribers.
    pub pause_when_idle: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_RESOLUTION.0,
            height: DEFAULT_RESOLUTION.1,
            max_retries: DEFAULT_CAPTURE_RETRIES,
            pause_when_idle: false,
        }
    }
}

/// Cloneable pause/resume/stop switch for a running capture thread.
#[derive(Clone, Default)]
struct CaptureControl {
    inner: Arc<ControlState>,
}

#[derive(Default)]
struct ControlState {
    paused: Mutex<bool>,
    wake: Condvar,
    stop: AtomicBool,
}

impl CaptureControl {
    fn pause(&self) {
        *self.lock() = true;
    }

    fn resume(&self) {
        *self.lock() = false;
        self.inner.wake.notify_all();
    }

    fn request_stop(&self) {
        self.inner.stop.store(true, Ordering::Release);
        // Take the lock so a thread between its stop check and wait sees the notify.
        let _guard = self.lock();
        self.inner.wake.notify_all();
    }

    fn stop_requested(&self) -> bool {
        self.inner.stop.load(Ordering::Acquire)
    }

    /// Blocks while paused (or idle). Returns `false` once stop is requested.
    fn wait_until_runnable(&self, hub: &RelayHub<FramePacket>, pause_when_idle: bool) -> bool {
        let mut paused = self.lock();
        let mut was_idle = false;
        loop {
            if self.stop_requested() {
                return false;
            }
            let idle = pause_when_idle && hub.subscriber_count() == 0;
            if !*paused && !idle {
                if was_idle {
                    log::info!("Subscriber connected, capture resumed");
                }
                return true;
            }
            if idle && !was_idle {
                log::info!("No subscribers, capture idle");
            }
            was_idle = idle;
            paused = match self.inner.wake.wait_timeout(paused, IDLE_POLL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.inner
            .paused
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Owns a [`VideoSource`] on a dedicated thread and publishes every decoded
/// frame to a [`RelayHub`].
///
/// The source is released on the capture thread on every exit path, and
/// the hub is closed when capture ends, so consumers observe the end of
/// the stream.
pub struct FrameSource {
    control: CaptureControl,
    handle: Option<JoinHandle<Result<(), PipelineError>>>,
}

impl FrameSource {
    /// Opens `source` on a new capture thread and starts the capture loop.
    ///
    /// Fails with [`PipelineError::SourceUnavailable`] if the source cannot
    /// be opened; in that case no thread is left running.
    pub fn start(
        source: Box<dyn VideoSource>,
        hub: Arc<RelayHub<FramePacket>>,
        config: CaptureConfig,
    ) -> Result<Self, PipelineError> {
        let control = CaptureControl::default();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<bool>(1);
        let uri = source.uri().to_string();

        let thread_control = control.clone();
        let handle = std::thread::Builder::new()
            .name("frame-source".into())
            .spawn(move || run_capture(source, hub, thread_control, config, ready_tx))
            .map_err(|e| PipelineError::SourceUnavailable {
                uri: uri.clone(),
                reason: format!("failed to spawn capture thread: {e}"),
            })?;

        match ready_rx.recv() {
            Ok(true) => Ok(Self {
                control,
                handle: Some(handle),
            }),
            _ => Err(join_capture(handle).err().unwrap_or_else(|| {
                PipelineError::SourceUnavailable {
                    uri,
                    reason: "capture thread exited before opening".into(),
                }
            })),
        }
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    /// True once the capture thread has exited (end of stream, failure or stop).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Signals the capture loop to exit after its current iteration and
    /// returns the thread's outcome. Later calls return `Ok(())`.
    pub fn stop(&mut self) -> Result<(), PipelineError> {
        self.control.request_stop();
        match self.handle.take() {
            Some(handle) => join_capture(handle),
            None => Ok(()),
        }
    }

    /// Waits for capture to end on its own (end of stream or failure).
    pub fn wait(mut self) -> Result<(), PipelineError> {
        match self.handle.take() {
            Some(handle) => join_capture(handle),
            None => Ok(()),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Capture ended with error: {e}");
        }
    }
}

fn join_capture(handle: JoinHandle<Result<(), PipelineError>>) -> Result<(), PipelineError> {
    handle.join().unwrap_or_else(|_| {
        Err(PipelineError::CaptureFailure {
            attempts: 0,
            reason: "capture thread panicked".into(),
        })
    })
}

fn run_capture(
    mut source: Box<dyn VideoSource>,
    hub: Arc<RelayHub<FramePacket>>,
    control: CaptureControl,
    config: CaptureConfig,
    ready_tx: crossbeam_channel::Sender<bool>,
) -> Result<(), PipelineError> {
    if let Err(e) = source.open() {
        let error = PipelineError::SourceUnavailable {
            uri: source.uri().to_string(),
            reason: e.to_string(),
        };
        log::error!("{error}");
        source.release();
        hub.close();
        let _ = ready_tx.send(false);
        return Err(error);
    }
    let _ = ready_tx.send(true);

    let result = capture_loop(source.as_mut(), &hub, &control, &config);
    source.release();
    hub.close();

    match &result {
        Ok(()) => log::info!("Capture of {} finished", source.uri()),
        Err(e) => log::error!("Capture of {} failed: {e}", source.uri()),
    }
    result
}

fn capture_loop(
    source: &mut dyn VideoSource,
    hub: &RelayHub<FramePacket>,
    control: &CaptureControl,
    config: &CaptureConfig,
) -> Result<(), PipelineError> {
    let max_retries = config.max_retries.max(1);
    let mut sequence: u64 = 0;
    let mut failures = 0usize;

    while control.wait_until_runnable(hub, config.pause_when_idle) {
        match source.read() {
            Ok(Some(frame)) => {
                failures = 0;
                let mut frame = frame.resized(config.width, config.height);
                frame.set_sequence(sequence);
                sequence += 1;
                hub.publish(&FramePacket::new(frame));
            }
            Ok(None) => {
                log::info!("End of stream after {sequence} frames");
                return Ok(());
            }
            Err(e) => {
                failures += 1;
                log::warn!("Frame read failed ({failures}/{max_retries}): {e}");
                if failures >= max_retries {
                    return Err(PipelineError::CaptureFailure {
                        attempts: failures,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}
