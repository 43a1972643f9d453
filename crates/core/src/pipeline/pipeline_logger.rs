use std::collections::BTreeMap;
use std::time::Instant;

/// Cross-cutting logger for stream consumer events.
///
/// Keeps the consumer loop independent of where timings end up. The CLI
/// installs [`SummaryPipelineLogger`]; tests use [`NullPipelineLogger`].
pub trait PipelineLogger: Send {
    /// Report that one more frame left the consumer.
    fn frame_emitted(&mut self, sequence: u64);

    /// Record how long a named stage took for one frame.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record a point-in-time metric (e.g. detection count).
    fn metric(&mut self, name: &str, value: f64);

    fn info(&mut self, message: &str);

    /// Emit an end-of-stream summary. Default: no-op.
    fn summary(&self) {}
}

pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn frame_emitted(&mut self, _sequence: u64) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Running aggregate of one stage timing or metric.
///
/// Live streams have no natural end, so samples are folded in rather than
/// kept.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunningStats {
    pub count: u64,
    pub total: f64,
    pub max: f64,
}

impl RunningStats {
    fn push(&mut self, value: f64) {
        if self.count == 0 || value > self.max {
            self.max = value;
        }
        self.count += 1;
        self.total += value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

/// Aggregates per-stage timing and metrics for one stream and logs a
/// summary when the stream ends.
///
/// Every `throttle_frames` emitted frames a progress line with the average
/// stage timings so far is logged at debug level.
pub struct SummaryPipelineLogger {
    label: String,
    throttle_frames: u64,
    timings: BTreeMap<String, RunningStats>,
    metrics: BTreeMap<String, RunningStats>,
    started: Instant,
    frames: u64,
    last_sequence: Option<u64>,
}

impl SummaryPipelineLogger {
    pub fn new(label: impl Into<String>, throttle_frames: u64) -> Self {
        Self {
            label: label.into(),
            throttle_frames: throttle_frames.max(1),
            timings: BTreeMap::new(),
            metrics: BTreeMap::new(),
            started: Instant::now(),
            frames: 0,
            last_sequence: None,
        }
    }

    /// Returns the formatted summary, or `None` if nothing was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_s = self.started.elapsed().as_secs_f64();
        let mut lines = vec![format!(
            "{} summary ({} frames, {elapsed_s:.1}s streamed):",
            self.label, self.frames
        )];

        for (stage, stats) in &self.timings {
            lines.push(format!(
                "  {stage:8}: avg {:6.1}ms  max {:6.1}ms  ({} calls)",
                stats.mean(),
                stats.max,
                stats.count
            ));
        }
        for (name, stats) in &self.metrics {
            lines.push(format!("  {name}: avg {:.1}  max {:.0}", stats.mean(), stats.max));
        }

        if self.frames > 0 && elapsed_s > 0.0 {
            lines.push(format!(
                "  Throughput: {:.1} fps",
                self.frames as f64 / elapsed_s
            ));
        }
        if let (Some(last), true) = (self.last_sequence, self.frames > 0) {
            lines.push(format!("  Last sequence: {last}"));
        }

        Some(lines.join("\n"))
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn timing_stats(&self, stage: &str) -> Option<RunningStats> {
        self.timings.get(stage).copied()
    }

    pub fn metric_stats(&self, name: &str) -> Option<RunningStats> {
        self.metrics.get(name).copied()
    }

    fn progress_line(&self) -> String {
        let stages: Vec<String> = self
            .timings
            .iter()
            .map(|(stage, stats)| format!("{stage} {:.1}ms", stats.mean()))
            .collect();
        format!(
            "{}: {} frames emitted [{}]",
            self.label,
            self.frames,
            stages.join(", ")
        )
    }
}

impl PipelineLogger for SummaryPipelineLogger {
    fn frame_emitted(&mut self, sequence: u64) {
        self.frames += 1;
        self.last_sequence = Some(sequence);
        if self.frames % self.throttle_frames == 0 {
            log::debug!("{}", self.progress_line());
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics.entry(name.to_string()).or_default().push(value);
    }

    fn info(&mut self, message: &str) {
        log::info!("{}: {message}", self.label);
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}
