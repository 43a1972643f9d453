use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::shared::error::PipelineError;

/// Owns one elapsed-time timer per actively tracked id.
///
/// Timers are created and destroyed only by [`synchronize`](Self::synchronize),
/// so after each call the tracked set equals the observed set.
#[derive(Debug, Default)]
pub struct TrackLifecycleManager {
    timers: HashMap<u32, Instant>,
}

impl TrackLifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile timers with the ids seen by the latest detector invocation.
    pub fn synchronize(&mut self, observed: impl IntoIterator<Item = u32>) {
        self.synchronize_at(observed, Instant::now());
    }

    fn synchronize_at(&mut self, observed: impl IntoIterator<Item = u32>, now: Instant) {
        let observed: HashSet<u32> = observed.into_iter().collect();

        let before = self.timers.len();
        self.timers.retain(|id, _| observed.contains(id));
        let dropped = before - self.timers.len();

        let mut created = 0;
        for id in observed {
            self.timers.entry(id).or_insert_with(|| {
                created += 1;
                now
            });
        }

        if created > 0 || dropped > 0 {
            log::debug!(
                "Tracks: +{created} -{dropped} ({} active)",
                self.timers.len()
            );
        }
    }

    /// Time since `id` was first observed, as `HH:MM:SS`.
    pub fn elapsed(&self, id: u32) -> Result<String, PipelineError> {
        let started = self
            .timers
            .get(&id)
            .ok_or(PipelineError::UnknownTrack(id))?;
        Ok(format_elapsed(started.elapsed()))
    }

    pub fn is_tracked(&self, id: u32) -> bool {
        self.timers.contains_key(&id)
    }

    /// Currently tracked ids in ascending order.
    pub fn tracked_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.timers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

/// Whole seconds as zero-padded `HH:MM:SS`. Hours widen past 99.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (minutes, seconds) = (total / 60, total % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
