//! Two-pass IoU tracker in the style of ByteTrack.
//!
//! Confident candidates are associated first and may open new tracks. Weak
//! candidates are then offered to the tracks still unmatched: they keep a
//! person's id alive through occlusion or motion blur but never open a track.
//! Each track carries a constant-velocity estimate so a box that moved
//! between detector invocations still overlaps its prediction.

use super::math::{bbox_iou, BBox};

#[derive(Clone, Debug)]
pub struct Candidate {
    pub bbox: BBox,
    pub score: f64,
}

/// A track observed in the latest [`ByteTracker::update`].
#[derive(Clone, Debug)]
pub struct Track {
    pub id: u32,
    pub bbox: BBox,
    /// Index into the candidate slice that produced this observation.
    pub candidate_index: Option<usize>,
}

/// Candidates at or above this score are confident.
const CONFIDENT_SCORE: f64 = 0.5;
/// Minimum IoU between a prediction and a candidate to associate them.
const MIN_IOU: f64 = 0.3;
/// Share of the newest displacement blended into the velocity estimate.
const VELOCITY_GAIN: f64 = 0.5;

#[derive(Clone, Debug)]
struct TrackSlot {
    id: u32,
    bbox: BBox,
    velocity: BBox,
    missed: usize,
    observed: Option<usize>,
}

impl TrackSlot {
    fn predicted(&self) -> BBox {
        let steps = (self.missed + 1) as f64;
        std::array::from_fn(|i| self.bbox[i] + self.velocity[i] * steps)
    }

    fn observe(&mut self, bbox: BBox, candidate: usize) {
        let steps = (self.missed + 1) as f64;
        for i in 0..4 {
            let step = (bbox[i] - self.bbox[i]) / steps;
            self.velocity[i] += VELOCITY_GAIN * (step - self.velocity[i]);
        }
        self.bbox = bbox;
        self.missed = 0;
        self.observed = Some(candidate);
    }
}

pub struct ByteTracker {
    slots: Vec<TrackSlot>,
    next_id: u32,
    max_lost: usize,
}

impl ByteTracker {
    /// `max_lost` is how many consecutive updates a track may go unobserved
    /// before its id is retired.
    pub fn new(max_lost: usize) -> Self {
        Self {
            slots: Vec::new(),
            next_id: 1,
            max_lost,
        }
    }

    /// Associates this invocation's candidates with existing tracks and
    /// returns the tracks observed in it.
    pub fn update(&mut self, candidates: &[Candidate]) -> Vec<Track> {
        for slot in &mut self.slots {
            slot.observed = None;
        }
        let (confident, weak): (Vec<usize>, Vec<usize>) =
            (0..candidates.len()).partition(|&i| candidates[i].score >= CONFIDENT_SCORE);

        let all_slots: Vec<usize> = (0..self.slots.len()).collect();
        let leftover = self.associate(&all_slots, &confident, candidates);

        let unmatched_slots: Vec<usize> = all_slots
            .into_iter()
            .filter(|&s| self.slots[s].observed.is_none())
            .collect();
        self.associate(&unmatched_slots, &weak, candidates);

        let existing = self.slots.len();
        for index in leftover {
            self.slots.push(TrackSlot {
                id: self.next_id,
                bbox: candidates[index].bbox,
                velocity: [0.0; 4],
                missed: 0,
                observed: Some(index),
            });
            self.next_id += 1;
        }

        for slot in &mut self.slots[..existing] {
            if slot.observed.is_none() {
                slot.missed += 1;
            }
        }
        let max_lost = self.max_lost;
        self.slots.retain(|slot| slot.missed <= max_lost);

        self.slots
            .iter()
            .filter_map(|slot| {
                slot.observed.map(|index| Track {
                    id: slot.id,
                    bbox: slot.bbox,
                    candidate_index: Some(index),
                })
            })
            .collect()
    }

    /// Greedily pairs slots and candidates by descending IoU against the
    /// slot's prediction. Returns the candidates left unpaired.
    fn associate(
        &mut self,
        slots: &[usize],
        pool: &[usize],
        candidates: &[Candidate],
    ) -> Vec<usize> {
        let mut pairs: Vec<(f64, usize, usize)> = slots
            .iter()
            .flat_map(|&s| {
                let predicted = self.slots[s].predicted();
                pool.iter().filter_map(move |&c| {
                    let iou = bbox_iou(&predicted, &candidates[c].bbox);
                    (iou >= MIN_IOU).then_some((iou, s, c))
                })
            })
            .collect();
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut taken = vec![false; candidates.len()];
        for (_, s, c) in pairs {
            if taken[c] || self.slots[s].observed.is_some() {
                continue;
            }
            taken[c] = true;
            self.slots[s].observe(candidates[c].bbox, c);
        }
        pool.iter().copied().filter(|&c| !taken[c]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(x1: f64, y1: f64, x2: f64, y2: f64, score: f64) -> Candidate {
        Candidate {
            bbox: [x1, y1, x2, y2],
            score,
        }
    }

    fn ids(tracks: &[Track]) -> Vec<u32> {
        let mut ids: Vec<u32> = tracks.iter().map(|t| t.id).collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn test_confident_candidates_open_tracks() {
        let mut tracker = ByteTracker::new(5);
        let tracks = tracker.update(&[
            cand(0.0, 0.0, 50.0, 50.0, 0.9),
            cand(100.0, 100.0, 150.0, 150.0, 0.8),
        ]);
        assert_eq!(ids(&tracks), vec![1, 2]);
        assert!(tracks.iter().all(|t| t.candidate_index.is_some()));
    }

    #[test]
    fn test_id_follows_moving_box() {
        let mut tracker = ByteTracker::new(5);
        tracker.update(&[cand(10.0, 10.0, 60.0, 60.0, 0.9)]);
        for step in 1..6 {
            let dx = step as f64 * 15.0;
            let tracks = tracker.update(&[cand(10.0 + dx, 10.0, 60.0 + dx, 60.0, 0.9)]);
            assert_eq!(ids(&tracks), vec![1]);
        }
    }

    #[test]
    fn test_retired_after_max_lost_updates() {
        let mut tracker = ByteTracker::new(2);
        tracker.update(&[cand(10.0, 10.0, 60.0, 60.0, 0.9)]);
        tracker.update(&[]);
        tracker.update(&[]);
        tracker.update(&[]);

        let tracks = tracker.update(&[cand(10.0, 10.0, 60.0, 60.0, 0.9)]);
        assert_eq!(ids(&tracks), vec![2]);
    }

    #[test]
    fn test_reacquired_within_max_lost() {
        let mut tracker = ByteTracker::new(3);
        tracker.update(&[cand(10.0, 10.0, 60.0, 60.0, 0.9)]);
        assert!(tracker.update(&[]).is_empty());
        assert!(tracker.update(&[]).is_empty());

        let tracks = tracker.update(&[cand(12.0, 12.0, 62.0, 62.0, 0.9)]);
        assert_eq!(ids(&tracks), vec![1]);
    }

    #[test]
    fn test_weak_candidate_keeps_track_alive() {
        let mut tracker = ByteTracker::new(5);
        tracker.update(&[cand(10.0, 10.0, 60.0, 60.0, 0.9)]);
        let tracks = tracker.update(&[cand(12.0, 12.0, 62.0, 62.0, 0.3)]);
        assert_eq!(ids(&tracks), vec![1]);
        assert_eq!(tracks[0].candidate_index, Some(0));
    }

    #[test]
    fn test_weak_candidate_never_opens_track() {
        let mut tracker = ByteTracker::new(5);
        assert!(tracker.update(&[cand(10.0, 10.0, 60.0, 60.0, 0.3)]).is_empty());
        assert!(tracker.update(&[]).is_empty());
    }

    #[test]
    fn test_candidate_index_points_at_matching_box() {
        let mut tracker = ByteTracker::new(5);
        tracker.update(&[
            cand(0.0, 0.0, 50.0, 50.0, 0.9),
            cand(200.0, 200.0, 250.0, 250.0, 0.9),
        ]);
        // Same people, reversed order in the detector output.
        let tracks = tracker.update(&[
            cand(202.0, 202.0, 252.0, 252.0, 0.9),
            cand(2.0, 2.0, 52.0, 52.0, 0.9),
        ]);
        for track in tracks {
            let expected = if track.id == 1 { 1 } else { 0 };
            assert_eq!(track.candidate_index, Some(expected));
        }
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut tracker = ByteTracker::new(0);
        assert_eq!(ids(&tracker.update(&[cand(0.0, 0.0, 50.0, 50.0, 0.9)])), vec![1]);
        tracker.update(&[]);
        assert_eq!(ids(&tracker.update(&[cand(0.0, 0.0, 50.0, 50.0, 0.9)])), vec![2]);
    }
}
