//! Trajectory registry.
//!
//! A [`TrackRegistry`] is a list of [`Track`]s, each an ordered-by-frame list
//! of [`TrackSample`]s. Track indices are positions in that list: structural
//! edits (join, delete, prune) shift or remove entries, so indices must not be
//! kept across mutating calls.

mod auto_join;
mod io;
mod statistics;

pub use auto_join::EndpointAnchor;
pub use statistics::{track_statistics, TrackStatistics};

use crate::detection::{flags, DetectionRef};
use crate::frame::{FrameDetections, Timestamp};
use crate::geometry::path_step;
use crate::sequence::DetectionSequence;
use nalgebra::Point2;
use std::collections::BTreeMap;
use thiserror::Error;

/// Reasons a [`TrackRegistry::join_tracks`] call was refused.
///
/// The registry is left unchanged in every case.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    #[error("track index {0} out of range")]
    InvalidTrack(usize),

    #[error("cannot join track {0} with itself")]
    SameTrack(usize),

    #[error("independent tracks: only {0} frames covered by a single track")]
    IndependentTracks(usize),

    #[error("need fixed start and end, got {start} and {end} candidates")]
    NoFixedEndpoints { start: usize, end: usize },

    #[error("ambiguous frames between {from} and {to} could not be resolved")]
    Unresolved { from: i64, to: i64 },
}

/// One trajectory sample, copied from a detection.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSample {
    pub x: f64,
    pub y: f64,

    /// Frame number (trigger number for sparse sequences).
    pub frame: i64,

    pub timestamp: Timestamp,

    pub intensity: f64,
    pub area: f64,
    pub max_diff: f64,
    pub min_area: f64,
    pub max_area: f64,
    pub threshold: f64,
    pub min_threshold: f64,
    pub ith_offset: i32,

    /// Link back to the originating detection, if any.
    pub detection_ref: Option<DetectionRef>,

    /// Flag pushed back onto the detection by [`TrackRegistry::push_flags`].
    pub flag: i32,
}

impl TrackSample {
    /// Sample at a position without detection metadata.
    pub fn new(x: f64, y: f64, frame: i64) -> Self {
        Self {
            x,
            y,
            frame,
            timestamp: Timestamp::default(),
            intensity: 0.0,
            area: 0.0,
            max_diff: 0.0,
            min_area: 0.0,
            max_area: 0.0,
            threshold: 0.0,
            min_threshold: 0.0,
            ith_offset: 0,
            detection_ref: None,
            flag: flags::VALID,
        }
    }

    /// Copy detection `index` of `frame` into a sample linked back to it.
    pub fn from_detection(frame: &FrameDetections, index: usize) -> Option<Self> {
        let d = frame.detections.get(index)?;
        Some(Self {
            x: d.x,
            y: d.y,
            frame: frame.frame_no,
            timestamp: frame.timestamp,
            intensity: d.peak_intensity,
            area: d.area,
            max_diff: frame.max_diff,
            min_area: frame.min_area,
            max_area: frame.max_area,
            threshold: frame.threshold,
            min_threshold: frame.min_threshold,
            ith_offset: frame.ith_offset,
            detection_ref: Some(DetectionRef::new(frame.frame_no, d.x, d.y).with_index(index)),
            flag: d.flags,
        })
    }

    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

/// A trajectory: samples ordered by ascending frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    samples: Vec<TrackSample>,
}

impl Track {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> &[TrackSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&TrackSample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&TrackSample> {
        self.samples.last()
    }

    pub fn get(&self, index: usize) -> Option<&TrackSample> {
        self.samples.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TrackSample> {
        self.samples.iter()
    }

    /// `(first frame, last frame)`, `None` for an empty track.
    pub fn frame_range(&self) -> Option<(i64, i64)> {
        Some((self.first()?.frame, self.last()?.frame))
    }

    /// Whether the frame ranges of both tracks intersect.
    pub fn overlaps(&self, other: &Track) -> bool {
        match (self.frame_range(), other.frame_range()) {
            (Some((a0, a1)), Some((b0, b1))) => a0 <= b1 && b0 <= a1,
            _ => false,
        }
    }

    /// Samples at `frame`.
    pub fn samples_at(&self, frame: i64) -> Vec<&TrackSample> {
        self.samples.iter().filter(|s| s.frame == frame).collect()
    }

    /// Closest samples before and after `frame` whose frames hold exactly one sample.
    pub fn fixed_neighbours(&self, frame: i64) -> Option<(&TrackSample, &TrackSample)> {
        let is_fixed = |s: &&TrackSample| self.samples_at(s.frame).len() == 1;
        let before = self
            .samples
            .iter()
            .rev()
            .filter(|s| s.frame < frame)
            .find(is_fixed)?;
        let after = self
            .samples
            .iter()
            .filter(|s| s.frame > frame)
            .find(is_fixed)?;
        Some((before, after))
    }

    /// Positions of all samples in order.
    pub fn positions(&self) -> Vec<Point2<f64>> {
        self.samples.iter().map(|s| s.position()).collect()
    }

    /// Append a sample, restoring frame order if needed.
    pub fn push(&mut self, sample: TrackSample) {
        let out_of_order = self.last().is_some_and(|l| l.frame > sample.frame);
        self.samples.push(sample);
        if out_of_order {
            self.sort();
        }
    }

    /// Stable sort by frame.
    pub fn sort(&mut self) {
        self.samples.sort_by_key(|s| s.frame);
    }
}

impl From<Vec<TrackSample>> for Track {
    fn from(samples: Vec<TrackSample>) -> Self {
        let mut track = Self { samples };
        track.sort();
        track
    }
}

impl<'a> IntoIterator for &'a Track {
    type Item = &'a TrackSample;
    type IntoIter = std::slice::Iter<'a, TrackSample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// The set of trajectories with manual and automated editing operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackRegistry {
    tracks: Vec<Track>,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One single-sample track per non-INVALID detection.
    ///
    /// `range` restricts conversion to frame numbers in `[from, to)`.
    pub fn from_sequence(sequence: &DetectionSequence, range: Option<(i64, i64)>) -> Self {
        let mut registry = Self::new();
        for frame in sequence.frames() {
            if let Some((from, to)) = range {
                if !(frame.frame_no >= from && frame.frame_no < to) {
                    continue;
                }
            }
            for (index, d) in frame.detections.iter().enumerate() {
                if d.flags == flags::INVALID {
                    continue;
                }
                if let Some(sample) = TrackSample::from_detection(frame, index) {
                    registry.tracks.push(Track::from(vec![sample]));
                }
            }
        }
        tracing::debug!(tracks = registry.tracks.len(), "registered detections as tracks");
        registry
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: usize) -> Option<&Track> {
        self.tracks.get(id)
    }

    /// Total number of samples over all tracks.
    pub fn total_samples(&self) -> usize {
        self.tracks.iter().map(Track::len).sum()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    /// Add an empty track and return its index.
    pub fn register_new_track(&mut self) -> usize {
        self.tracks.push(Track::new());
        self.tracks.len() - 1
    }

    /// Append `sample` to track `id`.
    pub fn update_track(&mut self, id: usize, sample: TrackSample) -> bool {
        match self.tracks.get_mut(id) {
            Some(track) => {
                track.push(sample);
                true
            }
            None => false,
        }
    }

    /// Add `sample` to track `id`.
    ///
    /// If the track already has a sample at that frame it is replaced when
    /// `replace` is set, otherwise the call is rejected.
    pub fn add_point_to_track(&mut self, id: usize, sample: TrackSample, replace: bool) -> bool {
        let Some(track) = self.tracks.get_mut(id) else {
            return false;
        };

        if let Some(pos) = track.samples.iter().position(|s| s.frame == sample.frame) {
            if !replace {
                return false;
            }
            track.samples[pos] = sample;
            return true;
        }

        track.samples.push(sample);
        track.sort();
        true
    }

    /// Remove sample `index` from track `id`, or split the track there.
    ///
    /// With `split_here` the track keeps `[0, index)` and `[index, ..)` becomes
    /// a new track appended to the registry; `index == 0` is rejected.
    pub fn remove_point_from_track(&mut self, id: usize, index: usize, split_here: bool) -> bool {
        let Some(track) = self.tracks.get_mut(id) else {
            return false;
        };
        if index >= track.len() {
            return false;
        }

        if split_here {
            if index == 0 {
                return false;
            }
            let tail = track.samples.split_off(index);
            self.tracks.push(Track { samples: tail });
        } else {
            track.samples.remove(index);
        }
        true
    }

    /// Remove track `id`. Higher indices shift down by one.
    pub fn delete_track(&mut self, id: usize) -> Option<Track> {
        (id < self.tracks.len()).then(|| self.tracks.remove(id))
    }

    /// Stable sort of track `id` by frame.
    pub fn sort_track(&mut self, id: usize) -> bool {
        match self.tracks.get_mut(id) {
            Some(track) => {
                track.sort();
                true
            }
            None => false,
        }
    }

    /// Merge track `m` into track `n`.
    ///
    /// Tracks whose frame ranges do not overlap are concatenated into `n`.
    /// Overlapping tracks are reconciled frame by frame: frames where only one
    /// of them has a sample are anchors, and every run of ambiguous frames
    /// between two anchors takes the candidate path with the smallest
    /// [`track_length`](crate::geometry::track_length). The reconciled track
    /// replaces the lower index.
    ///
    /// Returns the index of the merged track, which accounts for the removed
    /// slot. On error the registry is unchanged.
    pub fn join_tracks(&mut self, n: usize, m: usize) -> Result<usize, JoinError> {
        self.merge(n, m).map(|merge| merge.kept)
    }

    pub(crate) fn merge(&mut self, n: usize, m: usize) -> Result<Merge, JoinError> {
        let len = self.tracks.len();
        if n >= len {
            return Err(JoinError::InvalidTrack(n));
        }
        if m >= len {
            return Err(JoinError::InvalidTrack(m));
        }
        if n == m {
            return Err(JoinError::SameTrack(n));
        }

        if !self.tracks[n].overlaps(&self.tracks[m]) {
            let moved = std::mem::take(&mut self.tracks[m].samples);
            let target = &mut self.tracks[n];
            target.samples.extend(moved);
            target.sort();
            self.tracks.remove(m);
            let merge = Merge {
                kept: if m < n { n - 1 } else { n },
                removed: m,
            };
            tracing::debug!(n, m, result = merge.kept, "appended track");
            return Ok(merge);
        }

        let merged = match reconcile(&self.tracks[n], &self.tracks[m]) {
            Ok(merged) => merged,
            Err(e) => {
                tracing::debug!(n, m, error = %e, "join refused");
                return Err(e);
            }
        };

        let (lo, hi) = (n.min(m), n.max(m));
        self.tracks[lo] = Track { samples: merged };
        self.tracks.remove(hi);
        tracing::debug!(n, m, result = lo, "reconciled overlapping tracks");
        Ok(Merge {
            kept: lo,
            removed: hi,
        })
    }

    /// Write each sample's flag onto the detection it was copied from.
    ///
    /// References are resolved by frame number and position; samples whose
    /// detection no longer exists are skipped. Returns the number of updated
    /// detections.
    pub fn push_flags(&self, sequence: &mut DetectionSequence) -> usize {
        let mut updated = 0;
        for sample in self.tracks.iter().flat_map(Track::iter) {
            let Some(r) = sample.detection_ref.as_ref() else {
                continue;
            };
            if let Some(d) = sequence.resolve_mut(r) {
                d.flags = sample.flag;
                updated += 1;
            }
        }
        updated
    }

    /// Set the flag of every sample in track `id`.
    pub fn set_track_flag(&mut self, id: usize, flag: i32) -> bool {
        match self.tracks.get_mut(id) {
            Some(track) => {
                track.samples.iter_mut().for_each(|s| s.flag = flag);
                true
            }
            None => false,
        }
    }
}

/// Outcome of a successful join, in post-join indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Merge {
    /// Index of the merged track.
    pub(crate) kept: usize,
    /// Pre-join index of the slot that was erased.
    pub(crate) removed: usize,
}

impl Merge {
    /// Re-index a track that took no part in the join.
    pub(crate) fn shift(&self, index: usize) -> usize {
        if index > self.removed {
            index - 1
        } else {
            index
        }
    }
}

// Frame-by-frame reconciliation of two overlapping tracks.
fn reconcile(a: &Track, b: &Track) -> Result<Vec<TrackSample>, JoinError> {
    let mut union: BTreeMap<i64, Vec<&TrackSample>> = BTreeMap::new();
    for s in a.iter().chain(b.iter()) {
        union.entry(s.frame).or_default().push(s);
    }

    let single = union.values().filter(|c| c.len() == 1).count();
    if single <= 2 {
        return Err(JoinError::IndependentTracks(single));
    }

    let frames: Vec<(i64, Vec<&TrackSample>)> = union.into_iter().collect();
    let start = frames.first().map_or(0, |f| f.1.len());
    let end = frames.last().map_or(0, |f| f.1.len());
    if start != 1 || end != 1 {
        return Err(JoinError::NoFixedEndpoints { start, end });
    }

    let mut merged: Vec<TrackSample> = Vec::with_capacity(frames.len());
    merged.push(frames[0].1[0].clone());

    let mut k = 1;
    while k < frames.len() {
        if frames[k].1.len() == 1 {
            merged.push(frames[k].1[0].clone());
            k += 1;
            continue;
        }

        // The last frame is an anchor, so this stops inside the slice.
        let mut e = k;
        while frames[e].1.len() != 1 {
            e += 1;
        }

        let anchor = frames[k - 1].1[0];
        let next = frames[e].1[0];
        let path = best_path(anchor, &frames[k..e], next).ok_or(JoinError::Unresolved {
            from: frames[k - 1].0,
            to: frames[e].0,
        })?;
        merged.extend(path.into_iter().cloned());
        k = e;
    }

    Ok(merged)
}

// Minimum-length path through per-frame candidates between two anchors
// (Viterbi over the candidate sets, scored with `path_step`).
fn best_path<'a>(
    start: &TrackSample,
    segment: &[(i64, Vec<&'a TrackSample>)],
    end: &TrackSample,
) -> Option<Vec<&'a TrackSample>> {
    let first = &segment.first()?.1;
    let mut cost: Vec<f64> = first
        .iter()
        .map(|c| path_step(&start.position(), &c.position()))
        .collect();
    let mut back: Vec<Vec<usize>> = vec![Vec::new(); segment.len()];

    for f in 1..segment.len() {
        let prev = &segment[f - 1].1;
        let cur = &segment[f].1;
        let mut next_cost = Vec::with_capacity(cur.len());
        let mut pointers = Vec::with_capacity(cur.len());

        for c in cur {
            let (best_i, best) = prev
                .iter()
                .enumerate()
                .map(|(i, p)| (i, cost[i] + path_step(&p.position(), &c.position())))
                .fold((0, f64::INFINITY), |acc, x| if x.1 < acc.1 { x } else { acc });
            next_cost.push(best);
            pointers.push(best_i);
        }

        cost = next_cost;
        back[f] = pointers;
    }

    let last = &segment.last()?.1;
    let (mut idx, total) = last
        .iter()
        .enumerate()
        .map(|(i, c)| (i, cost[i] + path_step(&c.position(), &end.position())))
        .fold((0, f64::INFINITY), |acc, x| if x.1 < acc.1 { x } else { acc });
    if !total.is_finite() {
        return None;
    }

    let mut path = Vec::with_capacity(segment.len());
    for f in (0..segment.len()).rev() {
        path.push(segment[f].1[idx]);
        if f > 0 {
            idx = back[f][idx];
        }
    }
    path.reverse();
    Some(path)
}
