//! Detection store for a whole run.
//!
//! A [`DetectionSequence`] holds one [`FrameDetections`] per stored frame and
//! addresses them in one of two ways:
//!
//! - **Dense**: one slot per frame, slot index == frame number.
//! - **Sparse**: slots are keyed by hardware trigger numbers kept in a lookup
//!   table parallel to the slots. Lookups are linear scans.
//!
//! Frame numbers given to the sparse mode are translated to triggers through
//! the optional [`FrameSource`] link.

mod io;

pub use io::LoadSummary;

use crate::config::DEFAULT_MAX_FRAMES;
use crate::detection::{DetectionPoint, DetectionRef};
use crate::frame::FrameDetections;
use crate::source::FrameSource;
use nalgebra::Point2;
use std::fmt;
use std::sync::Arc;

/// How stored frames are addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addressing {
    /// Slot index is the frame number.
    Dense,
    /// One trigger per slot, ascending after [`DetectionSequence::sort_frames`].
    Sparse { triggers: Vec<i64> },
}

/// Key used to look up a stored frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKey {
    /// Raw storage slot, regardless of addressing.
    Slot(usize),
    /// Sequence-relative frame number.
    Frame(i64),
    /// Hardware trigger number.
    Trigger(i64),
}

/// Unit of a `[from, to)` range argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    Frames,
    Triggers,
}

/// Ordered collection of per-frame detections.
#[derive(Clone)]
pub struct DetectionSequence {
    frames: Vec<FrameDetections>,
    addressing: Addressing,
    source: Option<Arc<dyn FrameSource>>,
}

impl DetectionSequence {
    /// Dense sequence with `n` empty frames numbered `0..n`.
    pub fn dense(n: usize) -> Self {
        let mut seq = Self::sparse();
        seq.set_frame_count(n);
        seq
    }

    /// Empty sparse (trigger-keyed) sequence.
    pub fn sparse() -> Self {
        Self {
            frames: Vec::new(),
            addressing: Addressing::Sparse {
                triggers: Vec::new(),
            },
            source: None,
        }
    }

    /// Attach the frame container used for frame/trigger translation.
    pub fn with_source(mut self, source: Arc<dyn FrameSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn set_source(&mut self, source: Option<Arc<dyn FrameSource>>) {
        self.source = source;
    }

    pub fn source(&self) -> Option<&Arc<dyn FrameSource>> {
        self.source.as_ref()
    }

    /// Switch to dense addressing with `n` empty frames. Prior contents are dropped.
    pub fn set_frame_count(&mut self, n: usize) {
        self.frames = (0..n).map(|i| FrameDetections::new(i as i64)).collect();
        self.addressing = Addressing::Dense;
    }

    /// Switch to empty sparse addressing. Prior contents are dropped.
    pub fn reset_sparse(&mut self) {
        self.frames.clear();
        self.addressing = Addressing::Sparse {
            triggers: Vec::new(),
        };
    }

    pub fn addressing(&self) -> &Addressing {
        &self.addressing
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self.addressing, Addressing::Sparse { .. })
    }

    /// Trigger lookup table (sparse mode only).
    pub fn trigger_lookup(&self) -> Option<&[i64]> {
        match &self.addressing {
            Addressing::Sparse { triggers } => Some(triggers),
            Addressing::Dense => None,
        }
    }

    /// Number of stored frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// All stored frames in slot order.
    pub fn frames(&self) -> &[FrameDetections] {
        &self.frames
    }

    /// Mutable access to the stored frames.
    ///
    /// Frame numbers must not be changed through this; the trigger table is
    /// not updated.
    pub fn frames_mut(&mut self) -> impl Iterator<Item = &mut FrameDetections> {
        self.frames.iter_mut()
    }

    /// Total number of detections across all frames.
    pub fn total_detections(&self) -> usize {
        self.frames.iter().map(|f| f.len()).sum()
    }

    /// Slot holding exactly `trigger`.
    pub fn find_trigger(&self, trigger: i64) -> Option<usize> {
        self.trigger_lookup()?.iter().position(|&t| t == trigger)
    }

    /// Slot holding `trigger`, else the next higher trigger, else the previous one.
    pub fn find_trigger_nearest(&self, trigger: i64) -> Option<usize> {
        let triggers = self.trigger_lookup()?;
        if let Some(slot) = self.find_trigger(trigger) {
            return Some(slot);
        }

        let next = triggers
            .iter()
            .enumerate()
            .filter(|&(_, &t)| t > trigger)
            .min_by_key(|&(_, &t)| t)
            .map(|(i, _)| i);

        next.or_else(|| {
            triggers
                .iter()
                .enumerate()
                .filter(|&(_, &t)| t < trigger)
                .max_by_key(|&(_, &t)| t)
                .map(|(i, _)| i)
        })
    }

    /// Storage slot for `key`, or `None` when it cannot be resolved.
    pub fn slot_of(&self, key: FrameKey) -> Option<usize> {
        match (key, &self.addressing) {
            (FrameKey::Slot(slot), _) => (slot < self.frames.len()).then_some(slot),
            (FrameKey::Frame(frame), Addressing::Dense) => usize::try_from(frame)
                .ok()
                .filter(|&slot| slot < self.frames.len()),
            (FrameKey::Frame(frame), Addressing::Sparse { .. }) => {
                let trigger = self.source.as_ref()?.trigger_of_frame(frame)?;
                self.find_trigger(trigger)
            }
            (FrameKey::Trigger(trigger), Addressing::Dense) => {
                let frame = self.source.as_ref()?.frame_of_trigger(trigger)?;
                self.slot_of(FrameKey::Frame(frame))
            }
            (FrameKey::Trigger(trigger), Addressing::Sparse { .. }) => self.find_trigger(trigger),
        }
    }

    /// Frame for `key`, or `None` when it cannot be resolved.
    pub fn frame_at(&self, key: FrameKey) -> Option<&FrameDetections> {
        self.slot_of(key).map(|slot| &self.frames[slot])
    }

    /// Mutable frame for `key`, or `None` when it cannot be resolved.
    pub fn frame_at_mut(&mut self, key: FrameKey) -> Option<&mut FrameDetections> {
        self.slot_of(key).map(move |slot| &mut self.frames[slot])
    }

    /// Slot whose stored frame number (trigger in sparse mode) equals `frame_no`.
    pub fn slot_of_frame_no(&self, frame_no: i64) -> Option<usize> {
        match &self.addressing {
            Addressing::Sparse { .. } => self.find_trigger(frame_no),
            Addressing::Dense => {
                let direct = usize::try_from(frame_no)
                    .ok()
                    .filter(|&s| self.frames.get(s).map(|f| f.frame_no) == Some(frame_no));
                direct.or_else(|| self.frames.iter().position(|f| f.frame_no == frame_no))
            }
        }
    }

    /// Store `frame` under its frame number (trigger in sparse mode).
    ///
    /// An existing slot with the same number is replaced. Dense sequences grow
    /// to fit; sparse sequences insert new triggers in ascending position.
    /// Returns the slot, or `None` for a dense frame number that is negative or
    /// past the growth limit ([`DEFAULT_MAX_FRAMES`], or the source's frame count).
    pub fn insert_frame(&mut self, frame: FrameDetections) -> Option<usize> {
        let frame_no = frame.frame_no;
        if let Addressing::Sparse { triggers } = &mut self.addressing {
            if let Some(slot) = triggers.iter().position(|&t| t == frame_no) {
                self.frames[slot] = frame;
                return Some(slot);
            }
            let slot = triggers.partition_point(|&t| t < frame_no);
            triggers.insert(slot, frame_no);
            self.frames.insert(slot, frame);
            return Some(slot);
        }

        let slot = usize::try_from(frame_no).ok()?;
        if slot >= self.frames.len() {
            if slot >= self.growth_limit(DEFAULT_MAX_FRAMES) {
                tracing::warn!(frame = frame_no, "frame number past growth limit");
                return None;
            }
            self.grow_dense(slot + 1);
        }
        self.frames[slot] = frame;
        Some(slot)
    }

    /// Sort slots by frame number (trigger in sparse mode), keeping the lookup
    /// table parallel to the slots.
    pub fn sort_frames(&mut self) {
        match &mut self.addressing {
            Addressing::Dense => self.frames.sort_by_key(|f| f.frame_no),
            Addressing::Sparse { triggers } => {
                let mut paired: Vec<(i64, FrameDetections)> =
                    triggers.drain(..).zip(self.frames.drain(..)).collect();
                paired.sort_by_key(|(t, _)| *t);
                for (t, f) in paired {
                    triggers.push(t);
                    self.frames.push(f);
                }
            }
        }
    }

    /// Slots covered by the half-open range `[from, to)`.
    ///
    /// Unresolvable bounds and `to <= from` yield an empty list.
    pub fn slot_range(&self, from: i64, to: i64, kind: RangeKind) -> Vec<usize> {
        if to <= from {
            return Vec::new();
        }

        match (&self.addressing, kind) {
            (Addressing::Dense, RangeKind::Frames) => self.dense_slots(from, to),
            (Addressing::Dense, RangeKind::Triggers) => {
                let Some(source) = self.source.as_ref() else {
                    return Vec::new();
                };
                match (source.frame_of_trigger(from), source.frame_of_trigger(to)) {
                    (Some(f), Some(t)) => self.dense_slots(f, t),
                    (Some(f), None) if to > self.max_source_trigger() => {
                        self.dense_slots(f, i64::MAX)
                    }
                    _ => Vec::new(),
                }
            }
            (Addressing::Sparse { .. }, RangeKind::Triggers) => self.sparse_slots(from, to),
            (Addressing::Sparse { .. }, RangeKind::Frames) => {
                let Some(source) = self.source.as_ref() else {
                    return Vec::new();
                };
                let Some(t_from) = source.trigger_of_frame(from) else {
                    return Vec::new();
                };
                let t_to = match source.trigger_of_frame(to) {
                    Some(t) => t,
                    None if to >= source.frame_count() as i64 => i64::MAX,
                    None => return Vec::new(),
                };
                self.sparse_slots(t_from, t_to)
            }
        }
    }

    fn dense_slots(&self, from: i64, to: i64) -> Vec<usize> {
        let start = from.max(0) as usize;
        let end = usize::try_from(to.max(0))
            .unwrap_or(usize::MAX)
            .min(self.frames.len());
        (start..end.max(start)).collect()
    }

    fn sparse_slots(&self, from: i64, to: i64) -> Vec<usize> {
        self.trigger_lookup()
            .map(|triggers| {
                triggers
                    .iter()
                    .enumerate()
                    .filter(|&(_, &t)| t >= from && t < to)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn max_source_trigger(&self) -> i64 {
        self.source
            .as_ref()
            .and_then(|s| {
                (0..s.frame_count() as i64)
                    .filter_map(|f| s.trigger_of_frame(f))
                    .max()
            })
            .unwrap_or(i64::MIN)
    }

    // Dense length growth may reach.
    pub(crate) fn growth_limit(&self, max_frames: usize) -> usize {
        self.source
            .as_ref()
            .map_or(max_frames, |s| s.frame_count().min(max_frames))
    }

    fn grow_dense(&mut self, len: usize) {
        let start = self.frames.len();
        if len > start {
            self.frames
                .extend((start..len).map(|i| FrameDetections::new(i as i64)));
        }
    }

    /// Detection referenced by `r`, resolved by frame number and position.
    pub fn resolve(&self, r: &DetectionRef) -> Option<&DetectionPoint> {
        let slot = self.slot_of_frame_no(r.frame)?;
        let frame = &self.frames[slot];
        r.resolve(&frame.detections).map(|i| &frame.detections[i])
    }

    /// Mutable detection referenced by `r`.
    pub fn resolve_mut(&mut self, r: &DetectionRef) -> Option<&mut DetectionPoint> {
        let slot = self.slot_of_frame_no(r.frame)?;
        let frame = &mut self.frames[slot];
        let index = r.resolve(&frame.detections)?;
        Some(&mut frame.detections[index])
    }

    /// Detections inside `polygon` over `[from, to)`, as `(frame_no, index)` pairs.
    pub fn points_inside_of_polygon(
        &self,
        polygon: &[Point2<f64>],
        from: i64,
        to: i64,
        kind: RangeKind,
    ) -> Vec<(i64, usize)> {
        self.slot_range(from, to, kind)
            .into_iter()
            .flat_map(|slot| {
                let frame = &self.frames[slot];
                frame
                    .points_inside_of_polygon(polygon)
                    .into_iter()
                    .map(move |i| (frame.frame_no, i))
            })
            .collect()
    }

    /// Remove detections inside `polygon` over `[from, to)`.
    pub fn remove_points_inside_of_polygon(
        &mut self,
        polygon: &[Point2<f64>],
        from: i64,
        to: i64,
        kind: RangeKind,
    ) -> usize {
        self.slot_range(from, to, kind)
            .into_iter()
            .map(|slot| self.frames[slot].remove_points_inside_of_polygon(polygon))
            .sum()
    }

    /// Apply [`FrameDetections::clean`] to every frame.
    pub fn clean(&mut self, min_distance: f64) -> usize {
        self.each_frame(|f| f.clean(min_distance))
    }

    /// Apply [`FrameDetections::clean_clusters`] to every frame.
    pub fn clean_clusters(&mut self, min_dist: f64, min_count: usize) -> usize {
        self.each_frame(|f| f.clean_clusters(min_dist, min_count))
    }

    pub fn filter_by_area(&mut self, threshold: f64, invert: bool) -> usize {
        self.each_frame(|f| f.filter_by_area(threshold, invert))
    }

    pub fn filter_by_max_int(&mut self, threshold: f64, invert: bool) -> usize {
        self.each_frame(|f| f.filter_by_max_int(threshold, invert))
    }

    pub fn filter_by_circularity(&mut self, threshold: f64, invert: bool) -> usize {
        self.each_frame(|f| f.filter_by_circularity(threshold, invert))
    }

    pub fn filter_by_inertia(&mut self, threshold: f64, invert: bool) -> usize {
        self.each_frame(|f| f.filter_by_inertia(threshold, invert))
    }

    pub fn filter_by_convexity(&mut self, threshold: f64, invert: bool) -> usize {
        self.each_frame(|f| f.filter_by_convexity(threshold, invert))
    }

    pub fn filter_by_radius(&mut self, threshold: f64, invert: bool) -> usize {
        self.each_frame(|f| f.filter_by_radius(threshold, invert))
    }

    fn each_frame<F>(&mut self, mut op: F) -> usize
    where
        F: FnMut(&mut FrameDetections) -> usize,
    {
        let removed: usize = self.frames.iter_mut().map(&mut op).sum();
        if removed > 0 {
            tracing::debug!(removed, frames = self.frames.len(), "filtered detections");
        }
        removed
    }
}

impl Default for DetectionSequence {
    fn default() -> Self {
        Self::dense(0)
    }
}

impl fmt::Debug for DetectionSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectionSequence")
            .field("frames", &self.frames.len())
            .field("addressing", &self.addressing)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}
