//! Interface to the frame container the detections were extracted from.

use crate::frame::Timestamp;

/// Trigger and timestamp metadata of a recorded frame container.
///
/// Frame numbers are sequence-relative (0-based); triggers are the hardware
/// sequence numbers recorded with each frame.
pub trait FrameSource: Send + Sync {
    /// Total number of frames in the container.
    fn frame_count(&self) -> usize;

    /// Capture time of `frame`.
    fn timestamp_of_frame(&self, frame: i64) -> Option<Timestamp>;

    /// Trigger number recorded with `frame`.
    fn trigger_of_frame(&self, frame: i64) -> Option<i64>;

    /// Frame number carrying `trigger`.
    fn frame_of_trigger(&self, trigger: i64) -> Option<i64>;
}

/// In-memory trigger table, one entry per frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerTable {
    entries: Vec<(i64, Timestamp)>,
}

impl TriggerTable {
    /// Create a table from `(trigger, timestamp)` pairs in frame order.
    pub fn new(entries: Vec<(i64, Timestamp)>) -> Self {
        Self { entries }
    }

    /// Table with the given triggers and default timestamps.
    pub fn from_triggers(triggers: &[i64]) -> Self {
        Self::new(triggers.iter().map(|&t| (t, Timestamp::default())).collect())
    }

    /// Append a frame.
    pub fn push(&mut self, trigger: i64, timestamp: Timestamp) {
        self.entries.push((trigger, timestamp));
    }

    fn entry(&self, frame: i64) -> Option<&(i64, Timestamp)> {
        usize::try_from(frame).ok().and_then(|i| self.entries.get(i))
    }
}

impl FrameSource for TriggerTable {
    fn frame_count(&self) -> usize {
        self.entries.len()
    }

    fn timestamp_of_frame(&self, frame: i64) -> Option<Timestamp> {
        self.entry(frame).map(|e| e.1)
    }

    fn trigger_of_frame(&self, frame: i64) -> Option<i64> {
        self.entry(frame).map(|e| e.0)
    }

    fn frame_of_trigger(&self, trigger: i64) -> Option<i64> {
        self.entries
            .iter()
            .position(|e| e.0 == trigger)
            .map(|i| i as i64)
    }
}
