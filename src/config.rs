//! Configuration for the automated track joiners and the text loaders.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Configuration for [`TrackRegistry::auto_join_tracks`](crate::TrackRegistry::auto_join_tracks).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoJoinConfig {
    /// Maximum plausible speed in pixels per frame.
    pub max_speed: f64,

    /// Maximum gap in frames bridged by an endpoint join.
    pub max_time_gap: i64,

    /// Tracks shorter than this are removed at the end of the pipeline.
    pub min_track_len: usize,

    /// Turn angle (radians) below which a sample counts as a spike.
    pub spike_angle: f64,

    /// Mean line-to-line distance below which overlapping tracks are merged.
    pub overlap_mean_distance: f64,

    /// Minimum length of a track extended by the endpoint passes.
    ///
    /// The default of 2 leaves single-sample tracks to be picked up as
    /// candidates only; set it to 1 to grow tracks from single detections.
    pub min_anchor_len: usize,
}

impl AutoJoinConfig {
    /// Create a configuration with default pruning and spike parameters.
    ///
    /// # Arguments
    /// * `max_speed` - Maximum displacement per frame
    /// * `max_time_gap` - Maximum frame gap between joined endpoints
    pub fn new(max_speed: f64, max_time_gap: i64) -> Self {
        Self {
            max_speed,
            max_time_gap,
            min_track_len: 3,
            spike_angle: 0.5,
            overlap_mean_distance: 3.0,
            min_anchor_len: 2,
        }
    }

    /// Check that all parameters are usable.
    pub fn validate(&self) -> Result<()> {
        if !(self.max_speed > 0.0) {
            return Err(Error::InvalidConfig(
                "max_speed must be positive".to_string(),
            ));
        }
        if self.max_time_gap <= 0 {
            return Err(Error::InvalidConfig(
                "max_time_gap must be positive".to_string(),
            ));
        }
        if !(0.0..=std::f64::consts::PI).contains(&self.spike_angle) {
            return Err(Error::InvalidConfig(
                "spike_angle must be within [0, pi]".to_string(),
            ));
        }
        if self.min_anchor_len == 0 {
            return Err(Error::InvalidConfig(
                "min_anchor_len must be at least 1".to_string(),
            ));
        }
        if self.overlap_mean_distance < 0.0 {
            return Err(Error::InvalidConfig(
                "overlap_mean_distance must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for AutoJoinConfig {
    fn default() -> Self {
        Self::new(10.0, 5)
    }
}

/// Largest dense frame count a load or insert may grow a sequence to.
pub const DEFAULT_MAX_FRAMES: usize = 1 << 22;

/// Options for loading position files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Half-open `[from, to)` frame (or trigger) range; lines outside are skipped.
    pub range: Option<(i64, i64)>,

    /// Grow the sequence to fit frames (or triggers) it does not know yet.
    pub grow: bool,

    /// Dense growth limit. An attached frame source lowers it to its frame count.
    pub max_frames: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            range: None,
            grow: false,
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }
}

impl LoadOptions {
    /// Load everything, growing the sequence as needed.
    pub fn growing() -> Self {
        Self {
            grow: true,
            ..Self::default()
        }
    }

    /// Restrict loading to `[from, to)`.
    pub fn with_range(mut self, from: i64, to: i64) -> Self {
        self.range = Some((from, to));
        self
    }

    /// Cap dense growth at `max_frames` frames.
    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Whether `frame` passes the range restriction.
    pub fn accepts(&self, frame: i64) -> bool {
        match self.range {
            Some((from, to)) => from < to && frame >= from && frame < to,
            None => true,
        }
    }
}
