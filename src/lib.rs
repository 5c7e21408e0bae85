//! # blobtrack - Blob Trajectory Library
//!
//! Turns independent per-frame blob detections into persistent trajectories.
//!
//! The crate has two halves:
//!
//! - [`DetectionSequence`] stores the detections of a whole run, addressed either densely
//!   by frame number or sparsely by hardware trigger number.
//! - [`TrackRegistry`] holds the trajectories derived from those detections, with manual
//!   editing operations and an automated multi-pass track joining pipeline.
//!
//! ## Example
//!
//! ```rust,ignore
//! use blobtrack_rs::{AutoJoinConfig, DetectionSequence, NoProgress, TrackRegistry};
//!
//! let mut sequence = DetectionSequence::dense(100);
//! sequence.load_positions("positions.txt", &Default::default(), &mut NoProgress)?;
//!
//! let mut registry = TrackRegistry::from_sequence(&sequence, None);
//! registry.auto_join_tracks(&AutoJoinConfig::new(5.0, 10), &mut NoProgress);
//! registry.save("tracks.txt")?;
//! ```

// Public modules
pub mod config;
pub mod detection;
pub mod frame;
pub mod geometry;
pub mod progress;
pub mod sequence;
pub mod shape;
pub mod source;
pub mod track;

// Re-exports for convenience
pub use config::{AutoJoinConfig, LoadOptions};
pub use detection::{flags, DetectionPoint, DetectionRef};
pub use frame::{FrameDetections, Timestamp};
pub use progress::{CancelFlag, NoProgress, Progress};
pub use sequence::{Addressing, DetectionSequence, FrameKey, LoadSummary, RangeKind};
pub use source::{FrameSource, TriggerTable};
pub use track::{
    track_statistics, EndpointAnchor, JoinError, Track, TrackRegistry, TrackSample, TrackStatistics,
};

// Error types
pub use crate::error::{Error, Result};

mod error {
    use thiserror::Error;

    /// Errors that can occur in the blobtrack library
    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Invalid configuration: {0}")]
        InvalidConfig(String),

        #[error("IO error: {0}")]
        IoError(#[from] std::io::Error),
    }

    /// Result type for blobtrack operations
    pub type Result<T> = std::result::Result<T, Error>;
}
