//! Cooperative progress reporting and cancellation for long-running passes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receiver of progress reports from long-running loops.
///
/// Loops call [`Progress::report_progress`] once per outer iteration and stop
/// as soon as [`Progress::is_cancelled`] returns `true`. Work already committed
/// is kept; there is no rollback.
pub trait Progress {
    /// Report that `done` out of `total` outer iterations have completed.
    fn report_progress(&mut self, done: usize, total: usize);

    /// Whether the caller asked to stop.
    fn is_cancelled(&self) -> bool;
}

/// Progress sink that ignores reports and never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn report_progress(&mut self, _done: usize, _total: usize) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Cancellation flag that can be shared with another thread (e.g. a UI).
///
/// Progress reports are forwarded to `tracing` at trace level.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Clear a previous cancellation request.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Relaxed);
    }
}

impl Progress for CancelFlag {
    fn report_progress(&mut self, done: usize, total: usize) {
        tracing::trace!(done, total, "progress");
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
