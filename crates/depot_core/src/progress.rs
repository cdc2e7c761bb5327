//! Progress reporting and cooperative cancellation.

/// Progress sink for long-running operations.
///
/// The GC engine begins one task per phase, reports one update per source
/// index entry during the garbage phase, and polls `is_cancelled` between
/// objects there and between phases elsewhere. Cancellation surfaces as
/// `DepotError::Cancelled` and takes the rollback path.
pub trait ProgressMonitor {
    /// Starts a new task with an expected number of work units.
    /// `total == 0` means the amount of work is unknown.
    fn begin_task(&mut self, title: &str, total: u64);

    /// Reports `delta` completed work units.
    fn update(&mut self, delta: u64);

    /// Finishes the current task.
    fn end_task(&mut self);

    /// Returns true when the caller asked to stop.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Progress monitor that discards all updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressMonitor for NullProgress {
    fn begin_task(&mut self, _title: &str, _total: u64) {}

    fn update(&mut self, _delta: u64) {}

    fn end_task(&mut self) {}
}
