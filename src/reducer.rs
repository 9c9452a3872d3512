//! Cross-process coordination hooks for distributed training.
//!
//! The scheduler itself is process-local; in a multi-process run every
//! process executes the same control flow and these hooks keep their
//! decisions identical. Losses are all-reduced before entering statistics,
//! and validation results are broadcast from the main process as plain
//! values which the scheduler then writes into its own state; worker
//! processes never hand out references for a peer to write through.

/// Reduction and broadcast operations the scheduler performs at process
/// boundaries. Single-process training uses [`LocalReducer`].
pub trait Reducer {
    /// True on the process that logs, runs validators, and writes
    /// snapshots.
    fn is_main(&self) -> bool;

    /// Sums a value across all processes; every process gets the total.
    fn all_reduce_sum(&self, value: f64) -> f64;

    /// Returns the main process's value on every process.
    fn broadcast_f64(&self, value: f64) -> f64;

    /// Returns the main process's value on every process.
    fn broadcast_u64(&self, value: u64) -> u64;

    /// Returns the main process's value on every process.
    fn broadcast_string(&self, value: String) -> String;
}

/// Identity reducer for single-process training: the local process is the
/// main process and every operation returns its input.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalReducer;

impl Reducer for LocalReducer {
    fn is_main(&self) -> bool {
        true
    }

    fn all_reduce_sum(&self, value: f64) -> f64 {
        value
    }

    fn broadcast_f64(&self, value: f64) -> f64 {
        value
    }

    fn broadcast_u64(&self, value: u64) -> u64 {
        value
    }

    fn broadcast_string(&self, value: String) -> String {
        value
    }
}
