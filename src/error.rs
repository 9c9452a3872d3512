//! Error types for the training scheduler.
//!
//! Errors are designed to be actionable: configuration problems are reported
//! eagerly at construction time with the offending option named, and runtime
//! anomalies carry enough context for the embedding trainer to decide what to
//! do next.
//!
//! # Why Divergence Is an Error Value
//!
//! Loss divergence is not a crash; it is a signal. [`ScheduleError::Divergence`]
//! carries the detector's evidence (slow average, fast average, distance in
//! sigmas) so the caller can destructure it and choose a response, whether
//! that is reloading the last checkpoint, lowering the learning rate, or
//! aborting, without string-matching a panic message.
//!
//! # Error Categories
//!
//! - **Parse errors**: malformed scheduling parameters or stop conditions
//! - **Configuration errors**: invalid or mutually inconsistent options
//! - **Divergence**: the loss left its trailing distribution
//! - **Snapshot errors**: progress file I/O, format, or version problems

use thiserror::Error;

use crate::parameter::SchedulingUnit;

/// The main error type for scheduler operations.
///
/// Each variant includes the context needed to diagnose the problem without
/// re-running the step that produced it.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// A scheduling parameter string could not be parsed.
    ///
    /// Parameters are a number with an optional unit suffix (`t`, `u`, `e`);
    /// this error reports the full text plus the reason the numeric part was
    /// rejected.
    #[error("invalid scheduling parameter '{text}': {reason}")]
    ParseParameter {
        /// The text that failed to parse.
        text: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A stop condition in the `after` list could not be parsed.
    #[error("invalid stop condition '{text}': {reason}")]
    ParseStopCondition {
        /// The condition text.
        text: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A configuration option has an invalid value.
    #[error("invalid option '{name}': {reason}")]
    InvalidOption {
        /// The option that failed validation.
        name: &'static str,
        /// Why its value was rejected.
        reason: String,
    },

    /// A configuration file could not be read, written, or parsed.
    #[error("config file error at '{path}': {reason}")]
    ConfigFile {
        /// The file involved.
        path: String,
        /// What went wrong.
        reason: String,
    },

    /// Training loss diverged from its trailing distribution.
    ///
    /// The fast exponential moving average of the loss moved more than the
    /// configured number of standard deviations above the slow average. The
    /// averages and the distance are included so the caller can log them or
    /// decide on a recovery threshold.
    #[error(
        "loss diverged: slow average {average_slow:.4}, fast average {average_fast:.4}, {sigmas:.1} sigmas apart"
    )]
    Divergence {
        /// Slow-window exponential moving average of the loss.
        average_slow: f64,
        /// Fast-window exponential moving average of the loss.
        average_fast: f64,
        /// Distance between the averages in slow-window standard deviations.
        sigmas: f64,
    },

    /// A restored training state is inconsistent with starting a new run.
    ///
    /// The cumulative learning-rate factor persists across restarts; seeing a
    /// value other than 1 on a fresh scheduler means the state file belongs to
    /// a different run.
    #[error("stale training state: cumulative learning-rate factor is {factor}, expected 1")]
    StaleState {
        /// The factor found in the state.
        factor: f64,
    },

    /// A restored warmup anchor counts a different unit than the configured
    /// warmup window.
    ///
    /// The anchor records where the current warmup began, in the window's
    /// unit. Progress in one unit cannot be compared with a mark in another,
    /// so a state saved under an updates-measured warmup cannot resume under
    /// a labels-measured one.
    #[error("warmup anchor counts {found} but lr-warmup is measured in {expected}")]
    WarmupUnitMismatch {
        /// Unit of the anchor recorded in the state.
        found: SchedulingUnit,
        /// Unit of the configured warmup window.
        expected: SchedulingUnit,
    },

    /// Progress snapshot I/O failed.
    #[error("snapshot I/O error at '{path}': {source}")]
    SnapshotIo {
        /// The file involved.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Progress snapshot contained malformed data.
    #[error("snapshot format error at '{path}': {reason}")]
    SnapshotFormat {
        /// The file involved.
        path: String,
        /// Why deserialization failed.
        reason: String,
    },

    /// Progress snapshot was written by an incompatible version.
    #[error("snapshot version mismatch: found {found}, expected {expected}")]
    SnapshotVersionMismatch {
        /// Version found in the file.
        found: u32,
        /// Version this build writes.
        expected: u32,
    },
}

/// Result type alias for scheduler operations.
pub type ScheduleResult<T> = Result<T, ScheduleError>;

impl ScheduleError {
    /// Returns true if this error is a divergence signal rather than a
    /// configuration or I/O failure.
    #[must_use]
    pub fn is_divergence(&self) -> bool {
        matches!(self, ScheduleError::Divergence { .. })
    }
}
