//! Training progress record and lifecycle observers.
//!
//! [`TrainingState`] is the single mutable source of truth for a run: every
//! counter, learning-rate value, and statistic the scheduler maintains lives
//! here as plain data, so the whole record serializes into a snapshot and
//! restores bit-for-bit. The state is an owned value: the scheduler holds
//! it and passes borrows around; nothing keeps hidden references into it.
//!
//! Lifecycle transitions (`new_epoch`, `new_update`, `new_stalled`) are
//! plain state changes; the scheduler sequences them, applies its own
//! schedule handling, and then fans the event out to an [`ObserverList`] in
//! registration order. That order is deterministic and load-bearing:
//! listeners read values (effective learning rate, the optimizer-reset
//! request) the schedule handling for the same event has just written.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::parameter::{SchedulingParameter, SchedulingUnit};

/// Per-validator bookkeeping mirrored into the state after each validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidatorRecord {
    /// Best score this validator has reported.
    pub last_best: f64,
    /// Consecutive validations without improvement.
    pub stalled: u64,
}

/// Hooks invoked on training lifecycle events.
///
/// All hooks have empty default bodies; implement only the events you care
/// about. Hooks receive the state read-only; the scheduler is the only
/// mutator.
pub trait TrainingObserver {
    /// Called after the epoch counter has advanced.
    fn on_epoch(&mut self, state: &TrainingState) {
        let _ = state;
    }

    /// Called after each optimizer update, once the learning rate for the
    /// new progress has been computed.
    fn on_batches(&mut self, state: &TrainingState) {
        let _ = state;
    }

    /// Called when the aggregated stall count increased.
    fn on_stalled(&mut self, state: &TrainingState) {
        let _ = state;
    }
}

/// Registered observers, notified in registration order.
#[derive(Default)]
pub struct ObserverList {
    observers: Vec<Box<dyn TrainingObserver>>,
}

impl ObserverList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an observer. Notification order is registration order.
    pub fn register(&mut self, observer: Box<dyn TrainingObserver>) {
        self.observers.push(observer);
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// True if no observers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Dispatches an epoch event to every observer, in registration order.
    pub(crate) fn notify_epoch(&mut self, state: &TrainingState) {
        for observer in &mut self.observers {
            observer.on_epoch(state);
        }
    }

    /// Dispatches an update event to every observer, in registration order.
    pub(crate) fn notify_batches(&mut self, state: &TrainingState) {
        for observer in &mut self.observers {
            observer.on_batches(state);
        }
    }

    /// Dispatches a stall event to every observer, in registration order.
    pub(crate) fn notify_stalled(&mut self, state: &TrainingState) {
        for observer in &mut self.observers {
            observer.on_stalled(state);
        }
    }
}

impl std::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("len", &self.observers.len())
            .finish()
    }
}

/// Mutable record of training progress and statistics.
///
/// Counters are monotone within a run except the display-window accumulators
/// (`*_disp`, `cost_*`), which reset at each progress line. The epoch counter
/// starts at 1: training begins inside the first epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Current data epoch, starting at 1.
    pub epochs: u64,
    /// Optimizer updates applied so far.
    pub batches: u64,
    /// Sentences seen in the current epoch.
    pub samples_epoch: u64,
    /// Target labels processed across all epochs.
    pub labels_total: u64,

    /// Sentences seen since the last progress line.
    pub samples_disp: u64,
    /// Updates applied since the last progress line.
    pub updates_disp: u64,
    /// Target words processed since the last progress line (for words/sec).
    pub words_disp: u64,

    /// Accumulated cost since the last progress line.
    pub cost_sum: f64,
    /// Accumulated cost weight (labels or sentences, by cost type).
    pub cost_count: f64,

    /// Label count at the previous update, for period-crossing detection.
    pub prev_labels_total: u64,
    /// Update count at the previous update.
    pub prev_batches: u64,
    /// Epoch count at the previous update.
    pub prev_epochs: u64,

    /// Effective learning rate, recomputed after every progress change.
    pub eta: f64,
    /// Cumulative decay multiplier; exactly 1 on a fresh state.
    pub factor: f64,
    /// Progress mark at which the current warmup ramp began.
    pub warmup_start: SchedulingParameter,
    /// Request to reset optimizer statistics, set by decay events and
    /// consumed by the optimizer observer.
    pub reset_optimizer: bool,

    /// Aggregated stalled-validation count.
    pub stalled: u64,
    /// Highest stall count seen in this run.
    pub max_stalled: u64,
    /// Metric name of the first registered validator.
    pub main_validator: String,
    /// Last-best score and stall count per validator metric.
    pub validators: BTreeMap<String, ValidatorRecord>,

    /// Slow-moving exponential average of the normalized loss.
    pub loss_avg_slow: f64,
    /// Fast-moving exponential average of the normalized loss.
    pub loss_avg_fast: f64,
    /// Exponential moving variance around the slow average.
    pub loss_var_slow: f64,

    /// Exponential moving average of gradient norms.
    pub gradient_norm_avg: f64,
    /// Exponential moving variance of gradient norms.
    pub gradient_norm_var: f64,
    /// Exponential moving average of log gradient norms.
    pub log_gradient_norm_avg: f64,
    /// Exponential moving variance of log gradient norms.
    pub log_gradient_norm_var: f64,

    /// True from a snapshot restore until the next update.
    pub loaded: bool,
    /// True once validation ran at the current progress.
    pub validated: bool,

    /// Batch-generator seed, preserved for restart reproducibility.
    pub seed_batch: String,
    /// Corpus-shuffle seed, preserved for restart reproducibility.
    pub seed_corpus: String,
}

impl TrainingState {
    /// Creates a fresh state with the given initial learning rate.
    #[must_use]
    pub fn new(learn_rate: f64) -> Self {
        Self {
            epochs: 1,
            batches: 0,
            samples_epoch: 0,
            labels_total: 0,
            samples_disp: 0,
            updates_disp: 0,
            words_disp: 0,
            cost_sum: 0.0,
            cost_count: 0.0,
            prev_labels_total: 0,
            prev_batches: 0,
            prev_epochs: 0,
            eta: learn_rate,
            factor: 1.0,
            warmup_start: SchedulingParameter::default(),
            reset_optimizer: false,
            stalled: 0,
            max_stalled: 0,
            main_validator: String::new(),
            validators: BTreeMap::new(),
            loss_avg_slow: 0.0,
            loss_avg_fast: 0.0,
            loss_var_slow: 0.0,
            gradient_norm_avg: 0.0,
            gradient_norm_var: 0.0,
            log_gradient_norm_avg: 0.0,
            log_gradient_norm_var: 0.0,
            loaded: false,
            validated: false,
            seed_batch: String::new(),
            seed_corpus: String::new(),
        }
    }

    /// Progress in the requested unit.
    #[must_use]
    pub fn progress_in(&self, unit: SchedulingUnit) -> u64 {
        match unit {
            SchedulingUnit::Labels => self.labels_total,
            SchedulingUnit::Updates => self.batches,
            SchedulingUnit::Epochs => self.epochs,
        }
    }

    /// Progress in the requested unit as of the previous update.
    #[must_use]
    pub fn previous_progress_in(&self, unit: SchedulingUnit) -> u64 {
        match unit {
            SchedulingUnit::Labels => self.prev_labels_total,
            SchedulingUnit::Updates => self.prev_batches,
            SchedulingUnit::Epochs => self.prev_epochs,
        }
    }

    /// Snapshots the progress counters. Called once at the top of each
    /// update, before any counter advances.
    pub fn remember_previous_progress(&mut self) {
        self.prev_labels_total = self.labels_total;
        self.prev_batches = self.batches;
        self.prev_epochs = self.epochs;
    }

    /// True exactly when progress crossed a multiple of `period` since the
    /// previous update.
    ///
    /// Detects the crossing itself rather than divisibility, so irregular
    /// increments (labels accrue per-batch in uneven amounts) can neither
    /// skip nor double-fire a cadence. An unset period never fires.
    #[must_use]
    pub fn entered_new_period_of(&self, period: SchedulingParameter) -> bool {
        if !period.is_set() {
            return false;
        }
        let progress = self.progress_in(period.unit);
        let previous = self.previous_progress_in(period.unit);
        progress / period.n != previous / period.n
    }

    /// True once progress has gone strictly past the given mark. An unset
    /// mark gates nothing.
    #[must_use]
    pub fn exceeded(&self, mark: SchedulingParameter) -> bool {
        if !mark.is_set() {
            return true;
        }
        self.progress_in(mark.unit) > mark.n
    }

    /// Recomputes the effective learning rate from a scheduled base rate and
    /// the cumulative decay factor.
    pub fn update_eta(&mut self, base_lr: f64) {
        self.eta = base_lr * self.factor;
    }

    /// Advances to the next epoch. The epoch-sample counter is reset by the
    /// scheduler only after observers have seen the epoch's totals.
    pub fn new_epoch(&mut self) {
        self.epochs += 1;
    }

    /// Records a completed optimizer update and clears the per-update
    /// transient flags.
    pub fn new_update(&mut self) {
        self.batches += 1;
        self.loaded = false;
        self.validated = false;
    }

    /// Records an increased stall count, tracking the high-water mark.
    pub fn new_stalled(&mut self, stalled: u64) {
        self.stalled = stalled;
        if stalled > self.max_stalled {
            self.max_stalled = stalled;
        }
    }

    /// Marks the state as freshly restored. The validated flag is set too:
    /// the snapshot was taken at a point that had already been validated,
    /// so an immediate re-validation would be redundant.
    pub fn new_load(&mut self) {
        self.loaded = true;
        self.validated = true;
    }
}
