//! The training control loop.
//!
//! [`Scheduler`] owns the [`TrainingState`] and answers, after every
//! optimizer update, the questions a training loop has to keep asking:
//! keep going? validate now? checkpoint now? at what learning rate? with
//! what batch size? It is driven from outside (the loop feeds it an
//! [`UpdateReport`] per update and calls [`Scheduler::increase_epoch`] at
//! each data-epoch boundary) and it drives everything downstream through
//! its observer list and its return values.
//!
//! Event ordering is fixed: on every lifecycle transition the scheduler
//! applies its own learning-rate handling first and then notifies external
//! observers, so an observer always sees the post-decay rate and the
//! optimizer-reset request for the event it is being told about.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::batch_growth;
use crate::config::{CostType, SchedulerConfig};
use crate::divergence::DivergenceMonitor;
use crate::error::{ScheduleError, ScheduleResult};
use crate::lr;
use crate::parameter::{SchedulingParameter, SchedulingUnit};
use crate::reducer::{LocalReducer, Reducer};
use crate::snapshot;
use crate::state::{ObserverList, TrainingObserver, TrainingState, ValidatorRecord};
use crate::validator::{aggregate_stalled, Validator};

/// What one optimizer update produced, as reported by the training loop.
///
/// `loss` and `loss_count` are this process's local sums; in a distributed
/// run the scheduler all-reduces them before they enter any statistic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateReport {
    /// Summed loss over the batch.
    pub loss: f64,
    /// Number of cost units (labels or sentences) the loss sums over.
    pub loss_count: f64,
    /// Sentences in the batch.
    pub batch_size: u64,
    /// Target labels in the batch.
    pub batch_labels: u64,
    /// Global gradient norm of the update, when the optimizer computed one.
    pub gradient_norm: Option<f64>,
}

impl UpdateReport {
    /// Report without a gradient norm.
    #[must_use]
    pub fn new(loss: f64, loss_count: f64, batch_size: u64, batch_labels: u64) -> Self {
        Self {
            loss,
            loss_count,
            batch_size,
            batch_labels,
            gradient_norm: None,
        }
    }

    /// Attaches the gradient norm of the update.
    #[must_use]
    pub fn with_gradient_norm(mut self, norm: f64) -> Self {
        self.gradient_norm = Some(norm);
        self
    }
}

/// The control loop: learning-rate schedule, divergence detection,
/// validation and checkpoint cadence, and the stopping decision.
pub struct Scheduler {
    config: SchedulerConfig,
    state: TrainingState,
    observers: ObserverList,
    validators: Vec<Box<dyn Validator>>,
    reducer: Box<dyn Reducer>,
    monitor: DivergenceMonitor,
    shutdown: Arc<AtomicBool>,
    timer: Instant,
    first_update: bool,
    end_of_data: bool,
    logical_epoch_width: usize,
}

impl Scheduler {
    /// Creates a scheduler with a fresh state and no distributed backend.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidOption`] when the configuration does
    /// not validate.
    pub fn new(config: SchedulerConfig) -> ScheduleResult<Self> {
        let state = TrainingState::new(config.learn_rate);
        Self::with_state(config, state)
    }

    /// Creates a scheduler around an existing state value.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidOption`] when the configuration does
    /// not validate, [`ScheduleError::StaleState`] when the state carries a
    /// decay factor other than 1 (restoring progress goes through
    /// [`Scheduler::load`], not through construction), and
    /// [`ScheduleError::WarmupUnitMismatch`] when the state's warmup anchor
    /// counts a different unit than the configured warmup.
    pub fn with_state(config: SchedulerConfig, mut state: TrainingState) -> ScheduleResult<Self> {
        config.validate()?;

        if state.factor != 1.0 {
            return Err(ScheduleError::StaleState {
                factor: state.factor,
            });
        }
        lr::check_warmup_unit(&config, &state)?;

        if config.divergence.enabled {
            tracing::info!(
                window_slow = config.divergence.window_slow,
                window_fast = config.divergence.window_fast,
                tolerance = config.divergence.tolerance,
                "divergence detection enabled"
            );
            if config.divergence.check_at.is_set() {
                tracing::warn!(
                    mark = %config.divergence.check_at,
                    "a diagnostic divergence will be raised when training reaches this mark"
                );
            }
        }
        if batch_growth::is_dynamic(&config) {
            tracing::info!(
                warmup = %config.mini_batch_warmup,
                track_lr = config.mini_batch_track_lr,
                "dynamic mini-batch sizing enabled"
            );
        }

        let logical_epoch_width = match config.logical_epoch_width {
            Some(width) => width as usize,
            None if config.logical_epoch == SchedulingParameter::epochs(1) => 0,
            None => 3,
        };

        lr::update_learning_rate(&config, &mut state);

        let monitor = DivergenceMonitor::new(&config);
        Ok(Self {
            config,
            state,
            observers: ObserverList::new(),
            validators: Vec::new(),
            reducer: Box::new(LocalReducer),
            monitor,
            shutdown: Arc::new(AtomicBool::new(false)),
            timer: Instant::now(),
            first_update: true,
            end_of_data: false,
            logical_epoch_width,
        })
    }

    /// Replaces the distributed backend. Call before training starts.
    #[must_use]
    pub fn with_reducer(mut self, reducer: Box<dyn Reducer>) -> Self {
        self.reducer = reducer;
        self
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The current training state.
    #[must_use]
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Optimizer updates applied so far.
    #[must_use]
    pub fn batches(&self) -> u64 {
        self.state.batches
    }

    /// Handle for requesting a graceful shutdown, e.g. from a signal
    /// handler. Once set, [`Scheduler::keep_going`] returns false and
    /// pending validation is skipped.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Requests a graceful shutdown from this thread.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Registers a lifecycle observer. Observers are notified in
    /// registration order.
    pub fn register_observer(&mut self, observer: Box<dyn TrainingObserver>) {
        self.observers.register(observer);
    }

    /// Registers a validator.
    ///
    /// On a fresh state this seeds the persisted record with the
    /// validator's initial score; on a loaded state the restored record
    /// wins. The first validator registered becomes the main metric.
    pub fn add_validator(&mut self, validator: Box<dyn Validator>) {
        if !self.state.loaded {
            self.state.validators.insert(
                validator.metric_name().to_string(),
                ValidatorRecord {
                    last_best: validator.init_score(),
                    stalled: 0,
                },
            );
        }
        if self.validators.is_empty() {
            self.state.main_validator = validator.metric_name().to_string();
        }
        self.validators.push(validator);
    }

    /// True while no stop condition has fired.
    ///
    /// Conditions are checked in a fixed order: shutdown request, epoch
    /// limit, update limit, the heterogeneous `after` list, early
    /// stopping, end of streamed data.
    #[must_use]
    pub fn keep_going(&self) -> bool {
        if self.shutdown_requested() {
            return false;
        }

        if self.config.after_epochs > 0 && self.logical_epoch() > self.config.after_epochs as f64 {
            return false;
        }
        if self.config.after_batches > 0 && self.state.batches >= self.config.after_batches {
            return false;
        }

        for criterion in &self.config.after {
            if criterion.n == 0 {
                continue;
            }
            let reached = match criterion.unit {
                SchedulingUnit::Epochs => self.logical_epoch() > criterion.n as f64,
                SchedulingUnit::Updates => self.state.batches >= criterion.n,
                SchedulingUnit::Labels => self.state.labels_total >= criterion.n,
            };
            if reached {
                return false;
            }
        }

        if self.config.early_stopping > 0 && self.stalled() >= self.config.early_stopping {
            return false;
        }

        if self.end_of_data {
            return false;
        }

        true
    }

    /// Feeds the result of one optimizer update through the control loop.
    ///
    /// Advances every counter, recomputes the learning rate, notifies
    /// observers, updates divergence and gradient-norm statistics, and
    /// emits the periodic progress line.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::Divergence`] when the loss left its
    /// trailing distribution. The scheduler remains usable; a caller with
    /// a fallback (reload a checkpoint, drop to a safer precision) can act
    /// on it and continue.
    pub fn update(&mut self, report: UpdateReport) -> ScheduleResult<()> {
        self.state.remember_previous_progress();
        self.state.validated = false;

        let loss = self.reducer.all_reduce_sum(report.loss);
        let loss_count = self.reducer.all_reduce_sum(report.loss_count);
        let normalized_loss = loss / loss_count;

        self.state.cost_sum += loss;
        self.state.cost_count += loss_count;

        self.state.updates_disp += 1;
        self.state.samples_disp += report.batch_size;
        self.state.words_disp += report.batch_labels;

        self.state.samples_epoch += report.batch_size;
        self.state.labels_total += report.batch_labels;

        self.state.new_update();
        lr::after_update(&self.config, &mut self.state, self.first_update);
        self.first_update = false;
        self.observers.notify_batches(&self.state);

        self.monitor.observe_loss(&mut self.state, normalized_loss)?;
        if let Some(norm) = report.gradient_norm {
            self.monitor.observe_gradient_norm(&mut self.state, norm);
        }

        if self.state.entered_new_period_of(self.config.disp_freq)
            || self.state.batches <= self.config.disp_first
        {
            if self.reducer.is_main() {
                let elapsed = self.timer.elapsed().as_secs_f64();
                let words_per_second = self.state.words_disp as f64 / elapsed;
                if self.config.lr_report {
                    tracing::info!(
                        "Ep. {} : Up. {} : Sen. {} : {} : Time {:.2}s : {:.2} words/s : gNorm {:.4} : L.r. {:.4e}",
                        self.format_logical_epoch(),
                        self.state.batches,
                        with_commas(self.state.samples_epoch),
                        self.format_loss(report.batch_labels),
                        elapsed,
                        words_per_second,
                        self.state.gradient_norm_avg,
                        self.state.eta,
                    );
                } else {
                    tracing::info!(
                        "Ep. {} : Up. {} : Sen. {} : {} : Time {:.2}s : {:.2} words/s : gNorm {:.4}",
                        self.format_logical_epoch(),
                        self.state.batches,
                        with_commas(self.state.samples_epoch),
                        self.format_loss(report.batch_labels),
                        elapsed,
                        words_per_second,
                        self.state.gradient_norm_avg,
                    );
                }
            }
            // every process resets its window, not just the one that logs
            self.timer = Instant::now();
            self.state.cost_sum = 0.0;
            self.state.cost_count = 0.0;
            self.state.updates_disp = 0;
            self.state.samples_disp = 0;
            self.state.words_disp = 0;
        }

        Ok(())
    }

    /// Marks the end of a data epoch: logs the epoch summary, advances the
    /// epoch counter, applies epoch-triggered decay, and notifies
    /// observers. With streamed input the first epoch end also ends the
    /// run.
    pub fn increase_epoch(&mut self) {
        tracing::info!("Seen {} samples", with_commas(self.state.samples_epoch));

        self.state.new_epoch();
        if self.config.stream_input {
            self.end_of_data = true;
        }
        lr::after_epoch(&self.config, &mut self.state);
        self.observers.notify_epoch(&self.state);
        self.state.samples_epoch = 0;

        if self.config.logical_epoch == SchedulingParameter::epochs(1) {
            tracing::info!("Starting epoch {}", self.state.epochs);
        } else {
            tracing::info!(
                "Starting data epoch {} in logical epoch {}",
                self.state.epochs,
                self.format_logical_epoch(),
            );
        }
    }

    /// Logs the start of training.
    pub fn started(&self) {
        tracing::info!("Training started");
    }

    /// Logs the end of training, distinguishing a signal-requested stop.
    pub fn finished(&self) {
        if self.shutdown_requested() {
            tracing::info!("Training interrupted (via signal)");
        } else {
            tracing::info!("Training finished");
        }
    }

    /// True when a scheduled validation is due right now: at least one
    /// validator is registered, the validation period was just entered,
    /// progress is past the valid-from floor, and no stop condition has
    /// fired.
    #[must_use]
    pub fn should_validate(&self) -> bool {
        !self.validators.is_empty()
            && self.state.entered_new_period_of(self.config.valid_freq)
            && self.state.exceeded(self.config.valid_from)
            && self.keep_going()
    }

    /// True when a scheduled checkpoint is due right now.
    #[must_use]
    pub fn should_save(&self) -> bool {
        self.state.entered_new_period_of(self.config.save_freq)
            && self.state.exceeded(self.config.save_from)
    }

    /// True when multi-process parameters should be re-synchronized.
    #[must_use]
    pub fn should_sync(&self) -> bool {
        self.state.entered_new_period_of(self.config.sync_freq)
    }

    /// True when weights should be replaced by their smoothed average.
    #[must_use]
    pub fn should_replace_with_smoothed(&self) -> bool {
        self.config.exponential_smoothing != 0.0
            && self
                .state
                .entered_new_period_of(self.config.exponential_smoothing_replace_freq)
    }

    /// Runs every registered validator and folds the results into the
    /// state.
    ///
    /// Skipped when a shutdown was requested, when this progress point was
    /// already validated (after a restore, for instance), or when the
    /// cadence does not call for it; `is_final` overrides the cadence to
    /// force a last validation at the end of the run. Validators execute on the main
    /// process only; results are broadcast by value so every process ends
    /// up with the same records. A stall-count increase fires the stall
    /// event.
    pub fn validate(&mut self, is_final: bool) {
        if self.shutdown_requested()
            || self.state.validated
            || (!self.state.entered_new_period_of(self.config.valid_freq) && !is_final)
        {
            return;
        }

        let stalled_prev = self.stalled();
        let epoch_label = self.format_logical_epoch();

        for validator in &mut self.validators {
            let mut score = 0.0;
            let mut stalled = 0;
            let mut last_best = 0.0;
            if self.reducer.is_main() {
                score = validator.validate(&self.state);
                stalled = validator.stalled();
                last_best = validator.last_best();
                if stalled > 0 {
                    tracing::info!(
                        "Ep. {} : Up. {} : {} : {} : stalled {} times (last best: {})",
                        epoch_label,
                        self.state.batches,
                        validator.metric_name(),
                        score,
                        stalled,
                        last_best,
                    );
                } else {
                    tracing::info!(
                        "Ep. {} : Up. {} : {} : {} : new best",
                        epoch_label,
                        self.state.batches,
                        validator.metric_name(),
                        score,
                    );
                }
            }

            let _score = self.reducer.broadcast_f64(score);
            let stalled = self.reducer.broadcast_u64(stalled);
            let last_best = self.reducer.broadcast_f64(last_best);
            self.state.validators.insert(
                validator.metric_name().to_string(),
                ValidatorRecord { last_best, stalled },
            );
        }

        let stalled_now = self.stalled();
        if stalled_now > stalled_prev {
            self.state.new_stalled(stalled_now);
            lr::after_stall(&self.config, &mut self.state);
            self.observers.notify_stalled(&self.state);
        }

        self.state.validated = true;
    }

    /// The aggregated stall count under the configured policy.
    #[must_use]
    pub fn stalled(&self) -> u64 {
        aggregate_stalled(&self.validators, &self.state, self.config.early_stopping_on)
    }

    /// True when any dynamic batch-sizing policy is active.
    #[must_use]
    pub fn is_dynamic_batch_sizing(&self) -> bool {
        batch_growth::is_dynamic(&self.config)
    }

    /// Multiplier for the reference batch size at the current progress.
    #[must_use]
    pub fn dynamic_batch_multiplier(&self) -> f64 {
        batch_growth::multiplier(&self.config, &self.state)
    }

    /// Training progress in logical epochs.
    #[must_use]
    pub fn logical_epoch(&self) -> f64 {
        let logical = self.config.logical_epoch;
        self.state.progress_in(logical.unit) as f64 / logical.n as f64
    }

    fn format_logical_epoch(&self) -> String {
        format!("{:.*}", self.logical_epoch_width, self.logical_epoch())
    }

    /// Persists the state snapshot and the resolved configuration next to
    /// the checkpoint at `base`. Only the main process writes; the call is
    /// a no-op elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::SnapshotIo`] or
    /// [`ScheduleError::ConfigFile`] when a file cannot be written.
    pub fn save(&self, base: &Path) -> ScheduleResult<()> {
        if !self.reducer.is_main() {
            return Ok(());
        }
        snapshot::write_progress(base, &self.state)?;
        self.config.to_file(snapshot::config_path(base))?;
        Ok(())
    }

    /// Restores progress from the snapshot next to the checkpoint at
    /// `base`, if one exists; a missing snapshot is a fresh start.
    ///
    /// The main process reads the file and broadcasts the raw text, so
    /// every process installs identical state. Restart behavior then
    /// applies: `no_restore_corpus` clears the epoch and display windows,
    /// and `valid_reset_stalled` / `valid_reset_all` clear stall counts
    /// (and best scores). Registered validators get their restored records
    /// handed back.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::SnapshotIo`] when the file exists but
    /// cannot be read, [`ScheduleError::SnapshotFormat`] or
    /// [`ScheduleError::SnapshotVersionMismatch`] when it cannot be
    /// parsed, and [`ScheduleError::WarmupUnitMismatch`] when the snapshot
    /// was saved under a warmup measured in a different unit. A rejected
    /// snapshot leaves the current state untouched.
    pub fn load(&mut self, base: &Path) -> ScheduleResult<()> {
        let text = if self.reducer.is_main() {
            snapshot::read_progress(base)?.unwrap_or_default()
        } else {
            String::new()
        };
        let text = self.reducer.broadcast_string(text);

        if !text.is_empty() {
            let state = snapshot::parse_progress(&text, &snapshot::progress_path(base))?;
            lr::check_warmup_unit(&self.config, &state)?;
            self.state = state;
        }

        if self.config.no_restore_corpus {
            self.state.samples_epoch = 0;
            self.state.cost_sum = 0.0;
            self.state.cost_count = 0.0;
            self.state.updates_disp = 0;
            self.state.samples_disp = 0;
            self.state.words_disp = 0;
        }

        if self.config.valid_reset_stalled || self.config.valid_reset_all {
            self.state.stalled = 0;
            self.state.max_stalled = 0;
            for validator in &self.validators {
                if let Some(record) = self.state.validators.get_mut(validator.metric_name()) {
                    record.stalled = 0;
                    if self.config.valid_reset_all {
                        record.last_best = validator.init_score();
                    }
                }
            }
        }

        for validator in &mut self.validators {
            if let Some(record) = self.state.validators.get(validator.metric_name()) {
                validator.restore(*record);
            }
        }

        self.state.new_load();
        Ok(())
    }

    fn format_loss(&self, batch_labels: u64) -> String {
        let state = &self.state;
        match self.config.cost_type {
            CostType::CeMeanWords => format!("Cost {:.8}", state.cost_sum / state.cost_count),
            CostType::CeSum if self.config.disp_label_counts => {
                let mut out = format!(
                    "Cost {:.8} * {}",
                    state.cost_sum / state.cost_count,
                    with_commas(state.cost_count as u64),
                );
                if batch_labels > 0 {
                    out.push_str(&format!(" @ {}", with_commas(batch_labels)));
                }
                out.push_str(&format!(" after {}", with_commas(state.labels_total)));
                out
            }
            CostType::CeSum => {
                format!("Cost {:.8}", state.cost_sum / state.updates_disp as f64)
            }
            CostType::Perplexity => {
                format!("Cost {:.8}", (state.cost_sum / state.cost_count).exp())
            }
            CostType::CeMean => {
                format!("Cost {:.8}", state.cost_sum / state.samples_disp as f64)
            }
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("batches", &self.state.batches)
            .field("epochs", &self.state.epochs)
            .field("eta", &self.state.eta)
            .field("validators", &self.validators.len())
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

/// Groups digits in threes, so progress lines stay readable at billions of
/// labels.
fn with_commas(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
