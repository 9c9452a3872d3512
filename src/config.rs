//! Scheduler configuration and serialization.
//!
//! All options are carried in a single strongly-typed [`SchedulerConfig`]
//! that is validated eagerly by [`SchedulerConfig::validate`]: unit
//! mismatches, bad arities, and out-of-range values are rejected before the
//! first update rather than surfacing days into a run. Configurations
//! round-trip through TOML for persistence alongside progress snapshots.
//!
//! # Example
//!
//! ```rust
//! use training_scheduler_rs::config::SchedulerConfig;
//!
//! let config = SchedulerConfig::builder()
//!     .learn_rate(3e-4)
//!     .lr_warmup("16000u".parse().unwrap())
//!     .after_batches(300_000)
//!     .build();
//! assert!(config.validate().is_ok());
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ScheduleError, ScheduleResult};
use crate::parameter::{SchedulingParameter, SchedulingUnit};

/// Strategy selecting when cumulative learning-rate decay fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecayStrategy {
    /// Decay once per epoch after a start epoch is reached.
    #[serde(rename = "epoch")]
    Epoch,
    /// Like `epoch`, additionally firing once a batch threshold is reached.
    #[serde(rename = "epoch+batches")]
    EpochBatches,
    /// Like `epoch`, additionally firing once the stall high-water mark
    /// reaches a threshold.
    #[serde(rename = "epoch+stalled")]
    EpochStalled,
    /// Decay every `lr_decay_freq` batches once a start batch is reached.
    #[serde(rename = "batches")]
    Batches,
    /// Decay on every multiple of a stall-count threshold.
    #[serde(rename = "stalled")]
    Stalled,
}

/// How per-validator stall counts are reduced to the single count that
/// drives early stopping and stall-triggered decay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StallAggregation {
    /// The first registered validator's count.
    First,
    /// The largest count across validators (any validator stalling counts).
    Any,
    /// The smallest count across validators (all must stall to count).
    All,
}

/// How the accumulated cost is normalized for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostType {
    /// Cost per sample: sum divided by sentences in the display window.
    #[serde(rename = "ce-mean", alias = "cross-entropy")]
    CeMean,
    /// Cost per target label: sum divided by the label count.
    #[serde(rename = "ce-mean-words")]
    CeMeanWords,
    /// Summed cost, displayed per update (or per label with label counts).
    #[serde(rename = "ce-sum")]
    CeSum,
    /// Exponentiated per-label cost.
    #[serde(rename = "perplexity")]
    Perplexity,
}

/// Divergence-detection settings.
///
/// Disabled by default. When enabled, the scheduler tracks a slow and a fast
/// exponential moving average of the normalized loss and reports a
/// divergence once the fast average exceeds the slow one by more than
/// `tolerance` standard deviations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceConfig {
    /// Whether detection is active.
    #[serde(default)]
    pub enabled: bool,
    /// Window of the slow-moving loss average, in updates.
    #[serde(default = "default_divergence_window_slow")]
    pub window_slow: u64,
    /// Window of the fast-moving loss average, in updates.
    #[serde(default = "default_divergence_window_fast")]
    pub window_fast: u64,
    /// Detection threshold in standard deviations above the slow average.
    #[serde(default = "default_divergence_tolerance")]
    pub tolerance: f64,
    /// Diagnostic trigger: raise a divergence unconditionally once this much
    /// progress is reached, to exercise the caller's handling path. Unset by
    /// default.
    #[serde(default)]
    pub check_at: SchedulingParameter,
}

fn default_divergence_window_slow() -> u64 {
    1000
}
fn default_divergence_window_fast() -> u64 {
    10
}
fn default_divergence_tolerance() -> f64 {
    5.0
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window_slow: default_divergence_window_slow(),
            window_fast: default_divergence_window_fast(),
            tolerance: default_divergence_tolerance(),
            check_at: SchedulingParameter::default(),
        }
    }
}

impl DivergenceConfig {
    /// Detection with the default windows and tolerance.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }
}

/// Complete scheduler configuration.
///
/// Construct via [`SchedulerConfig::builder`], [`Default`], or
/// [`SchedulerConfig::from_file`], then call [`validate`](Self::validate)
/// before handing it to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Base learning rate reached after warmup.
    #[serde(default = "default_learn_rate")]
    pub learn_rate: f64,

    /// Length of the learning-rate warmup ramp. Unset disables warmup.
    #[serde(default)]
    pub lr_warmup: SchedulingParameter,

    /// Learning rate at the start of the warmup ramp.
    #[serde(default)]
    pub lr_warmup_start_rate: f64,

    /// Restart the warmup ramp each time a full warmup period has passed.
    #[serde(default)]
    pub lr_warmup_cycle: bool,

    /// Restart the warmup ramp on the first update after a snapshot reload.
    #[serde(default)]
    pub lr_warmup_at_reload: bool,

    /// Inverse-square-root decay: one parameter giving the characteristic
    /// scale, optionally followed by a second giving the start threshold
    /// (same unit). Empty disables the schedule.
    #[serde(default)]
    pub lr_decay_inv_sqrt: Vec<SchedulingParameter>,

    /// Include the effective learning rate in progress log lines.
    #[serde(default)]
    pub lr_report: bool,

    /// Multiplier applied to the cumulative factor at each decay event.
    /// Zero disables event-driven decay.
    #[serde(default)]
    pub lr_decay: f64,

    /// Which events trigger cumulative decay.
    #[serde(default = "default_lr_decay_strategy")]
    pub lr_decay_strategy: DecayStrategy,

    /// Strategy thresholds. First element is the start epoch (or start batch
    /// / stall threshold for the `batches` / `stalled` strategies); combined
    /// strategies read their secondary threshold from the second element.
    #[serde(default = "default_lr_decay_start")]
    pub lr_decay_start: Vec<u64>,

    /// Batch interval for the `batches` strategy. Always counted in updates.
    #[serde(default = "default_lr_decay_freq")]
    pub lr_decay_freq: u64,

    /// Request an optimizer-statistics reset at each decay event.
    #[serde(default)]
    pub lr_decay_reset_optimizer: bool,

    /// Restart the warmup ramp at each decay event.
    #[serde(default)]
    pub lr_decay_repeat_warmup: bool,

    /// Progress-line cadence. Unset disables progress logging.
    #[serde(default = "default_disp_freq")]
    pub disp_freq: SchedulingParameter,

    /// Additionally log each of the first N updates.
    #[serde(default)]
    pub disp_first: u64,

    /// Display the cost as "per-label cost * label count" instead of a
    /// plain average (only meaningful with [`CostType::CeSum`]).
    #[serde(default)]
    pub disp_label_counts: bool,

    /// How the accumulated cost is normalized for display.
    #[serde(default = "default_cost_type")]
    pub cost_type: CostType,

    /// Definition of a logical epoch for display and epoch-based stopping.
    /// Defaults to one data epoch.
    #[serde(default = "default_logical_epoch")]
    pub logical_epoch: SchedulingParameter,

    /// Decimal places when displaying logical epochs. Unset derives 0 for
    /// plain data epochs and 3 otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_epoch_width: Option<u64>,

    /// Validation cadence. Unset disables scheduled validation.
    #[serde(default = "default_valid_freq")]
    pub valid_freq: SchedulingParameter,

    /// Suppress validation until progress is past this mark.
    #[serde(default)]
    pub valid_from: SchedulingParameter,

    /// Checkpoint cadence. Unset disables scheduled saving.
    #[serde(default = "default_save_freq")]
    pub save_freq: SchedulingParameter,

    /// Suppress checkpointing until progress is past this mark.
    #[serde(default)]
    pub save_from: SchedulingParameter,

    /// Parameter-synchronization cadence for multi-process training.
    #[serde(default)]
    pub sync_freq: SchedulingParameter,

    /// Exponential-smoothing decay for averaged weights; zero disables the
    /// smoothed-replacement cadence query entirely.
    #[serde(default)]
    pub exponential_smoothing: f64,

    /// How often weights should be replaced by their smoothed average.
    #[serde(default)]
    pub exponential_smoothing_replace_freq: SchedulingParameter,

    /// Heterogeneous stop conditions; the first one reached stops training.
    /// Epoch conditions compare logical epochs strictly, update and label
    /// conditions compare inclusively.
    #[serde(default)]
    pub after: Vec<SchedulingParameter>,

    /// Stop once this many logical epochs are exceeded. Zero disables.
    #[serde(default)]
    pub after_epochs: u64,

    /// Stop once this many updates are reached. Zero disables.
    #[serde(default)]
    pub after_batches: u64,

    /// Stop after this many stalled validations. Zero disables.
    #[serde(default = "default_early_stopping")]
    pub early_stopping: u64,

    /// How per-validator stall counts aggregate for early stopping.
    #[serde(default = "default_early_stopping_on")]
    pub early_stopping_on: StallAggregation,

    /// Divergence-detection settings.
    #[serde(default)]
    pub divergence: DivergenceConfig,

    /// Window for the exponential average of gradient norms, in updates.
    #[serde(default = "default_gradient_norm_average_window")]
    pub gradient_norm_average_window: u64,

    /// Batch-size warmup ramp. Unset disables dynamic batch sizing.
    #[serde(default)]
    pub mini_batch_warmup: SchedulingParameter,

    /// Grow the batch size inversely with the scheduled learning-rate decay.
    /// Experimental; off by default.
    #[serde(default)]
    pub mini_batch_track_lr: bool,

    /// After a reload, restart the data pass instead of resuming mid-epoch.
    #[serde(default)]
    pub no_restore_corpus: bool,

    /// After a reload, clear stalled counters (same validation set).
    #[serde(default)]
    pub valid_reset_stalled: bool,

    /// After a reload, clear stalled counters and best scores (validation
    /// set changed).
    #[serde(default)]
    pub valid_reset_all: bool,

    /// Training data arrives on a non-rewindable stream, so the first epoch
    /// end also ends the run.
    #[serde(default)]
    pub stream_input: bool,
}

fn default_learn_rate() -> f64 {
    1e-4
}
fn default_lr_decay_strategy() -> DecayStrategy {
    DecayStrategy::EpochStalled
}
fn default_lr_decay_start() -> Vec<u64> {
    vec![10, 1]
}
fn default_lr_decay_freq() -> u64 {
    50_000
}
fn default_disp_freq() -> SchedulingParameter {
    SchedulingParameter::updates(1000)
}
fn default_cost_type() -> CostType {
    CostType::CeMean
}
fn default_logical_epoch() -> SchedulingParameter {
    SchedulingParameter::epochs(1)
}
fn default_valid_freq() -> SchedulingParameter {
    SchedulingParameter::updates(10_000)
}
fn default_save_freq() -> SchedulingParameter {
    SchedulingParameter::updates(10_000)
}
fn default_early_stopping() -> u64 {
    10
}
fn default_early_stopping_on() -> StallAggregation {
    StallAggregation::First
}
fn default_gradient_norm_average_window() -> u64 {
    100
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            learn_rate: default_learn_rate(),
            lr_warmup: SchedulingParameter::default(),
            lr_warmup_start_rate: 0.0,
            lr_warmup_cycle: false,
            lr_warmup_at_reload: false,
            lr_decay_inv_sqrt: Vec::new(),
            lr_report: false,
            lr_decay: 0.0,
            lr_decay_strategy: default_lr_decay_strategy(),
            lr_decay_start: default_lr_decay_start(),
            lr_decay_freq: default_lr_decay_freq(),
            lr_decay_reset_optimizer: false,
            lr_decay_repeat_warmup: false,
            disp_freq: default_disp_freq(),
            disp_first: 0,
            disp_label_counts: false,
            cost_type: default_cost_type(),
            logical_epoch: default_logical_epoch(),
            logical_epoch_width: None,
            valid_freq: default_valid_freq(),
            valid_from: SchedulingParameter::default(),
            save_freq: default_save_freq(),
            save_from: SchedulingParameter::default(),
            sync_freq: SchedulingParameter::default(),
            exponential_smoothing: 0.0,
            exponential_smoothing_replace_freq: SchedulingParameter::default(),
            after: Vec::new(),
            after_epochs: 0,
            after_batches: 0,
            early_stopping: default_early_stopping(),
            early_stopping_on: default_early_stopping_on(),
            divergence: DivergenceConfig::default(),
            gradient_norm_average_window: default_gradient_norm_average_window(),
            mini_batch_warmup: SchedulingParameter::default(),
            mini_batch_track_lr: false,
            no_restore_corpus: false,
            valid_reset_stalled: false,
            valid_reset_all: false,
            stream_input: false,
        }
    }
}

impl SchedulerConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    /// Loads and validates a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ScheduleResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ScheduleError::ConfigFile {
            path: path.display().to_string(),
            reason: format!("failed to read: {e}"),
        })?;
        let config: Self = toml::from_str(&contents).map_err(|e| ScheduleError::ConfigFile {
            path: path.display().to_string(),
            reason: format!("failed to parse: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration to a TOML file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> ScheduleResult<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self).map_err(|e| ScheduleError::ConfigFile {
            path: path.display().to_string(),
            reason: format!("failed to serialize: {e}"),
        })?;
        fs::write(path, contents).map_err(|e| ScheduleError::ConfigFile {
            path: path.display().to_string(),
            reason: format!("failed to write: {e}"),
        })?;
        Ok(())
    }

    /// The effective start threshold of the inverse-square-root schedule.
    ///
    /// With one argument the schedule starts at its own scale; a second
    /// argument overrides the start.
    #[must_use]
    pub fn inv_sqrt_schedule(&self) -> Option<(SchedulingParameter, u64)> {
        let scale = *self.lr_decay_inv_sqrt.first()?;
        if !scale.is_set() {
            return None;
        }
        let start = match self.lr_decay_inv_sqrt.get(1) {
            Some(p) => p.n,
            None => scale.n,
        };
        Some((scale, start))
    }

    /// Validates option values and cross-option consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidOption`] naming the first offending
    /// option.
    pub fn validate(&self) -> ScheduleResult<()> {
        if !self.learn_rate.is_finite() || self.learn_rate <= 0.0 {
            return Err(invalid("learn_rate", "must be a positive finite number"));
        }
        if !self.lr_warmup_start_rate.is_finite() || self.lr_warmup_start_rate < 0.0 {
            return Err(invalid(
                "lr_warmup_start_rate",
                "must be a non-negative finite number",
            ));
        }
        if self.lr_decay != 0.0 && !(self.lr_decay > 0.0 && self.lr_decay <= 1.0) {
            return Err(invalid("lr_decay", "must be in (0, 1] or 0 to disable"));
        }

        let start_arity = match self.lr_decay_strategy {
            DecayStrategy::EpochBatches | DecayStrategy::EpochStalled => 2,
            DecayStrategy::Epoch | DecayStrategy::Batches | DecayStrategy::Stalled => 1,
        };
        if self.lr_decay != 0.0 && self.lr_decay_start.len() < start_arity {
            return Err(invalid(
                "lr_decay_start",
                format!(
                    "strategy needs {} threshold(s), got {}",
                    start_arity,
                    self.lr_decay_start.len()
                ),
            ));
        }

        if self.lr_decay_inv_sqrt.len() > 2 {
            return Err(invalid(
                "lr_decay_inv_sqrt",
                "takes at most a scale and a start",
            ));
        }
        if let (Some(scale), Some(start)) =
            (self.lr_decay_inv_sqrt.first(), self.lr_decay_inv_sqrt.get(1))
        {
            if scale.is_set() && start.is_set() && scale.unit != start.unit {
                return Err(invalid(
                    "lr_decay_inv_sqrt",
                    "scale and start must share a unit",
                ));
            }
        }

        if !self.logical_epoch.is_set() {
            return Err(invalid("logical_epoch", "must be a positive quantity"));
        }

        for (name, param) in [
            ("disp_freq", self.disp_freq),
            ("valid_freq", self.valid_freq),
            ("save_freq", self.save_freq),
            ("sync_freq", self.sync_freq),
            (
                "exponential_smoothing_replace_freq",
                self.exponential_smoothing_replace_freq,
            ),
            ("divergence.check_at", self.divergence.check_at),
        ] {
            if param.is_set() && param.unit == SchedulingUnit::Epochs {
                return Err(invalid(name, "epochs are not a valid cadence unit"));
            }
        }
        if self.lr_warmup_cycle
            && self.lr_warmup.is_set()
            && self.lr_warmup.unit == SchedulingUnit::Epochs
        {
            return Err(invalid(
                "lr_warmup",
                "epochs are not a valid unit with lr_warmup_cycle",
            ));
        }

        if !(0.0..1.0).contains(&self.exponential_smoothing) {
            return Err(invalid("exponential_smoothing", "must be in [0, 1)"));
        }

        if self.divergence.enabled {
            if self.divergence.window_slow == 0 || self.divergence.window_fast == 0 {
                return Err(invalid("divergence", "windows must be positive"));
            }
            if self.divergence.window_fast > self.divergence.window_slow {
                return Err(invalid(
                    "divergence",
                    "fast window must not exceed the slow window",
                ));
            }
            if !self.divergence.tolerance.is_finite() || self.divergence.tolerance <= 0.0 {
                return Err(invalid("divergence", "tolerance must be positive"));
            }
        }

        if self.gradient_norm_average_window == 0 {
            return Err(invalid("gradient_norm_average_window", "must be positive"));
        }

        Ok(())
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ScheduleError {
    ScheduleError::InvalidOption {
        name,
        reason: reason.into(),
    }
}

/// Parses a comma-separated stop-condition list into the typed `after`
/// vector, e.g. `"10e,300Ku,20Gt"` into ten epochs, 300 000 updates, and
/// twenty billion labels. Empty clauses are skipped.
///
/// # Errors
///
/// Returns [`ScheduleError::ParseStopCondition`] naming the first clause
/// that is not a valid scheduling parameter.
pub fn parse_stop_conditions(text: &str) -> ScheduleResult<Vec<SchedulingParameter>> {
    text.split(',')
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .map(|clause| {
            clause.parse::<SchedulingParameter>().map_err(|e| {
                let reason = match e {
                    ScheduleError::ParseParameter { reason, .. } => reason,
                    other => other.to_string(),
                };
                ScheduleError::ParseStopCondition {
                    text: clause.to_string(),
                    reason,
                }
            })
        })
        .collect()
}

/// Builder for [`SchedulerConfig`].
///
/// Unset fields fall back to the same defaults as [`SchedulerConfig::default`].
#[derive(Debug, Default)]
pub struct SchedulerConfigBuilder {
    learn_rate: Option<f64>,
    lr_warmup: Option<SchedulingParameter>,
    lr_warmup_start_rate: Option<f64>,
    lr_decay_inv_sqrt: Option<Vec<SchedulingParameter>>,
    lr_decay: Option<f64>,
    lr_decay_strategy: Option<DecayStrategy>,
    lr_decay_start: Option<Vec<u64>>,
    disp_freq: Option<SchedulingParameter>,
    valid_freq: Option<SchedulingParameter>,
    save_freq: Option<SchedulingParameter>,
    after: Option<Vec<SchedulingParameter>>,
    after_epochs: Option<u64>,
    after_batches: Option<u64>,
    early_stopping: Option<u64>,
    early_stopping_on: Option<StallAggregation>,
    divergence: Option<DivergenceConfig>,
    mini_batch_warmup: Option<SchedulingParameter>,
    cost_type: Option<CostType>,
    logical_epoch: Option<SchedulingParameter>,
}

impl SchedulerConfigBuilder {
    /// Sets the base learning rate.
    #[must_use]
    pub fn learn_rate(mut self, rate: f64) -> Self {
        self.learn_rate = Some(rate);
        self
    }

    /// Sets the warmup ramp length.
    #[must_use]
    pub fn lr_warmup(mut self, warmup: SchedulingParameter) -> Self {
        self.lr_warmup = Some(warmup);
        self
    }

    /// Sets the learning rate at the start of the warmup ramp.
    #[must_use]
    pub fn lr_warmup_start_rate(mut self, rate: f64) -> Self {
        self.lr_warmup_start_rate = Some(rate);
        self
    }

    /// Sets the inverse-square-root decay arguments.
    #[must_use]
    pub fn lr_decay_inv_sqrt(mut self, args: Vec<SchedulingParameter>) -> Self {
        self.lr_decay_inv_sqrt = Some(args);
        self
    }

    /// Sets the event-driven decay factor.
    #[must_use]
    pub fn lr_decay(mut self, factor: f64) -> Self {
        self.lr_decay = Some(factor);
        self
    }

    /// Sets the decay strategy.
    #[must_use]
    pub fn lr_decay_strategy(mut self, strategy: DecayStrategy) -> Self {
        self.lr_decay_strategy = Some(strategy);
        self
    }

    /// Sets the decay strategy thresholds.
    #[must_use]
    pub fn lr_decay_start(mut self, start: Vec<u64>) -> Self {
        self.lr_decay_start = Some(start);
        self
    }

    /// Sets the progress-line cadence.
    #[must_use]
    pub fn disp_freq(mut self, freq: SchedulingParameter) -> Self {
        self.disp_freq = Some(freq);
        self
    }

    /// Sets the validation cadence.
    #[must_use]
    pub fn valid_freq(mut self, freq: SchedulingParameter) -> Self {
        self.valid_freq = Some(freq);
        self
    }

    /// Sets the checkpoint cadence.
    #[must_use]
    pub fn save_freq(mut self, freq: SchedulingParameter) -> Self {
        self.save_freq = Some(freq);
        self
    }

    /// Sets the heterogeneous stop conditions.
    #[must_use]
    pub fn after(mut self, conditions: Vec<SchedulingParameter>) -> Self {
        self.after = Some(conditions);
        self
    }

    /// Sets the epoch-count stop condition.
    #[must_use]
    pub fn after_epochs(mut self, epochs: u64) -> Self {
        self.after_epochs = Some(epochs);
        self
    }

    /// Sets the update-count stop condition.
    #[must_use]
    pub fn after_batches(mut self, batches: u64) -> Self {
        self.after_batches = Some(batches);
        self
    }

    /// Sets the early-stopping stall threshold.
    #[must_use]
    pub fn early_stopping(mut self, stalls: u64) -> Self {
        self.early_stopping = Some(stalls);
        self
    }

    /// Sets the stall aggregation policy.
    #[must_use]
    pub fn early_stopping_on(mut self, aggregation: StallAggregation) -> Self {
        self.early_stopping_on = Some(aggregation);
        self
    }

    /// Sets the divergence-detection settings.
    #[must_use]
    pub fn divergence(mut self, divergence: DivergenceConfig) -> Self {
        self.divergence = Some(divergence);
        self
    }

    /// Sets the batch-size warmup ramp.
    #[must_use]
    pub fn mini_batch_warmup(mut self, warmup: SchedulingParameter) -> Self {
        self.mini_batch_warmup = Some(warmup);
        self
    }

    /// Sets the cost display type.
    #[must_use]
    pub fn cost_type(mut self, cost_type: CostType) -> Self {
        self.cost_type = Some(cost_type);
        self
    }

    /// Sets the logical-epoch definition.
    #[must_use]
    pub fn logical_epoch(mut self, epoch: SchedulingParameter) -> Self {
        self.logical_epoch = Some(epoch);
        self
    }

    /// Builds the configuration, filling unset fields with defaults.
    #[must_use]
    pub fn build(self) -> SchedulerConfig {
        SchedulerConfig {
            learn_rate: self.learn_rate.unwrap_or_else(default_learn_rate),
            lr_warmup: self.lr_warmup.unwrap_or_default(),
            lr_warmup_start_rate: self.lr_warmup_start_rate.unwrap_or(0.0),
            lr_decay_inv_sqrt: self.lr_decay_inv_sqrt.unwrap_or_default(),
            lr_decay: self.lr_decay.unwrap_or(0.0),
            lr_decay_strategy: self
                .lr_decay_strategy
                .unwrap_or_else(default_lr_decay_strategy),
            lr_decay_start: self.lr_decay_start.unwrap_or_else(default_lr_decay_start),
            disp_freq: self.disp_freq.unwrap_or_else(default_disp_freq),
            valid_freq: self.valid_freq.unwrap_or_else(default_valid_freq),
            save_freq: self.save_freq.unwrap_or_else(default_save_freq),
            after: self.after.unwrap_or_default(),
            after_epochs: self.after_epochs.unwrap_or(0),
            after_batches: self.after_batches.unwrap_or(0),
            early_stopping: self.early_stopping.unwrap_or_else(default_early_stopping),
            early_stopping_on: self
                .early_stopping_on
                .unwrap_or_else(default_early_stopping_on),
            divergence: self.divergence.unwrap_or_default(),
            mini_batch_warmup: self.mini_batch_warmup.unwrap_or_default(),
            cost_type: self.cost_type.unwrap_or_else(default_cost_type),
            logical_epoch: self.logical_epoch.unwrap_or_else(default_logical_epoch),
            ..SchedulerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.learn_rate, 1e-4);
        assert!(!config.divergence.enabled);
    }

    #[test]
    fn builder_fills_defaults() {
        let config = SchedulerConfig::builder()
            .learn_rate(0.001)
            .after_batches(500)
            .build();
        assert_eq!(config.learn_rate, 0.001);
        assert_eq!(config.after_batches, 500);
        assert_eq!(config.valid_freq, SchedulingParameter::updates(10_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_nonpositive_learn_rate() {
        let config = SchedulerConfig::builder().learn_rate(0.0).build();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("learn_rate"));
    }

    #[test]
    fn rejects_decay_factor_above_one() {
        let config = SchedulerConfig::builder().lr_decay(1.5).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_missing_decay_thresholds() {
        let config = SchedulerConfig::builder()
            .lr_decay(0.5)
            .lr_decay_strategy(DecayStrategy::EpochStalled)
            .lr_decay_start(vec![10])
            .build();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("lr_decay_start"));
    }

    #[test]
    fn rejects_epoch_unit_cadence() {
        let config = SchedulerConfig::builder()
            .valid_freq(SchedulingParameter::epochs(1))
            .build();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("valid_freq"));
    }

    #[test]
    fn rejects_mixed_inv_sqrt_units() {
        let config = SchedulerConfig::builder()
            .lr_decay_inv_sqrt(vec![
                SchedulingParameter::updates(16_000),
                SchedulingParameter::labels(1_000_000),
            ])
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn inv_sqrt_schedule_defaults_start_to_scale() {
        let config = SchedulerConfig::builder()
            .lr_decay_inv_sqrt(vec![SchedulingParameter::updates(16_000)])
            .build();
        let (scale, start) = config.inv_sqrt_schedule().unwrap();
        assert_eq!(scale, SchedulingParameter::updates(16_000));
        assert_eq!(start, 16_000);

        let config = SchedulerConfig::builder()
            .lr_decay_inv_sqrt(vec![
                SchedulingParameter::updates(16_000),
                SchedulingParameter::updates(0),
            ])
            .build();
        let (_, start) = config.inv_sqrt_schedule().unwrap();
        assert_eq!(start, 0);
    }

    #[test]
    fn rejects_bad_divergence_windows() {
        let mut divergence = DivergenceConfig::enabled();
        divergence.window_fast = 2000;
        let config = SchedulerConfig::builder().divergence(divergence).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip() {
        let config = SchedulerConfig::builder()
            .learn_rate(3e-4)
            .lr_warmup(SchedulingParameter::updates(16_000))
            .after(vec![
                SchedulingParameter::epochs(10),
                SchedulingParameter::updates(300_000),
            ])
            .divergence(DivergenceConfig::enabled())
            .cost_type(CostType::Perplexity)
            .build();

        let text = toml::to_string_pretty(&config).unwrap();
        let back: SchedulerConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.toml");

        let config = SchedulerConfig::builder()
            .learn_rate(5e-4)
            .lr_decay(0.7)
            .lr_decay_strategy(DecayStrategy::Batches)
            .lr_decay_start(vec![40_000])
            .build();
        config.to_file(&path).unwrap();

        let loaded = SchedulerConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn stop_condition_list_parses_mixed_units() {
        let after = parse_stop_conditions("10e, 300Ku,20Gt").unwrap();
        assert_eq!(
            after,
            vec![
                SchedulingParameter::epochs(10),
                SchedulingParameter::updates(300_000),
                SchedulingParameter::labels(20_000_000_000),
            ]
        );
        assert!(parse_stop_conditions("").unwrap().is_empty());
    }

    #[test]
    fn stop_condition_list_names_the_bad_clause() {
        let err = parse_stop_conditions("10e,banana").unwrap_err();
        assert!(err.to_string().contains("banana"), "{err}");
    }

    #[test]
    fn strategy_names_match_option_surface() {
        let json = serde_json::to_string(&DecayStrategy::EpochStalled).unwrap();
        assert_eq!(json, "\"epoch+stalled\"");
        let back: DecayStrategy = serde_json::from_str("\"epoch+batches\"").unwrap();
        assert_eq!(back, DecayStrategy::EpochBatches);
    }

    #[test]
    fn cost_type_accepts_legacy_alias() {
        let legacy: CostType = serde_json::from_str("\"cross-entropy\"").unwrap();
        assert_eq!(legacy, CostType::CeMean);
    }
}
