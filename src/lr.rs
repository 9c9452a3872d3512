//! Learning-rate schedule: warmup ramp, inverse-square-root decay, and the
//! event-driven cumulative decay triggers.
//!
//! The effective rate is recomputed from scratch after every progress
//! change, never updated incrementally:
//!
//! ```text
//! eta = interp(start_rate, learn_rate, warmup) * inv_sqrt(progress) * factor
//! ```
//!
//! where `factor` is the cumulative decay multiplier living in
//! [`TrainingState`]. Recomputing keeps the rate a pure function of progress
//! and `factor`, so a restored snapshot lands on exactly the rate the run
//! would have had.

use crate::config::{DecayStrategy, SchedulerConfig};
use crate::error::{ScheduleError, ScheduleResult};
use crate::parameter::SchedulingParameter;
use crate::state::TrainingState;

/// Multiplier from the inverse-square-root schedule at the current progress.
///
/// With one argument `S` the rate stays flat until progress `S` and then
/// follows `sqrt(S / progress)`. A second argument moves the start of the
/// decay without changing its shape: the curve is shifted so the multiplier
/// is exactly 1 at the start mark.
#[must_use]
pub fn scheduled_decay_factor(config: &SchedulerConfig, state: &TrainingState) -> f64 {
    let Some((scale, start)) = config.inv_sqrt_schedule() else {
        return 1.0;
    };
    let progress = state.progress_in(scale.unit);
    if progress > start {
        let shifted = progress - start + scale.n;
        (scale.n as f64 / shifted as f64).sqrt()
    } else {
        1.0
    }
}

/// Recomputes the effective learning rate for the current progress and
/// stores it in `state.eta`.
///
/// The warmup ramp interpolates linearly from `lr_warmup_start_rate` to
/// `learn_rate` over the warmup period, measured from `state.warmup_start`
/// so a restarted ramp begins at the start rate again.
pub fn update_learning_rate(config: &SchedulerConfig, state: &mut TrainingState) {
    let mut warmup_factor = 1.0;
    if config.lr_warmup.is_set() {
        let progress = state.progress_in(config.lr_warmup.unit);
        let into_ramp = progress.saturating_sub(state.warmup_start.n);
        warmup_factor = (into_ramp as f64 / config.lr_warmup.n as f64).min(1.0);
    }

    let mut base = config.lr_warmup_start_rate
        + (config.learn_rate - config.lr_warmup_start_rate) * warmup_factor;
    base *= scheduled_decay_factor(config, state);

    state.update_eta(base);
}

/// Checks that the warmup anchor in the state counts the same unit as the
/// configured warmup window.
///
/// [`restart_warmup`] always writes the anchor in the window's unit, so a
/// mismatch can only enter through a snapshot saved under a different
/// schedule. Construction and restore run this check before any rate is
/// computed from the pair.
pub(crate) fn check_warmup_unit(
    config: &SchedulerConfig,
    state: &TrainingState,
) -> ScheduleResult<()> {
    if config.lr_warmup.is_set()
        && state.warmup_start.is_set()
        && state.warmup_start.unit != config.lr_warmup.unit
    {
        return Err(ScheduleError::WarmupUnitMismatch {
            found: state.warmup_start.unit,
            expected: config.lr_warmup.unit,
        });
    }
    Ok(())
}

/// Learning-rate handling at an epoch boundary.
///
/// The `epoch` family of strategies decays here: always once the start
/// epoch is reached, and for the combined strategies additionally once the
/// secondary threshold (batches, or the stall high-water mark) is reached.
pub(crate) fn after_epoch(config: &SchedulerConfig, state: &mut TrainingState) {
    update_learning_rate(config, state);
    if config.lr_decay <= 0.0 {
        return;
    }
    state.reset_optimizer = false;

    let start_epoch = config.lr_decay_start.first().copied().unwrap_or(0);
    let secondary = config.lr_decay_start.get(1).copied().unwrap_or(0);

    let mut decay = matches!(
        config.lr_decay_strategy,
        DecayStrategy::Epoch | DecayStrategy::EpochBatches | DecayStrategy::EpochStalled
    ) && start_epoch != 0
        && state.epochs >= start_epoch;

    match config.lr_decay_strategy {
        DecayStrategy::EpochBatches if secondary != 0 && state.batches >= secondary => {
            decay = true;
        }
        DecayStrategy::EpochStalled if secondary != 0 && state.max_stalled >= secondary => {
            decay = true;
        }
        _ => {}
    }

    if decay {
        apply_decay(config, state, "epoch");
    }
}

/// Learning-rate handling after an optimizer update.
///
/// The `batches` strategy decays on every `lr_decay_freq` updates past its
/// start. Independent of decay, the warmup ramp restarts on the first
/// update after a reload (when configured) and at every full warmup period
/// (when cycling). `first_update` is true only for the first call after
/// construction or a snapshot restore.
pub(crate) fn after_update(config: &SchedulerConfig, state: &mut TrainingState, first_update: bool) {
    state.reset_optimizer = false;
    update_learning_rate(config, state);

    if config.lr_decay > 0.0 && config.lr_decay_strategy == DecayStrategy::Batches {
        let start = config.lr_decay_start.first().copied().unwrap_or(0);
        let freq = config.lr_decay_freq;
        if start > 0 && freq > 0 && state.batches >= start && (state.batches - start) % freq == 0 {
            apply_decay(config, state, "batches");
        }
    }

    if first_update && config.lr_warmup_at_reload {
        tracing::info!("restarting learning rate warmup after reload");
        restart_warmup(config, state);
    }

    if config.lr_warmup_cycle && state.entered_new_period_of(config.lr_warmup) {
        restart_warmup(config, state);
    }
}

/// Learning-rate handling when the stall count increased.
///
/// The `stalled` strategy decays on every multiple of its threshold, so a
/// run that keeps stalling keeps decaying.
pub(crate) fn after_stall(config: &SchedulerConfig, state: &mut TrainingState) {
    state.reset_optimizer = false;
    update_learning_rate(config, state);

    if config.lr_decay > 0.0 && config.lr_decay_strategy == DecayStrategy::Stalled {
        let threshold = config.lr_decay_start.first().copied().unwrap_or(0);
        if threshold != 0 && state.stalled != 0 && state.stalled % threshold == 0 {
            apply_decay(config, state, "stalled");
        }
    }
}

fn apply_decay(config: &SchedulerConfig, state: &mut TrainingState, trigger: &str) {
    state.factor *= config.lr_decay;
    update_learning_rate(config, state);
    tracing::info!(
        eta = state.eta,
        factor = state.factor,
        trigger,
        "decaying learning rate"
    );

    state.reset_optimizer = config.lr_decay_reset_optimizer;
    if state.reset_optimizer {
        tracing::info!("resetting optimizer statistics");
    }

    if config.lr_decay_repeat_warmup {
        tracing::info!("restarting learning rate warmup");
        restart_warmup(config, state);
    }
}

fn restart_warmup(config: &SchedulerConfig, state: &mut TrainingState) {
    state.warmup_start = SchedulingParameter::new(
        state.progress_in(config.lr_warmup.unit),
        config.lr_warmup.unit,
    );
}
