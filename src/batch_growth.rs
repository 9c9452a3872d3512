//! Dynamic mini-batch sizing.
//!
//! Two independent policies produce a multiplier the data pipeline applies
//! to its reference batch size. The warmup ramp grows batches from zero to
//! full size over a configured runway, which keeps early updates cheap
//! while the model is still changing fast. Learning-rate tracking grows the
//! batch in inverse proportion to scheduled decay; it is experimental and
//! off by default.

use crate::config::SchedulerConfig;
use crate::lr;
use crate::parameter::SchedulingUnit;
use crate::state::TrainingState;

/// True when any policy is active and the pipeline should re-query the
/// multiplier as training progresses.
#[must_use]
pub fn is_dynamic(config: &SchedulerConfig) -> bool {
    config.mini_batch_warmup.is_set() || config.mini_batch_track_lr
}

/// Multiplier for the reference batch size at the current progress.
///
/// During warmup this is the fraction of the runway covered so far, square
/// rooted when the runway is measured in labels: label progress accelerates
/// as batches grow, and the square root keeps the ramp roughly linear in
/// updates instead of feeding back into itself.
///
/// With learning-rate tracking enabled the result is additionally divided
/// by the scheduled decay multiplier (inverse-square-root schedule times
/// the cumulative decay factor, warmup excluded), so the batch grows as the
/// rate shrinks.
#[must_use]
pub fn multiplier(config: &SchedulerConfig, state: &TrainingState) -> f64 {
    let mut ratio = 1.0;

    if config.mini_batch_warmup.is_set() {
        let progress = state.progress_in(config.mini_batch_warmup.unit);
        let mut progress_ratio = progress as f64 / config.mini_batch_warmup.n as f64;
        if config.mini_batch_warmup.unit == SchedulingUnit::Labels {
            progress_ratio = progress_ratio.sqrt();
        }
        if progress_ratio < 1.0 {
            ratio *= progress_ratio;
        }
    }

    if config.mini_batch_track_lr {
        let lr_factor = lr::scheduled_decay_factor(config, state) * state.factor;
        if lr_factor > 0.0 {
            ratio /= lr_factor;
        }
    }

    ratio
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::SchedulingParameter;

    const EPSILON: f64 = 1e-12;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < EPSILON
    }

    #[test]
    fn static_sizing_by_default() {
        let config = SchedulerConfig::default();
        assert!(!is_dynamic(&config));
        let state = TrainingState::new(config.learn_rate);
        assert!(approx_eq(multiplier(&config, &state), 1.0));
    }

    #[test]
    fn update_warmup_ramps_linearly() {
        let config = SchedulerConfig::builder()
            .mini_batch_warmup(SchedulingParameter::updates(100))
            .build();
        assert!(is_dynamic(&config));
        let mut state = TrainingState::new(config.learn_rate);

        // Before the first update the ramp has covered none of the runway.
        assert!(approx_eq(multiplier(&config, &state), 0.0));

        state.batches = 25;
        assert!(approx_eq(multiplier(&config, &state), 0.25));

        state.batches = 100;
        assert!(approx_eq(multiplier(&config, &state), 1.0));

        state.batches = 400;
        assert!(approx_eq(multiplier(&config, &state), 1.0));
    }

    #[test]
    fn label_warmup_uses_square_root_of_progress() {
        let config = SchedulerConfig::builder()
            .mini_batch_warmup(SchedulingParameter::labels(10_000))
            .build();
        let mut state = TrainingState::new(config.learn_rate);

        state.labels_total = 2500;
        assert!(approx_eq(multiplier(&config, &state), 0.5));
    }

    #[test]
    fn lr_tracking_grows_batch_as_rate_decays() {
        let mut config = SchedulerConfig::builder()
            .lr_decay_inv_sqrt(vec![SchedulingParameter::updates(1000)])
            .build();
        config.mini_batch_track_lr = true;
        assert!(is_dynamic(&config));

        let mut state = TrainingState::new(config.learn_rate);
        state.batches = 4000;
        state.factor = 0.5;

        // inv-sqrt gives 0.5, cumulative factor 0.5: rate is a quarter of
        // base, so the batch quadruples.
        assert!(approx_eq(multiplier(&config, &state), 4.0));
    }

    #[test]
    fn policies_compose() {
        let mut config = SchedulerConfig::builder()
            .mini_batch_warmup(SchedulingParameter::updates(100))
            .lr_decay_inv_sqrt(vec![SchedulingParameter::updates(1000)])
            .build();
        config.mini_batch_track_lr = true;

        let mut state = TrainingState::new(config.learn_rate);
        state.batches = 50;
        assert!(approx_eq(multiplier(&config, &state), 0.5));
    }
}
