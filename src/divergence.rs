//! Loss divergence detection and gradient-norm statistics.
//!
//! Two exponential moving averages of the normalized per-update loss run at
//! different speeds. The slow average (with its moving variance) describes
//! where training has been; the fast average describes where it is right
//! now. When the fast average climbs more than `tolerance` standard
//! deviations above the slow one, the run has diverged and the caller gets a
//! typed [`ScheduleError::Divergence`] carrying the statistics, so it can
//! roll back to a checkpoint instead of unwinding.
//!
//! The check runs against the averages *before* they absorb the current
//! loss: a single catastrophic update must not be allowed to drag the
//! baseline toward itself and mask the jump it caused.

use crate::config::{DivergenceConfig, SchedulerConfig};
use crate::error::{ScheduleError, ScheduleResult};
use crate::parameter::SchedulingParameter;
use crate::state::TrainingState;

/// Watches per-update losses and gradient norms for signs of divergence.
///
/// All statistics live in [`TrainingState`] so they survive checkpoints; the
/// monitor itself only carries configuration.
#[derive(Debug, Clone)]
pub struct DivergenceMonitor {
    config: DivergenceConfig,
    disp_freq: SchedulingParameter,
    disp_first: u64,
    gradient_window: u64,
}

impl DivergenceMonitor {
    /// Builds a monitor from the scheduler configuration.
    #[must_use]
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            config: config.divergence.clone(),
            disp_freq: config.disp_freq,
            disp_first: config.disp_first,
            gradient_window: config.gradient_norm_average_window,
        }
    }

    /// True when divergence detection is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Feeds one normalized loss into the moving averages and checks for
    /// divergence.
    ///
    /// Does nothing while detection is disabled or when the loss is not
    /// finite; non-finite losses are the batch's problem, not a trend.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::Divergence`] when the fast average sits more
    /// than `tolerance` standard deviations above the slow average, or
    /// unconditionally (with `sigmas` of zero) when the diagnostic
    /// `check_at` mark is crossed.
    pub fn observe_loss(&self, state: &mut TrainingState, loss: f64) -> ScheduleResult<()> {
        if !self.config.enabled || !loss.is_finite() {
            return Ok(());
        }

        let alpha_slow = smoothing_alpha(state.batches, self.config.window_slow);
        let alpha_fast = smoothing_alpha(state.batches, self.config.window_fast);

        if state.loss_avg_slow == 0.0 {
            // First finite loss seeds both averages; the update below is
            // then a no-op since the deltas are zero.
            state.loss_avg_slow = loss;
            state.loss_avg_fast = loss;
            state.loss_var_slow = 0.0;
        }

        // Only check once the slow window has filled; before that the
        // variance estimate is too green to compare against.
        if state.batches > self.config.window_slow {
            let delta = state.loss_avg_fast - state.loss_avg_slow;
            let sigma = state.loss_var_slow.sqrt();
            if delta > 0.0 && sigma > 0.0 {
                let sigmas = delta / sigma;
                if sigmas > self.config.tolerance {
                    tracing::warn!(
                        average_slow = state.loss_avg_slow,
                        average_fast = state.loss_avg_fast,
                        sigmas,
                        "loss diverged from its slow average"
                    );
                    return Err(ScheduleError::Divergence {
                        average_slow: state.loss_avg_slow,
                        average_fast: state.loss_avg_fast,
                        sigmas,
                    });
                }
            }
            if state.entered_new_period_of(self.disp_freq) || state.batches <= self.disp_first {
                tracing::debug!(
                    average_slow = state.loss_avg_slow,
                    average_fast = state.loss_avg_fast,
                    sigma,
                    "divergence watch"
                );
            }
        }

        if state.entered_new_period_of(self.config.check_at) {
            tracing::warn!(
                mark = %self.config.check_at,
                "raising forced divergence at requested progress mark"
            );
            return Err(ScheduleError::Divergence {
                average_slow: state.loss_avg_slow,
                average_fast: state.loss_avg_fast,
                sigmas: 0.0,
            });
        }

        // The delta against the pre-update slow mean drives both the mean
        // shift and the variance recurrence.
        let delta = loss - state.loss_avg_slow;
        state.loss_avg_slow += alpha_slow * delta;
        state.loss_var_slow = (1.0 - alpha_slow) * (state.loss_var_slow + alpha_slow * delta * delta);
        let delta_fast = loss - state.loss_avg_fast;
        state.loss_avg_fast += alpha_fast * delta_fast;

        Ok(())
    }

    /// Feeds one gradient norm into the moving averages, in both the linear
    /// and the log domain. Runs regardless of whether divergence detection
    /// is enabled; zero or non-finite norms are skipped.
    ///
    /// No seeding is needed here: the window ramps up with the update
    /// count, so the very first norm arrives with a coefficient of one.
    pub fn observe_gradient_norm(&self, state: &mut TrainingState, norm: f64) {
        if norm == 0.0 || !norm.is_finite() {
            return;
        }

        let alpha = smoothing_alpha(state.batches, self.gradient_window);

        let delta = norm - state.gradient_norm_avg;
        state.gradient_norm_avg += alpha * delta;
        state.gradient_norm_var = (1.0 - alpha) * (state.gradient_norm_var + alpha * delta * delta);

        let log_delta = norm.ln() - state.log_gradient_norm_avg;
        state.log_gradient_norm_avg += alpha * log_delta;
        state.log_gradient_norm_var =
            (1.0 - alpha) * (state.log_gradient_norm_var + alpha * log_delta * log_delta);
    }
}

/// EMA coefficient for a window, ramping up while fewer than `window`
/// updates have been seen so early samples are not drowned by the zero
/// history.
fn smoothing_alpha(batches: u64, window: u64) -> f64 {
    2.0 / (batches.min(window) as f64 + 1.0)
}
