//! Validation collaborators and stall accounting.
//!
//! A validator computes a scalar quality score on held-out data. The
//! scheduler owns when validators run and mirrors their results into
//! [`TrainingState`]; the validators themselves own how the score is
//! computed and whether lower or higher is better.
//!
//! Multiple validators are reduced to the single stall count that drives
//! early stopping and stall-triggered decay by a configurable
//! [`StallAggregation`] policy.

use crate::config::StallAggregation;
use crate::state::{TrainingState, ValidatorRecord};

/// A held-out evaluation the scheduler runs on its validation cadence.
///
/// Implementations track their own best score and stall count, typically by
/// embedding a [`ScoreTracker`]. The scheduler mirrors both into the
/// training state after every run, and hands them back through
/// [`Validator::restore`] when a snapshot is loaded.
pub trait Validator {
    /// Identifier of the metric, used as the key in the persisted
    /// per-validator map.
    fn metric_name(&self) -> &str;

    /// Runs validation and returns the score, updating the internal
    /// last-best and stall tracking.
    fn validate(&mut self, state: &TrainingState) -> f64;

    /// Best score seen so far.
    fn last_best(&self) -> f64;

    /// Consecutive validations without improvement.
    fn stalled(&self) -> u64;

    /// Worst possible score, used to seed the persisted record before the
    /// first validation.
    fn init_score(&self) -> f64;

    /// Reinstalls tracking from a restored snapshot record.
    fn restore(&mut self, record: ValidatorRecord) {
        let _ = record;
    }
}

/// Best-score and stall bookkeeping shared by validator implementations.
///
/// ```
/// use training_scheduler_rs::validator::ScoreTracker;
///
/// let mut tracker = ScoreTracker::minimizing();
/// assert!(tracker.record(2.0));  // first score is a new best
/// assert!(!tracker.record(2.0)); // no improvement
/// assert_eq!(tracker.stalled(), 1);
/// assert!(tracker.record(1.5));
/// assert_eq!(tracker.stalled(), 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreTracker {
    lower_is_better: bool,
    last_best: f64,
    stalled: u64,
}

impl ScoreTracker {
    /// Tracker for metrics where lower is better (losses, perplexity).
    #[must_use]
    pub fn minimizing() -> Self {
        Self {
            lower_is_better: true,
            last_best: f64::MAX,
            stalled: 0,
        }
    }

    /// Tracker for metrics where higher is better (accuracy, BLEU).
    #[must_use]
    pub fn maximizing() -> Self {
        Self {
            lower_is_better: false,
            last_best: f64::MIN,
            stalled: 0,
        }
    }

    /// Worst possible score for this tracker's direction. Finite extremes
    /// rather than infinities so the value survives a snapshot.
    #[must_use]
    pub fn init_score(&self) -> f64 {
        if self.lower_is_better {
            f64::MAX
        } else {
            f64::MIN
        }
    }

    /// Best score seen so far.
    #[must_use]
    pub fn last_best(&self) -> f64 {
        self.last_best
    }

    /// Consecutive scores without improvement.
    #[must_use]
    pub fn stalled(&self) -> u64 {
        self.stalled
    }

    /// Folds in a new score. Returns true on a strict improvement, which
    /// resets the stall count; anything else (including a tie) stalls.
    pub fn record(&mut self, score: f64) -> bool {
        let improved = if self.lower_is_better {
            score < self.last_best
        } else {
            score > self.last_best
        };
        if improved {
            self.last_best = score;
            self.stalled = 0;
        } else {
            self.stalled += 1;
        }
        improved
    }

    /// Reinstalls tracking from a snapshot record.
    pub fn restore(&mut self, record: ValidatorRecord) {
        self.last_best = record.last_best;
        self.stalled = record.stalled;
    }
}

/// Reduces per-validator stall counts to the single count early stopping
/// compares against its patience.
///
/// Counts are read from the state's mirrored records rather than from the
/// validator objects, so every process in a distributed run sees the same
/// value after a broadcast. A validator without a record yet counts as
/// zero; no validators at all reduce to zero under every policy.
#[must_use]
pub fn aggregate_stalled(
    validators: &[Box<dyn Validator>],
    state: &TrainingState,
    policy: StallAggregation,
) -> u64 {
    let mut counts = validators
        .iter()
        .map(|v| state.validators.get(v.metric_name()).map_or(0, |r| r.stalled));
    match policy {
        StallAggregation::First => counts.next().unwrap_or(0),
        StallAggregation::Any => counts.max().unwrap_or(0),
        StallAggregation::All => counts.min().unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubValidator {
        name: &'static str,
        tracker: ScoreTracker,
        next_score: f64,
    }

    impl StubValidator {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                tracker: ScoreTracker::minimizing(),
                next_score: 0.0,
            }
        }
    }

    impl Validator for StubValidator {
        fn metric_name(&self) -> &str {
            self.name
        }

        fn validate(&mut self, _state: &TrainingState) -> f64 {
            self.tracker.record(self.next_score);
            self.next_score
        }

        fn last_best(&self) -> f64 {
            self.tracker.last_best()
        }

        fn stalled(&self) -> u64 {
            self.tracker.stalled()
        }

        fn init_score(&self) -> f64 {
            self.tracker.init_score()
        }

        fn restore(&mut self, record: ValidatorRecord) {
            self.tracker.restore(record);
        }
    }

    fn state_with_stalls(pairs: &[(&str, u64)]) -> TrainingState {
        let mut state = TrainingState::new(0.1);
        for (name, stalled) in pairs {
            state.validators.insert(
                (*name).to_string(),
                ValidatorRecord {
                    last_best: 1.0,
                    stalled: *stalled,
                },
            );
        }
        state
    }

    #[test]
    fn minimizing_tracker_rewards_strictly_lower_scores() {
        let mut tracker = ScoreTracker::minimizing();
        assert!(tracker.record(3.0));
        assert!(!tracker.record(3.0));
        assert!(!tracker.record(3.5));
        assert_eq!(tracker.stalled(), 2);
        assert!(tracker.record(2.9));
        assert_eq!(tracker.stalled(), 0);
        assert_eq!(tracker.last_best(), 2.9);
    }

    #[test]
    fn maximizing_tracker_rewards_strictly_higher_scores() {
        let mut tracker = ScoreTracker::maximizing();
        assert!(tracker.record(0.5));
        assert!(!tracker.record(0.4));
        assert!(tracker.record(0.6));
        assert_eq!(tracker.last_best(), 0.6);
    }

    #[test]
    fn tracker_restores_from_snapshot_record() {
        let mut tracker = ScoreTracker::minimizing();
        tracker.restore(ValidatorRecord {
            last_best: 1.25,
            stalled: 4,
        });
        assert_eq!(tracker.last_best(), 1.25);
        assert_eq!(tracker.stalled(), 4);
        // only a real improvement clears the restored stall count
        assert!(!tracker.record(1.25));
        assert_eq!(tracker.stalled(), 5);
    }

    #[test]
    fn aggregation_policies_reduce_counts() {
        let validators: Vec<Box<dyn Validator>> = vec![
            Box::new(StubValidator::new("cross-entropy")),
            Box::new(StubValidator::new("bleu")),
        ];
        let state = state_with_stalls(&[("cross-entropy", 3), ("bleu", 7)]);

        assert_eq!(
            aggregate_stalled(&validators, &state, StallAggregation::First),
            3
        );
        assert_eq!(
            aggregate_stalled(&validators, &state, StallAggregation::Any),
            7
        );
        assert_eq!(
            aggregate_stalled(&validators, &state, StallAggregation::All),
            3
        );
    }

    #[test]
    fn aggregation_without_validators_is_zero() {
        let validators: Vec<Box<dyn Validator>> = Vec::new();
        let state = TrainingState::new(0.1);
        for policy in [
            StallAggregation::First,
            StallAggregation::Any,
            StallAggregation::All,
        ] {
            assert_eq!(aggregate_stalled(&validators, &state, policy), 0);
        }
    }

    #[test]
    fn missing_record_counts_as_zero() {
        let validators: Vec<Box<dyn Validator>> = vec![
            Box::new(StubValidator::new("cross-entropy")),
            Box::new(StubValidator::new("bleu")),
        ];
        let state = state_with_stalls(&[("cross-entropy", 5)]);
        assert_eq!(
            aggregate_stalled(&validators, &state, StallAggregation::All),
            0
        );
    }
}
