//! # training-scheduler-rs
//!
//! Training control loop for neural-network trainers: learning-rate
//! scheduling, validation and checkpoint cadence, divergence detection, and
//! the decision of when to stop.
//!
//! ## Overview
//!
//! A training loop computes updates; everything else is policy. This crate
//! owns that policy layer. The embedding trainer reports each optimizer
//! update to a [`Scheduler`], which advances the [`TrainingState`],
//! recomputes the effective learning rate, watches the loss for divergence,
//! and answers the loop's standing questions (keep going? validate now?
//! checkpoint now?) from a single strongly-typed configuration.
//!
//! Progress is measured in three units (labels, updates, and epochs), and
//! every cadence, ramp, and stop condition is a [`SchedulingParameter`]
//! carrying its unit, so "warm up over 16000 updates" and "validate every
//! 10M labels" compose without unit bookkeeping leaking into the trainer.
//!
//! ## Control Flow
//!
//! ```text
//!                      ┌──────────────────┐
//!    UpdateReport ────▶│     update()     │
//!                      │ counters · l.r.  │
//!                      │ divergence watch │
//!                      └────────┬─────────┘
//!                               │
//!            ┌──────────────────┼───────────────────┐
//!            ▼                  ▼                   ▼
//!    should_validate()    should_save()        keep_going()
//!            │                  │                   │
//!            ▼                  ▼                   ▼
//!       validate()           save()          continue / stop
//!            │
//!            ▼
//!     stall tracking ──▶ learning-rate decay, early stopping
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use training_scheduler_rs::{Scheduler, SchedulerConfig, UpdateReport};
//!
//! let config = SchedulerConfig::builder()
//!     .learn_rate(3e-4)
//!     .lr_warmup("100u".parse()?)
//!     .after_batches(200)
//!     .build();
//!
//! let mut scheduler = Scheduler::new(config)?;
//! scheduler.started();
//! while scheduler.keep_going() {
//!     // forward, backward, and optimizer step happen here
//!     scheduler.update(UpdateReport::new(250.0, 120.0, 32, 120))?;
//!     if scheduler.should_validate() {
//!         scheduler.validate(false);
//!     }
//! }
//! scheduler.validate(true);
//! scheduler.finished();
//! # Ok::<(), training_scheduler_rs::ScheduleError>(())
//! ```
//!
//! ## Features
//!
//! - **Unit-aware scheduling** - cadences and ramps in labels, updates, or
//!   epochs, with SI suffixes (`500u`, `10Mt`, `2e`) in configuration
//! - **Learning-rate schedule** - linear warmup, inverse-square-root decay,
//!   and event-driven cumulative decay with optimizer-reset requests
//! - **Divergence detection** - dual exponential moving averages of the
//!   loss report a typed error value instead of tearing the process down
//! - **Stall-based early stopping** - per-validator stall counts with
//!   `first`/`any`/`all` aggregation
//! - **Dynamic batch sizing** - batch-size warmup and an experimental
//!   learning-rate-tracking growth policy
//! - **Restart-safe persistence** - the whole state serializes next to the
//!   checkpoint and restores to the exact learning rate and cadence phase
//! - **Distributed hooks** - a small [`Reducer`] trait covers all-reduce
//!   and by-value broadcast; single-process training uses [`LocalReducer`]
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`parameter`] - scheduling quantities with units and their text form
//! - [`config`] - validated configuration and TOML serialization
//! - [`error`] - error types, including the divergence signal
//! - [`state`] - the training progress record and lifecycle observers
//! - [`lr`] - the learning-rate schedule
//! - [`divergence`] - loss and gradient-norm statistics
//! - [`batch_growth`] - dynamic batch-size policies
//! - [`validator`] - validation metrics and stall aggregation
//! - [`reducer`] - distributed reduction and broadcast hooks
//! - [`snapshot`] - progress persistence next to checkpoints
//! - [`scheduler`] - the control loop tying it all together

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]
// Allow precision loss casts - acceptable when counters feed display math
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]

// Core vocabulary
pub mod error;
pub mod parameter;

// Configuration
pub mod config;

// Progress record and observers
pub mod state;

// Schedule policies
pub mod batch_growth;
pub mod divergence;
pub mod lr;

// Validation and distribution
pub mod reducer;
pub mod validator;

// Persistence
pub mod snapshot;

// The control loop
pub mod scheduler;

// Re-exports for convenient access
pub use config::{
    parse_stop_conditions, CostType, DecayStrategy, DivergenceConfig, SchedulerConfig,
    SchedulerConfigBuilder, StallAggregation,
};
pub use error::{ScheduleError, ScheduleResult};
pub use parameter::{SchedulingParameter, SchedulingUnit};
pub use reducer::{LocalReducer, Reducer};
pub use scheduler::{Scheduler, UpdateReport};
pub use state::{TrainingObserver, TrainingState, ValidatorRecord};
pub use validator::{ScoreTracker, Validator};

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```
/// use training_scheduler_rs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        CostType, DecayStrategy, DivergenceConfig, LocalReducer, Reducer, ScheduleError,
        ScheduleResult, Scheduler, SchedulerConfig, SchedulingParameter, SchedulingUnit,
        ScoreTracker, StallAggregation, TrainingObserver, TrainingState, UpdateReport, Validator,
        ValidatorRecord,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_builds_a_scheduler() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        let scheduler = Scheduler::new(config).unwrap();
        assert_eq!(scheduler.batches(), 0);
        assert!(scheduler.keep_going());
    }

    #[test]
    fn test_parameters_parse_with_units() {
        let p: SchedulingParameter = "16000u".parse().unwrap();
        assert_eq!(p, SchedulingParameter::updates(16_000));
        let p: SchedulingParameter = "10Mt".parse().unwrap();
        assert_eq!(p, SchedulingParameter::labels(10_000_000));
    }

    #[test]
    fn test_prelude_covers_the_loop_surface() {
        use crate::prelude::*;
        let config = SchedulerConfig::builder().after_batches(1).build();
        let mut scheduler = Scheduler::new(config).unwrap();
        scheduler
            .update(UpdateReport::new(10.0, 5.0, 2, 5))
            .unwrap();
        assert!(!scheduler.keep_going());
    }
}
