//! Snapshot save/restore behavior across scheduler restarts.

use std::path::PathBuf;

use tempfile::TempDir;
use training_scheduler_rs::prelude::*;

const EPSILON: f64 = 1e-9;

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn report() -> UpdateReport {
    UpdateReport::new(200.0, 100.0, 16, 100).with_gradient_norm(1.5)
}

fn checkpoint_base(dir: &TempDir) -> PathBuf {
    dir.path().join("model")
}

/// Minimizing validator replaying a fixed score sequence.
struct ScriptedValidator {
    name: &'static str,
    tracker: ScoreTracker,
    scores: Vec<f64>,
    next: usize,
}

impl ScriptedValidator {
    fn new(name: &'static str, scores: Vec<f64>) -> Self {
        Self {
            name,
            tracker: ScoreTracker::minimizing(),
            scores,
            next: 0,
        }
    }
}

impl Validator for ScriptedValidator {
    fn metric_name(&self) -> &str {
        self.name
    }

    fn validate(&mut self, _state: &TrainingState) -> f64 {
        let score = self.scores[self.next.min(self.scores.len() - 1)];
        self.next += 1;
        self.tracker.record(score);
        score
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

fn warmup_config() -> SchedulerConfig {
    SchedulerConfig::builder()
        .learn_rate(1.0)
        .lr_warmup(SchedulingParameter::updates(100))
        .valid_freq(SchedulingParameter::updates(10))
        .disp_freq(SchedulingParameter::updates(7))
        .build()
}

#[test]
fn test_restored_run_tracks_the_original_exactly() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let base = checkpoint_base(&dir);

    // Run A: stop mid-warmup, mid-display-window, off every cadence.
    let mut original = Scheduler::new(warmup_config()).unwrap();
    for _ in 0..37 {
        original.update(report()).unwrap();
    }
    original.save(&base).unwrap();

    // Run B: fresh process, restore, then drive both runs identically.
    let mut restored = Scheduler::new(warmup_config()).unwrap();
    restored.load(&base).unwrap();
    assert_eq!(restored.batches(), 37);
    assert!(approx_eq(restored.state().eta, original.state().eta));

    for _ in 0..13 {
        original.update(report()).unwrap();
        restored.update(report()).unwrap();
    }

    // Same counters, same rate, same cadence phase, same statistics.
    assert_eq!(restored.state(), original.state());
    assert!(approx_eq(restored.state().eta, 0.5));
}

#[test]
fn test_reload_warmup_restart_takes_effect_on_the_next_update() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let base = checkpoint_base(&dir);

    let mut config = warmup_config();
    config.lr_warmup_at_reload = true;

    let mut original = Scheduler::new(config.clone()).unwrap();
    for _ in 0..200 {
        original.update(report()).unwrap();
    }
    assert!(approx_eq(original.state().eta, 1.0));
    original.save(&base).unwrap();

    let mut restored = Scheduler::new(config).unwrap();
    restored.load(&base).unwrap();

    // The first update after the reload moves the ramp origin; the rate it
    // computes still reflects the old ramp.
    restored.update(report()).unwrap();
    assert_eq!(restored.state().warmup_start, SchedulingParameter::updates(201));
    assert!(approx_eq(restored.state().eta, 1.0));

    // From the second update on, the rate climbs from the bottom again.
    restored.update(report()).unwrap();
    assert!(approx_eq(restored.state().eta, 0.01));
}

#[test]
fn test_reload_under_a_different_warmup_unit_is_rejected() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let base = checkpoint_base(&dir);

    // Run A restarts its ramp on the first update, anchoring the warmup in
    // updates, and saves that anchor.
    let mut config = warmup_config();
    config.lr_warmup_at_reload = true;
    let mut original = Scheduler::new(config).unwrap();
    for _ in 0..150 {
        original.update(report()).unwrap();
    }
    assert!(original.state().warmup_start.is_set());
    original.save(&base).unwrap();

    // Run B measures its warmup in labels; the saved updates anchor has no
    // meaning on that scale.
    let mut relabeled = warmup_config();
    relabeled.lr_warmup = SchedulingParameter::labels(100_000);
    let mut restored = Scheduler::new(relabeled).unwrap();
    let err = restored.load(&base).unwrap_err();
    assert!(matches!(err, ScheduleError::WarmupUnitMismatch { .. }));

    // The rejected snapshot was not installed.
    assert_eq!(restored.batches(), 0);
}

#[test]
fn test_no_restore_corpus_clears_the_data_pass() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let base = checkpoint_base(&dir);

    let mut original = Scheduler::new(warmup_config()).unwrap();
    for _ in 0..25 {
        original.update(report()).unwrap();
    }
    original.save(&base).unwrap();

    let mut config = warmup_config();
    config.no_restore_corpus = true;
    let mut restored = Scheduler::new(config).unwrap();
    restored.load(&base).unwrap();

    // The data pass restarts; overall progress does not.
    assert_eq!(restored.state().samples_epoch, 0);
    assert!(approx_eq(restored.state().cost_sum, 0.0));
    assert_eq!(restored.state().updates_disp, 0);
    assert_eq!(restored.batches(), 25);
    assert_eq!(restored.state().labels_total, 2500);
}

#[test]
fn test_valid_reset_all_reseeds_best_scores() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let base = checkpoint_base(&dir);

    let mut original = Scheduler::new(warmup_config()).unwrap();
    original.add_validator(Box::new(ScriptedValidator::new(
        "cross-entropy",
        vec![2.0, 2.0],
    )));
    for _ in 0..10 {
        original.update(report()).unwrap();
    }
    original.validate(false); // new best: 2.0
    for _ in 0..10 {
        original.update(report()).unwrap();
    }
    original.validate(false); // stalled once
    assert_eq!(original.state().stalled, 1);
    original.save(&base).unwrap();

    // Restart against a different validation set: everything resets.
    let mut config = warmup_config();
    config.valid_reset_all = true;
    let mut restored = Scheduler::new(config).unwrap();
    restored.add_validator(Box::new(ScriptedValidator::new("cross-entropy", vec![5.0])));
    restored.load(&base).unwrap();

    assert_eq!(restored.state().stalled, 0);
    let record = &restored.state().validators["cross-entropy"];
    assert_eq!(record.stalled, 0);
    assert_eq!(record.last_best, f64::MAX);

    // A score far worse than the forgotten best still counts as new best.
    for _ in 0..10 {
        restored.update(report()).unwrap();
    }
    restored.validate(false);
    let record = &restored.state().validators["cross-entropy"];
    assert!(approx_eq(record.last_best, 5.0));
    assert_eq!(record.stalled, 0);
}

#[test]
fn test_saved_config_is_readable_next_to_the_snapshot() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let base = checkpoint_base(&dir);

    let config = warmup_config();
    let scheduler = Scheduler::new(config.clone()).unwrap();
    scheduler.save(&base).unwrap();

    let config_path = dir.path().join("model.config.toml");
    let reloaded = SchedulerConfig::from_file(&config_path).unwrap();
    assert_eq!(reloaded, config);
}

#[test]
fn test_loading_without_a_snapshot_is_a_fresh_start() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let base = checkpoint_base(&dir);

    let mut scheduler = Scheduler::new(warmup_config()).unwrap();
    scheduler.load(&base).unwrap();
    assert_eq!(scheduler.batches(), 0);
    assert!(scheduler.state().loaded);

    // The restored-at-this-progress marker clears on the next update.
    scheduler.update(report()).unwrap();
    assert!(!scheduler.state().loaded);
}
