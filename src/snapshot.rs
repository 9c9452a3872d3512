//! Progress snapshots on disk.
//!
//! A snapshot is a pretty-printed JSON file carrying a format version, a
//! timestamp, and the complete [`TrainingState`]. It sits next to the
//! model checkpoint it belongs to: saving under base path `model` writes
//! `model.progress.json` plus `model.config.toml` with the resolved
//! configuration, so a run can always be reconstructed from its artifacts.
//!
//! Reading and parsing are split: in a distributed run only the main
//! process reads the file, broadcasts the raw text, and every process
//! parses the same bytes.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ScheduleError, ScheduleResult};
use crate::state::TrainingState;

/// Format version written into every snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Suffix appended to the checkpoint base path for the progress file.
pub const PROGRESS_SUFFIX: &str = ".progress.json";

/// Suffix appended to the checkpoint base path for the resolved
/// configuration.
pub const CONFIG_SUFFIX: &str = ".config.toml";

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    state: TrainingState,
}

/// Progress file path for a checkpoint base path.
#[must_use]
pub fn progress_path(base: &Path) -> PathBuf {
    append_suffix(base, PROGRESS_SUFFIX)
}

/// Resolved-configuration file path for a checkpoint base path.
#[must_use]
pub fn config_path(base: &Path) -> PathBuf {
    append_suffix(base, CONFIG_SUFFIX)
}

fn append_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Writes the state as a versioned snapshot next to the checkpoint.
///
/// # Errors
///
/// Returns [`ScheduleError::SnapshotIo`] when the file cannot be written.
pub fn write_progress(base: &Path, state: &TrainingState) -> ScheduleResult<()> {
    let path = progress_path(base);
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        saved_at: Utc::now(),
        state: state.clone(),
    };
    let json =
        serde_json::to_string_pretty(&snapshot).map_err(|e| ScheduleError::SnapshotFormat {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    fs::write(&path, json).map_err(|e| ScheduleError::SnapshotIo {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(())
}

/// Reads the snapshot text for a checkpoint base path, or `None` when no
/// snapshot exists (a fresh start, not an error).
///
/// # Errors
///
/// Returns [`ScheduleError::SnapshotIo`] for any failure other than the
/// file being absent.
pub fn read_progress(base: &Path) -> ScheduleResult<Option<String>> {
    let path = progress_path(base);
    match fs::read_to_string(&path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ScheduleError::SnapshotIo {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

/// Parses snapshot text produced by [`write_progress`].
///
/// `origin` names where the text came from, for error messages; on worker
/// processes that is the main process's path.
///
/// # Errors
///
/// Returns [`ScheduleError::SnapshotFormat`] for malformed text and
/// [`ScheduleError::SnapshotVersionMismatch`] for a snapshot written by an
/// incompatible version.
pub fn parse_progress(text: &str, origin: &Path) -> ScheduleResult<TrainingState> {
    let snapshot: Snapshot =
        serde_json::from_str(text).map_err(|e| ScheduleError::SnapshotFormat {
            path: origin.display().to_string(),
            reason: e.to_string(),
        })?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(ScheduleError::SnapshotVersionMismatch {
            found: snapshot.version,
            expected: SNAPSHOT_VERSION,
        });
    }
    Ok(snapshot.state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ValidatorRecord;
    use tempfile::TempDir;

    fn populated_state() -> TrainingState {
        let mut state = TrainingState::new(3e-4);
        state.epochs = 4;
        state.batches = 120_000;
        state.labels_total = 2_000_000_000;
        state.eta = 1.2e-4;
        state.factor = 0.5;
        state.stalled = 2;
        state.max_stalled = 3;
        state.main_validator = "cross-entropy".to_string();
        state.validators.insert(
            "cross-entropy".to_string(),
            ValidatorRecord {
                last_best: 2.41,
                stalled: 2,
            },
        );
        state
    }

    #[test]
    fn paths_extend_the_checkpoint_base() {
        let base = Path::new("run/model");
        assert_eq!(progress_path(base), Path::new("run/model.progress.json"));
        assert_eq!(config_path(base), Path::new("run/model.config.toml"));
    }

    #[test]
    fn snapshot_round_trip_preserves_state() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("model");
        let state = populated_state();

        write_progress(&base, &state).unwrap();
        let text = read_progress(&base).unwrap().expect("snapshot written");
        let restored = parse_progress(&text, &progress_path(&base)).unwrap();

        assert_eq!(restored, state);
    }

    #[test]
    fn missing_snapshot_is_a_fresh_start() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("model");
        assert!(read_progress(&base).unwrap().is_none());
    }

    #[test]
    fn corrupt_snapshot_is_a_format_error() {
        let base = Path::new("model");
        let err = parse_progress("{ not json", &progress_path(base)).unwrap_err();
        assert!(matches!(err, ScheduleError::SnapshotFormat { .. }));
    }

    #[test]
    fn future_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("model");
        write_progress(&base, &populated_state()).unwrap();

        let text = read_progress(&base)
            .unwrap()
            .unwrap()
            .replace(
                &format!("\"version\": {SNAPSHOT_VERSION}"),
                "\"version\": 999",
            );
        let err = parse_progress(&text, &progress_path(&base)).unwrap_err();
        assert!(matches!(
            err,
            ScheduleError::SnapshotVersionMismatch { found: 999, .. }
        ));
    }
}
