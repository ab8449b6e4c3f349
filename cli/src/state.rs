//! Durable monitor state.
//!
//! One small JSON file holds everything that must survive a restart:
//! the charge limit, the top-up flag, and the edge-detection fields.
//! Writes go through a temp file in the same directory followed by a
//! rename, so a crash at any point leaves either the old file or the
//! new one, never a torn write.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use chargecap_protocol::{AlertKind, MonitorSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The state file exists but is unparsable or holds out-of-range
    /// values. The caller falls back to defaults; this never stops the
    /// monitor, it only resets learned transition history.
    #[error("state file corrupt: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The monitor's durable fields. Mutated only by the threshold engine
/// inside the monitor loop, persisted write-through after every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorState {
    /// Charge limit percentage, 1-100.
    pub limit: u8,
    /// One-shot full-charge exception; clears itself at 100%.
    pub top_up_active: bool,
    /// Last alert fired, for edge detection.
    pub last_alert: AlertKind,
    /// Last observed charge percent.
    pub last_percent: u8,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            limit: 80,
            top_up_active: false,
            last_alert: AlertKind::None,
            last_percent: 0,
        }
    }
}

impl MonitorState {
    fn validate(&self) -> Result<(), StateError> {
        if self.limit < 1 || self.limit > 100 {
            return Err(StateError::Corrupt(format!(
                "limit {} outside 1-100",
                self.limit
            )));
        }
        if self.last_percent > 100 {
            return Err(StateError::Corrupt(format!(
                "last_percent {} outside 0-100",
                self.last_percent
            )));
        }
        Ok(())
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            limit: self.limit,
            top_up_active: self.top_up_active,
            last_alert: self.last_alert,
            last_percent: self.last_percent,
        }
    }
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state. A missing file is first-run, not an
    /// error; invalid content is reported as [`StateError::Corrupt`].
    pub fn load(&self) -> Result<MonitorState, StateError> {
        if !self.path.exists() {
            return Ok(MonitorState::default());
        }

        let content = fs::read_to_string(&self.path)?;
        let state: MonitorState =
            serde_json::from_str(&content).map_err(|e| StateError::Corrupt(e.to_string()))?;
        state.validate()?;
        Ok(state)
    }

    /// Load the persisted state, falling back to defaults when the file
    /// is corrupt or unreadable. Corruption only resets learned
    /// transition history, it must never stop the monitor.
    pub fn load_or_default(&self) -> MonitorState {
        match self.load() {
            Ok(state) => state,
            Err(StateError::Corrupt(reason)) => {
                warn!(reason, "State file corrupt, falling back to defaults");
                MonitorState::default()
            }
            Err(e) => {
                warn!(error = %e, "Failed to read state file, using defaults");
                MonitorState::default()
            }
        }
    }

    /// Persist the full state atomically: write a sibling temp file,
    /// then rename over the target.
    pub fn save(&self, state: &MonitorState) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string(state).map_err(|e| {
            StateError::Corrupt(e.to_string())
        })?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> StateStore {
        StateStore::new(dir.path().join("state.json"))
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let state = store_in(&tmp).load().unwrap();
        assert_eq!(state.limit, 80);
        assert!(!state.top_up_active);
        assert_eq!(state.last_alert, AlertKind::None);
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let state = MonitorState {
            limit: 90,
            top_up_active: true,
            last_alert: AlertKind::LimitReached,
            last_percent: 91,
        };
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);
    }

    #[test]
    fn test_unparsable_file_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load(), Err(StateError::Corrupt(_))));
    }

    #[test]
    fn test_wrong_types_are_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        fs::write(
            store.path(),
            r#"{"limit":"eighty","top_up_active":false,"last_alert":"none","last_percent":0}"#,
        )
        .unwrap();
        assert!(matches!(store.load(), Err(StateError::Corrupt(_))));
    }

    #[test]
    fn test_out_of_range_limit_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        fs::write(
            store.path(),
            r#"{"limit":150,"top_up_active":false,"last_alert":"none","last_percent":50}"#,
        )
        .unwrap();
        assert!(matches!(store.load(), Err(StateError::Corrupt(_))));

        fs::write(
            store.path(),
            r#"{"limit":0,"top_up_active":false,"last_alert":"none","last_percent":50}"#,
        )
        .unwrap();
        assert!(matches!(store.load(), Err(StateError::Corrupt(_))));
    }

    #[test]
    fn test_out_of_range_percent_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        fs::write(
            store.path(),
            r#"{"limit":80,"top_up_active":false,"last_alert":"none","last_percent":200}"#,
        )
        .unwrap();
        assert!(matches!(store.load(), Err(StateError::Corrupt(_))));
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        fs::write(
            store.path(),
            r#"{"limit":150,"top_up_active":true,"last_alert":"none","last_percent":50}"#,
        )
        .unwrap();

        let state = store.load_or_default();
        assert_eq!(state.limit, 80);
        assert!(!state.top_up_active);
        assert_eq!(state.last_alert, AlertKind::None);
    }

    #[test]
    fn test_interrupted_write_leaves_prior_file_readable() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let state = MonitorState::default();
        store.save(&state).unwrap();

        // Simulate a crash mid-write: a half-written temp file next to
        // a valid state file. Load must still succeed from the real
        // file, and the next save must replace it cleanly.
        let tmp_path = store.path().with_extension("json.tmp");
        fs::write(&tmp_path, "{\"limit\":9").unwrap();

        assert_eq!(store.load().unwrap(), state);

        let updated = MonitorState {
            limit: 85,
            ..state
        };
        store.save(&updated).unwrap();
        assert_eq!(store.load().unwrap(), updated);
        assert!(!tmp_path.exists());
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path().join("nested/dir/state.json"));
        store.save(&MonitorState::default()).unwrap();
        assert!(store.path().exists());
    }
}
