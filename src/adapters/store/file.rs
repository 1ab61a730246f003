use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::PersistedState;
use crate::error::PersistenceError;
use crate::ports::{CleanupReport, LoadOutcome, LoadSource, StateStore};

const STATE_FILE_NAME: &str = "supervisor_state.json";
const TEMP_FILE_NAME: &str = "supervisor_state.json.tmp";
const BACKUP_DIR_NAME: &str = "backups";
const BACKUP_PREFIX: &str = "supervisor_state_";
const MAX_BACKUP_ATTEMPTS: usize = 3;

/// JSON state file with timestamped backups.
///
/// Layout under `state_dir`:
/// - `supervisor_state.json` (current state)
/// - `backups/supervisor_state_<UTC timestamp>.json`
///
/// A save writes a temp file first, then moves the previous state into
/// `backups/` and renames the temp file into place, so a readable state exists
/// at every point.
#[derive(Debug, Clone)]
pub struct PersistenceManager {
    state_dir: PathBuf,
}

impl PersistenceManager {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE_NAME)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.state_dir.join(BACKUP_DIR_NAME)
    }

    /// Backups sorted newest first. The timestamp suffix sorts lexicographically.
    pub fn list_backups(&self) -> io::Result<Vec<PathBuf>> {
        let mut backups = Vec::new();
        for entry in fs::read_dir(self.backup_dir())? {
            let path = entry?.path();
            let is_backup = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(".json"));
            if is_backup {
                backups.push(path);
            }
        }
        backups.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        Ok(backups)
    }

    fn next_backup_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let dir = self.backup_dir();
        let mut path = dir.join(format!("{}{}.json", BACKUP_PREFIX, stamp));
        let mut n = 1;
        while path.exists() {
            path = dir.join(format!("{}{}_{}.json", BACKUP_PREFIX, stamp, n));
            n += 1;
        }
        path
    }

    fn read_state(path: &Path) -> Result<PersistedState, PersistenceError> {
        let content = fs::read(path).map_err(|e| PersistenceError::io(path, e))?;
        serde_json::from_slice(&content).map_err(|source| PersistenceError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    fn write_temp(&self, content: &[u8]) -> Result<PathBuf, PersistenceError> {
        let tmp = self.state_dir.join(TEMP_FILE_NAME);
        let mut file = File::create(&tmp).map_err(|e| PersistenceError::io(&tmp, e))?;
        file.write_all(content).map_err(|e| PersistenceError::io(&tmp, e))?;
        file.sync_all().map_err(|e| PersistenceError::io(&tmp, e))?;
        Ok(tmp)
    }
}

impl StateStore for PersistenceManager {
    fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        let backup_dir = self.backup_dir();
        fs::create_dir_all(&backup_dir).map_err(|e| PersistenceError::io(&backup_dir, e))?;

        let content = serde_json::to_vec_pretty(state).map_err(PersistenceError::Encode)?;
        let tmp = self.write_temp(&content)?;

        let primary = self.state_path();
        if primary.exists() {
            let backup = self.next_backup_path();
            fs::rename(&primary, &backup).map_err(|e| PersistenceError::io(&primary, e))?;
            debug!(backup = %backup.display(), "rotated previous state into backup");
        }

        fs::rename(&tmp, &primary).map_err(|e| PersistenceError::io(&primary, e))?;
        debug!(path = %primary.display(), "saved supervisor state");
        Ok(())
    }

    fn load(&self) -> LoadOutcome {
        let primary = self.state_path();
        match Self::read_state(&primary) {
            Ok(state) => {
                return LoadOutcome {
                    state,
                    source: LoadSource::Primary,
                }
            }
            Err(PersistenceError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                debug!(path = %primary.display(), "no state file found");
            }
            Err(e) => warn!(error = %e, "primary state file unreadable, trying backups"),
        }

        let backups = match self.list_backups() {
            Ok(backups) => backups,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(error = %e, "cannot list state backups");
                }
                Vec::new()
            }
        };

        for backup in backups.into_iter().take(MAX_BACKUP_ATTEMPTS) {
            match Self::read_state(&backup) {
                Ok(state) => {
                    info!(backup = %backup.display(), "recovered state from backup");
                    return LoadOutcome {
                        state,
                        source: LoadSource::Backup(backup),
                    };
                }
                Err(e) => warn!(error = %e, "state backup unreadable"),
            }
        }

        LoadOutcome {
            state: PersistedState::default(),
            source: LoadSource::Default,
        }
    }

    fn cleanup(&self, retention_days: u32) -> CleanupReport {
        let mut report = CleanupReport::default();
        let backups = match self.list_backups() {
            Ok(backups) => backups,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return report,
            Err(e) => {
                report.errors.push((self.backup_dir(), e.to_string()));
                return report;
            }
        };

        let retention = Duration::from_secs(u64::from(retention_days) * 24 * 3600);
        let Some(cutoff) = SystemTime::now().checked_sub(retention) else {
            return report;
        };

        for backup in backups {
            let modified = match fs::metadata(&backup).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    report.errors.push((backup, e.to_string()));
                    continue;
                }
            };
            if modified >= cutoff {
                continue;
            }
            match fs::remove_file(&backup) {
                Ok(()) => report.removed.push(backup),
                Err(e) => report.errors.push((backup, e.to_string())),
            }
        }

        if !report.removed.is_empty() {
            info!(removed = report.removed.len(), retention_days, "pruned old state backups");
        }
        for (path, error) in &report.errors {
            warn!(path = %path.display(), error = %error, "failed to prune state backup");
        }
        report
    }
}
