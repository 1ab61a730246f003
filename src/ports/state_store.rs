use std::path::PathBuf;

use crate::domain::PersistedState;
use crate::error::PersistenceError;

/// Where a loaded state came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    Primary,
    Backup(PathBuf),
    Default,
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub state: PersistedState,
    pub source: LoadSource,
}

/// Result of pruning old backups
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub errors: Vec<(PathBuf, String)>,
}

/// Port for durable supervisor state. Calls block on file I/O.
pub trait StateStore: Send + Sync {
    fn save(&self, state: &PersistedState) -> Result<(), PersistenceError>;

    /// Never fails: falls back to backups, then to a default state
    fn load(&self) -> LoadOutcome;

    fn cleanup(&self, retention_days: u32) -> CleanupReport;
}
