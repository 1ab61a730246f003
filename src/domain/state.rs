use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SupervisorConfig;

/// Supervisor state written to disk for crash recovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub timestamp: DateTime<Utc>,
    pub restart_count: u64,
    pub error_count: u64,
    pub was_running: bool,
    #[serde(default)]
    pub managed_process_pids: BTreeMap<String, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_snapshot: Option<SupervisorConfig>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            restart_count: 0,
            error_count: 0,
            was_running: false,
            managed_process_pids: BTreeMap::new(),
            config_snapshot: None,
        }
    }
}
