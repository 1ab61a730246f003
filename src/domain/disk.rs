use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Filesystem usage for the mount holding a path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub path: PathBuf,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
}

impl DiskUsage {
    pub fn new(path: PathBuf, total_bytes: u64, used_bytes: u64, available_bytes: u64) -> Self {
        Self {
            path,
            total_bytes,
            used_bytes,
            available_bytes,
        }
    }

    pub fn usage_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.used_bytes as f64 / self.total_bytes as f64) * 100.0
    }
}
