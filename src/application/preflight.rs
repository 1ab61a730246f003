use std::fs;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::SupervisorConfig;
use crate::ports::SystemSource;

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("only {available_mb} MB of memory available, {required_mb} MB required")]
    InsufficientMemory { available_mb: u64, required_mb: u64 },

    #[error("only {available_mb} MB free on the filesystem holding {path}, {required_mb} MB required")]
    InsufficientDisk {
        path: String,
        available_mb: u64,
        required_mb: u64,
    },

    #[error("cannot read system metrics: {0}")]
    Metrics(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub available_memory_mb: u64,
    pub available_disk_mb: u64,
    pub warnings: Vec<String>,
}

/// Startup checks run before any worker is spawned.
pub async fn run(config: &SupervisorConfig, system: &dyn SystemSource) -> Result<PreflightReport, PreflightError> {
    let memory = system
        .get_memory_metrics()
        .await
        .map_err(|e| PreflightError::Metrics(e.to_string()))?;
    let available_memory_mb = memory.available_bytes / BYTES_PER_MB;
    if available_memory_mb < config.min_free_memory_mb {
        return Err(PreflightError::InsufficientMemory {
            available_mb: available_memory_mb,
            required_mb: config.min_free_memory_mb,
        });
    }

    let disk = system
        .get_disk_usage(&config.state_dir)
        .await
        .map_err(|e| PreflightError::Metrics(e.to_string()))?;
    let available_disk_mb = disk.available_bytes / BYTES_PER_MB;
    if available_disk_mb < config.min_free_disk_mb {
        return Err(PreflightError::InsufficientDisk {
            path: config.state_dir.display().to_string(),
            available_mb: available_disk_mb,
            required_mb: config.min_free_disk_mb,
        });
    }

    let mut warnings = Vec::new();
    if let Err(e) = probe_writable(&config.state_dir) {
        let message = format!(
            "state directory {} is not writable ({}); state will only be kept in memory",
            config.state_dir.display(),
            e
        );
        warn!("{}", message);
        warnings.push(message);
    }

    info!(available_memory_mb, available_disk_mb, "preflight checks passed");
    Ok(PreflightReport {
        available_memory_mb,
        available_disk_mb,
        warnings,
    })
}

fn probe_writable(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let probe = dir.join(".vigil-write-test");
    fs::write(&probe, b"ok")?;
    fs::remove_file(&probe)
}
