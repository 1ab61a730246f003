use serde::{Deserialize, Serialize};

/// Host CPU utilisation over the last sampling interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuMetrics {
    pub usage_percent: f64,
    pub user_percent: f64,
    pub system_percent: f64,
    pub iowait_percent: f64,
}

impl CpuMetrics {
    pub fn new(usage_percent: f64, user_percent: f64, system_percent: f64) -> Self {
        Self {
            usage_percent,
            user_percent,
            system_percent,
            iowait_percent: 0.0,
        }
    }

    pub fn idle() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn with_iowait(mut self, iowait_percent: f64) -> Self {
        self.iowait_percent = iowait_percent;
        self
    }
}

/// Host memory usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemoryMetrics {
    pub fn new(used_bytes: u64, total_bytes: u64, available_bytes: u64) -> Self {
        Self {
            used_bytes,
            total_bytes,
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

/// Cumulative I/O counters of a process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoMetrics {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

impl IoMetrics {
    pub fn new(read_bytes: u64, write_bytes: u64) -> Self {
        Self {
            read_bytes,
            write_bytes,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }
}
