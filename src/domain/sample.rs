use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::IoMetrics;

/// One timestamped measurement taken by the resource monitor.
///
/// CPU, memory and disk describe the host; threads, file descriptors and I/O
/// describe the supervisor process itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub io: IoMetrics,
    pub thread_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_fds: Option<u64>,
}

impl ResourceSample {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            cpu_percent: 0.0,
            memory_bytes: 0,
            memory_percent: 0.0,
            disk_percent: 0.0,
            io: IoMetrics::zero(),
            thread_count: 0,
            open_fds: None,
        }
    }

    pub fn with_usage(mut self, cpu_percent: f64, memory_percent: f64, disk_percent: f64) -> Self {
        self.cpu_percent = cpu_percent;
        self.memory_percent = memory_percent;
        self.disk_percent = disk_percent;
        self
    }

    pub fn with_memory_bytes(mut self, memory_bytes: u64) -> Self {
        self.memory_bytes = memory_bytes;
        self
    }

    pub fn with_process(mut self, thread_count: u64, open_fds: Option<u64>, io: IoMetrics) -> Self {
        self.thread_count = thread_count;
        self.open_fds = open_fds;
        self.io = io;
        self
    }
}
