use std::path::Path;

use async_trait::async_trait;

use crate::domain::{CpuMetrics, DiskUsage, MemoryMetrics};

/// Port for fetching host-level resource usage
#[async_trait]
pub trait SystemSource: Send + Sync {
    /// CPU utilisation since the previous call
    async fn get_cpu_metrics(&self) -> Result<CpuMetrics, Box<dyn std::error::Error + Send + Sync>>;

    /// Memory usage of the host
    async fn get_memory_metrics(&self) -> Result<MemoryMetrics, Box<dyn std::error::Error + Send + Sync>>;

    /// Usage of the filesystem holding `path`
    async fn get_disk_usage(&self, path: &Path) -> Result<DiskUsage, Box<dyn std::error::Error + Send + Sync>>;
}
