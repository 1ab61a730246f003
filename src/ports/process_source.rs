use async_trait::async_trait;

use crate::domain::ProcessStats;

/// Port for fetching per-process resource usage
#[async_trait]
pub trait ProcessSource: Send + Sync {
    /// Resource usage of a single process
    async fn process_stats(&self, pid: u32) -> Result<ProcessStats, Box<dyn std::error::Error + Send + Sync>>;
}
