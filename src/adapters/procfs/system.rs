use std::fs;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{CpuMetrics, DiskUsage, MemoryMetrics};
use crate::ports::SystemSource;

use super::parser::{self, CpuStat};
use super::ProcfsConfig;

/// System source implementation using procfs and statvfs
pub struct ProcfsSystemSource {
    config: ProcfsConfig,
    last_cpu_stat: Mutex<Option<CpuStat>>,
}

impl ProcfsSystemSource {
    pub fn new(config: ProcfsConfig) -> Self {
        Self {
            config,
            last_cpu_stat: Mutex::new(None),
        }
    }

    fn calculate_cpu_metrics(current: &CpuStat, previous: Option<&CpuStat>) -> CpuMetrics {
        let Some(prev) = previous else {
            // First call has no delta to compare against
            return CpuMetrics::idle();
        };

        let total_delta = current.total().saturating_sub(prev.total());
        if total_delta == 0 {
            return CpuMetrics::idle();
        }

        let user_delta = current.user.saturating_sub(prev.user) + current.nice.saturating_sub(prev.nice);
        let system_delta = current.system.saturating_sub(prev.system)
            + current.irq.saturating_sub(prev.irq)
            + current.softirq.saturating_sub(prev.softirq);
        let iowait_delta = current.iowait.saturating_sub(prev.iowait);
        let busy_delta = current.busy().saturating_sub(prev.busy());

        let percent = |delta: u64| (delta as f64 / total_delta as f64) * 100.0;

        CpuMetrics::new(percent(busy_delta), percent(user_delta), percent(system_delta))
            .with_iowait(percent(iowait_delta))
    }
}

#[async_trait]
impl SystemSource for ProcfsSystemSource {
    async fn get_cpu_metrics(&self) -> Result<CpuMetrics, Box<dyn std::error::Error + Send + Sync>> {
        let stat_path = self.config.proc_path.join("stat");
        let stat_content = fs::read_to_string(&stat_path)?;
        let current_stat = parser::parse_cpu_stat(&stat_content)?;

        let mut last_stat = self
            .last_cpu_stat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let metrics = Self::calculate_cpu_metrics(&current_stat, last_stat.as_ref());
        *last_stat = Some(current_stat);

        Ok(metrics)
    }

    async fn get_memory_metrics(&self) -> Result<MemoryMetrics, Box<dyn std::error::Error + Send + Sync>> {
        let meminfo_path = self.config.proc_path.join("meminfo");
        let meminfo_content = fs::read_to_string(&meminfo_path)?;
        let meminfo = parser::parse_meminfo(&meminfo_content)?;

        let total = *meminfo
            .get("MemTotal")
            .ok_or_else(|| parser::ParseError::MissingField("MemTotal".to_string()))?;
        let available = match meminfo.get("MemAvailable") {
            Some(available) => *available,
            // Kernels before 3.14 lack MemAvailable
            None => {
                meminfo.get("MemFree").copied().unwrap_or(0)
                    + meminfo.get("Cached").copied().unwrap_or(0)
                    + meminfo.get("Buffers").copied().unwrap_or(0)
            }
        };

        let used = total.saturating_sub(available);
        Ok(MemoryMetrics::new(used, total, available))
    }

    async fn get_disk_usage(&self, path: &Path) -> Result<DiskUsage, Box<dyn std::error::Error + Send + Sync>> {
        // The state directory may not exist yet; measure the closest existing ancestor
        let target = path
            .ancestors()
            .find(|p| p.exists())
            .unwrap_or_else(|| Path::new("/"));

        let stat = nix::sys::statvfs::statvfs(target)?;
        let block_size = stat.fragment_size() as u64;
        let total_bytes = stat.blocks() as u64 * block_size;
        let available_bytes = stat.blocks_available() as u64 * block_size;
        let free_bytes = stat.blocks_free() as u64 * block_size;
        let used_bytes = total_bytes.saturating_sub(free_bytes);

        Ok(DiskUsage::new(path.to_path_buf(), total_bytes, used_bytes, available_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_cpu_reading_reports_idle() {
        let current = CpuStat {
            user: 100,
            idle: 100,
            ..Default::default()
        };
        let metrics = ProcfsSystemSource::calculate_cpu_metrics(&current, None);
        assert_eq!(metrics.usage_percent, 0.0);
    }

    #[test]
    fn cpu_usage_is_computed_from_deltas() {
        let previous = CpuStat {
            user: 100,
            system: 100,
            idle: 800,
            ..Default::default()
        };
        let current = CpuStat {
            user: 150,
            system: 125,
            idle: 825,
            ..Default::default()
        };

        let metrics = ProcfsSystemSource::calculate_cpu_metrics(&current, Some(&previous));
        assert_eq!(metrics.usage_percent, 75.0);
        assert_eq!(metrics.user_percent, 50.0);
        assert_eq!(metrics.system_percent, 25.0);
    }

    #[tokio::test]
    async fn reads_memory_from_meminfo() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("meminfo"),
            "MemTotal:       1000 kB\nMemFree:         100 kB\nMemAvailable:    250 kB\n",
        )
        .unwrap();

        let source = ProcfsSystemSource::new(ProcfsConfig::new(dir.path()));
        let memory = source.get_memory_metrics().await.unwrap();
        assert_eq!(memory.total_bytes, 1000 * 1024);
        assert_eq!(memory.available_bytes, 250 * 1024);
        assert_eq!(memory.usage_percent(), 75.0);
    }

    #[tokio::test]
    async fn disk_usage_of_missing_path_uses_existing_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let source = ProcfsSystemSource::new(ProcfsConfig::new("/proc"));

        let usage = source
            .get_disk_usage(&dir.path().join("not/yet/created"))
            .await
            .unwrap();
        assert!(usage.total_bytes > 0);
        assert!(usage.usage_percent() <= 100.0);
    }
}
