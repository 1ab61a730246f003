use std::fs;

use async_trait::async_trait;

use crate::domain::{IoMetrics, ProcessStats, RunState};
use crate::ports::ProcessSource;

use super::parser;
use super::ProcfsConfig;

/// USER_HZ on every mainstream Linux build
const CLOCK_TICKS_PER_SEC: f64 = 100.0;
const PAGE_SIZE: u64 = 4096;

/// Process source implementation using procfs
pub struct ProcfsProcessSource {
    config: ProcfsConfig,
}

impl ProcfsProcessSource {
    pub fn new(config: ProcfsConfig) -> Self {
        Self { config }
    }

    fn read_process(&self, pid: u32) -> Result<ProcessStats, Box<dyn std::error::Error + Send + Sync>> {
        let pid_path = self.config.proc_path.join(pid.to_string());

        let stat = parser::parse_proc_stat(&fs::read_to_string(pid_path.join("stat"))?)?;
        let status = parser::parse_proc_status(&fs::read_to_string(pid_path.join("status"))?)?;

        let cmdline_content = fs::read_to_string(pid_path.join("cmdline")).unwrap_or_default();
        let command = if cmdline_content.is_empty() {
            // Kernel threads and zombies have no cmdline
            fs::read_to_string(pid_path.join("comm"))
                .unwrap_or_else(|_| format!("[pid:{}]", pid))
                .trim()
                .to_string()
        } else {
            cmdline_content.replace('\0', " ").trim().to_string()
        };

        // Average CPU over the process lifetime
        let uptime = parser::parse_uptime(&fs::read_to_string(self.config.proc_path.join("uptime"))?)?;
        let started_secs = stat.starttime as f64 / CLOCK_TICKS_PER_SEC;
        let alive_secs = uptime - started_secs;
        let cpu_secs = (stat.utime + stat.stime) as f64 / CLOCK_TICKS_PER_SEC;
        let cpu_percent = if alive_secs > 0.0 {
            (cpu_secs / alive_secs) * 100.0
        } else {
            0.0
        };

        let memory_bytes = status.vm_rss_bytes.unwrap_or(stat.rss_pages * PAGE_SIZE);
        let meminfo = parser::parse_meminfo(&fs::read_to_string(self.config.proc_path.join("meminfo"))?)?;
        let memory_percent = match meminfo.get("MemTotal") {
            Some(&total) if total > 0 => (memory_bytes as f64 / total as f64) * 100.0,
            _ => 0.0,
        };

        // Both need the same uid or CAP_SYS_PTRACE; absence is not an error
        let open_fds = fs::read_dir(pid_path.join("fd"))
            .ok()
            .map(|entries| entries.count() as u64);
        let io = fs::read_to_string(pid_path.join("io"))
            .ok()
            .and_then(|content| parser::parse_proc_io(&content).ok())
            .unwrap_or_else(IoMetrics::zero);

        Ok(ProcessStats::new(pid, stat.ppid, command, RunState::from_char(stat.state))
            .with_metrics(cpu_percent, memory_percent, memory_bytes)
            .with_threads(status.threads.unwrap_or(stat.num_threads))
            .with_handles(open_fds, io))
    }
}

#[async_trait]
impl ProcessSource for ProcfsProcessSource {
    async fn process_stats(&self, pid: u32) -> Result<ProcessStats, Box<dyn std::error::Error + Send + Sync>> {
        self.read_process(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_proc() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let pid_dir = dir.path().join("77");
        fs::create_dir_all(pid_dir.join("fd")).unwrap();
        for fd in 0..3 {
            fs::write(pid_dir.join("fd").join(fd.to_string()), b"").unwrap();
        }
        fs::write(
            pid_dir.join("stat"),
            "77 (worker) S 1 77 77 0 -1 0 0 0 0 0 300 100 0 0 20 0 2 0 1000 0 512 0\n",
        )
        .unwrap();
        fs::write(pid_dir.join("status"), "Name:\tworker\nUid:\t0\t0\t0\t0\nVmRSS:\t2048 kB\nThreads:\t2\n").unwrap();
        fs::write(pid_dir.join("cmdline"), b"/usr/bin/worker\0--fast\0").unwrap();
        fs::write(pid_dir.join("io"), "read_bytes: 10\nwrite_bytes: 20\n").unwrap();
        fs::write(dir.path().join("uptime"), "50.00 10.00\n").unwrap();
        fs::write(dir.path().join("meminfo"), "MemTotal:       8192 kB\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn reads_stats_from_procfs_tree() {
        let dir = fake_proc();
        let source = ProcfsProcessSource::new(ProcfsConfig::new(dir.path()));

        let stats = source.process_stats(77).await.unwrap();
        assert_eq!(stats.ppid, 1);
        assert_eq!(stats.command, "/usr/bin/worker --fast");
        assert_eq!(stats.state, RunState::Sleeping);
        assert_eq!(stats.memory_bytes, 2048 * 1024);
        assert_eq!(stats.memory_percent, 25.0);
        assert_eq!(stats.thread_count, 2);
        assert_eq!(stats.open_fds, Some(3));
        assert_eq!(stats.io, IoMetrics::new(10, 20));
        // 4s of CPU over 40s alive
        assert!((stats.cpu_percent - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_pid_is_an_error() {
        let dir = fake_proc();
        let source = ProcfsProcessSource::new(ProcfsConfig::new(dir.path()));
        assert!(source.process_stats(78).await.is_err());
    }
}
