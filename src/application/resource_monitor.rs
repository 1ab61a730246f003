use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::adapters::SampleHistory;
use crate::config::SupervisorConfig;
use crate::domain::ResourceSample;
use crate::ports::{ProcessSource, SystemSource};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Outcome of the memory and handle growth analysis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeakReport {
    pub samples: usize,
    pub growth_mb_per_hour: f64,
    pub memory_leak: bool,
    /// Largest fd increase between two consecutive samples, when fds were counted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_handle_growth: Option<u64>,
    pub handle_leak: bool,
}

impl LeakReport {
    pub fn leak_detected(&self) -> bool {
        self.memory_leak || self.handle_leak
    }
}

/// Rolling usage compared against the captured baseline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradationReport {
    pub baseline_cpu: f64,
    pub baseline_memory: f64,
    pub rolling_cpu: f64,
    pub rolling_memory: f64,
    pub cpu_increase_percent: f64,
    pub memory_increase_percent: f64,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationReport {
    pub bytes_reclaimed: u64,
    pub samples_pruned: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Baseline {
    cpu: f64,
    memory: f64,
}

/// Samples host and supervisor usage into a bounded history and analyses it
pub struct ResourceMonitor {
    system_source: Arc<dyn SystemSource>,
    process_source: Arc<dyn ProcessSource>,
    history: SampleHistory,
    baseline: Mutex<Option<Baseline>>,
    self_pid: u32,
    disk_path: PathBuf,
    retention: Duration,
    leak_min_samples: usize,
    max_memory_growth_rate: f64,
    max_handle_growth: u64,
    baseline_samples: usize,
    rolling_window: usize,
    degradation_threshold: f64,
}

impl ResourceMonitor {
    pub fn new(
        config: &SupervisorConfig,
        system_source: Arc<dyn SystemSource>,
        process_source: Arc<dyn ProcessSource>,
    ) -> Self {
        Self {
            system_source,
            process_source,
            history: SampleHistory::new(config.history_size),
            baseline: Mutex::new(None),
            self_pid: std::process::id(),
            disk_path: config.state_dir.clone(),
            retention: config.metrics_retention(),
            leak_min_samples: config.leak_min_samples,
            max_memory_growth_rate: config.max_memory_growth_rate,
            max_handle_growth: config.max_handle_growth,
            baseline_samples: config.baseline_samples,
            rolling_window: config.rolling_window,
            degradation_threshold: config.performance_degradation_threshold,
        }
    }

    /// Collect one sample, append it to the history and prune expired samples
    pub async fn sample(&self) -> Result<ResourceSample, Box<dyn std::error::Error + Send + Sync>> {
        let (cpu, memory, disk) = tokio::try_join!(
            self.system_source.get_cpu_metrics(),
            self.system_source.get_memory_metrics(),
            self.system_source.get_disk_usage(&self.disk_path),
        )?;

        let now = Utc::now();
        let mut sample = ResourceSample::new(now)
            .with_usage(cpu.usage_percent, memory.usage_percent(), disk.usage_percent())
            .with_memory_bytes(memory.used_bytes);

        match self.process_source.process_stats(self.self_pid).await {
            Ok(own) => {
                sample = sample.with_process(own.thread_count, own.open_fds, own.io);
            }
            Err(e) => debug!(pid = self.self_pid, "own process stats unavailable: {}", e),
        }

        self.record(sample.clone());
        let pruned = self.history.prune_older_than(self.retention, now);
        if pruned > 0 {
            debug!(pruned, "expired samples pruned");
        }

        Ok(sample)
    }

    /// Append a sample taken elsewhere
    pub fn record(&self, sample: ResourceSample) {
        self.history.push(sample);
    }

    pub fn history(&self) -> Vec<ResourceSample> {
        self.history.snapshot()
    }

    pub fn latest(&self) -> Option<ResourceSample> {
        self.history.latest()
    }

    /// `None` until `leak_min_samples` samples exist.
    pub fn detect_leak(&self) -> Option<LeakReport> {
        let samples = self.history.snapshot();
        if samples.len() < self.leak_min_samples {
            return None;
        }

        let (first, last) = (samples.first()?, samples.last()?);
        let hours = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 3_600_000.0;
        let growth_mb = (last.memory_bytes as f64 - first.memory_bytes as f64) / BYTES_PER_MB;
        let growth_mb_per_hour = if hours > 0.0 { growth_mb / hours } else { 0.0 };

        let max_handle_growth = samples
            .windows(2)
            .filter_map(|pair| match (pair[0].open_fds, pair[1].open_fds) {
                (Some(before), Some(after)) => Some(after.saturating_sub(before)),
                _ => None,
            })
            .max();

        Some(LeakReport {
            samples: samples.len(),
            growth_mb_per_hour,
            memory_leak: growth_mb_per_hour > self.max_memory_growth_rate,
            max_handle_growth,
            handle_leak: max_handle_growth.is_some_and(|growth| growth > self.max_handle_growth),
        })
    }

    /// `None` until the baseline has been captured.
    pub fn detect_degradation(&self) -> Option<DegradationReport> {
        let samples = self.history.snapshot();
        let baseline = self.baseline_from(&samples)?;

        let skip = samples.len().saturating_sub(self.rolling_window);
        let rolling = &samples[skip..];
        let rolling_cpu = mean(rolling.iter().map(|s| s.cpu_percent));
        let rolling_memory = mean(rolling.iter().map(|s| s.memory_percent));

        // Near-idle baselines would turn noise into huge relative increases
        let increase = |current: f64, base: f64| (current - base) / base.max(1.0) * 100.0;
        let cpu_increase_percent = increase(rolling_cpu, baseline.cpu);
        let memory_increase_percent = increase(rolling_memory, baseline.memory);

        Some(DegradationReport {
            baseline_cpu: baseline.cpu,
            baseline_memory: baseline.memory,
            rolling_cpu,
            rolling_memory,
            cpu_increase_percent,
            memory_increase_percent,
            degraded: cpu_increase_percent > self.degradation_threshold
                || memory_increase_percent > self.degradation_threshold,
        })
    }

    /// Release buffer memory held by the monitor. Best effort.
    pub async fn optimize(&self) -> OptimizationReport {
        let rss_before = self.own_rss().await;
        let samples_pruned = self.history.prune_older_than(self.retention, Utc::now());
        let compacted = self.history.compact() as u64;
        let rss_after = self.own_rss().await;

        let rss_delta = match (rss_before, rss_after) {
            (Some(before), Some(after)) => before.saturating_sub(after),
            _ => 0,
        };
        let report = OptimizationReport {
            bytes_reclaimed: rss_delta.max(compacted),
            samples_pruned,
        };
        info!(
            bytes_reclaimed = report.bytes_reclaimed,
            samples_pruned = report.samples_pruned,
            "memory optimization finished"
        );
        report
    }

    async fn own_rss(&self) -> Option<u64> {
        self.process_source
            .process_stats(self.self_pid)
            .await
            .ok()
            .map(|stats| stats.memory_bytes)
    }

    fn baseline_from(&self, samples: &[ResourceSample]) -> Option<Baseline> {
        let mut baseline = self.baseline.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if baseline.is_none() && samples.len() >= self.baseline_samples {
            let first = &samples[..self.baseline_samples];
            let captured = Baseline {
                cpu: mean(first.iter().map(|s| s.cpu_percent)),
                memory: mean(first.iter().map(|s| s.memory_percent)),
            };
            info!(cpu = captured.cpu, memory = captured.memory, "performance baseline captured");
            *baseline = Some(captured);
        }
        *baseline
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration as ChronoDuration};

    use super::*;
    use crate::domain::{IoMetrics, ProcessStats, RunState};
    use crate::testing::{FakeProcessSource, FakeSystemSource};

    fn monitor(config: &SupervisorConfig) -> (ResourceMonitor, Arc<FakeSystemSource>, Arc<FakeProcessSource>) {
        let system = Arc::new(FakeSystemSource::new());
        let processes = Arc::new(FakeProcessSource::new());
        let monitor = ResourceMonitor::new(config, system.clone(), processes.clone());
        (monitor, system, processes)
    }

    fn linear_memory(monitor: &ResourceMonitor, count: usize, mb_per_hour: f64) {
        let start = DateTime::<Utc>::UNIX_EPOCH + ChronoDuration::days(20_000);
        let per_minute = mb_per_hour / 60.0 * BYTES_PER_MB;
        for i in 0..count {
            let sample = ResourceSample::new(start + ChronoDuration::minutes(i as i64))
                .with_memory_bytes(500 * 1024 * 1024 + (per_minute * i as f64) as u64);
            monitor.record(sample);
        }
    }

    #[test]
    fn leak_is_flagged_at_fifteen_mb_per_hour() {
        let config = SupervisorConfig::default();
        let (monitor, _, _) = monitor(&config);
        linear_memory(&monitor, 30, 15.0);

        let report = monitor.detect_leak().unwrap();
        assert!((report.growth_mb_per_hour - 15.0).abs() < 0.1);
        assert!(report.leak_detected());
    }

    #[test]
    fn five_mb_per_hour_is_not_a_leak() {
        let config = SupervisorConfig::default();
        let (monitor, _, _) = monitor(&config);
        linear_memory(&monitor, 30, 5.0);

        let report = monitor.detect_leak().unwrap();
        assert!(!report.leak_detected());
    }

    #[test]
    fn leak_detection_waits_for_minimum_samples() {
        let config = SupervisorConfig::default();
        let (monitor, _, _) = monitor(&config);
        linear_memory(&monitor, 29, 100.0);
        assert!(monitor.detect_leak().is_none());
    }

    #[test]
    fn handle_jump_between_consecutive_samples_is_a_leak() {
        let config = SupervisorConfig::default();
        let (monitor, _, _) = monitor(&config);
        let start = Utc::now();
        for i in 0..30u64 {
            let fds = if i < 20 { 10 } else { 200 };
            monitor.record(
                ResourceSample::new(start + ChronoDuration::seconds(i as i64))
                    .with_memory_bytes(1 << 30)
                    .with_process(4, Some(fds), IoMetrics::zero()),
            );
        }

        let report = monitor.detect_leak().unwrap();
        assert!(!report.memory_leak);
        assert_eq!(report.max_handle_growth, Some(190));
        assert!(report.handle_leak);
    }

    #[test]
    fn degradation_compares_rolling_mean_to_captured_baseline() {
        let config = SupervisorConfig::default();
        let (monitor, _, _) = monitor(&config);
        let start = Utc::now();
        for i in 0..50 {
            monitor.record(ResourceSample::new(start + ChronoDuration::seconds(i)).with_usage(20.0, 40.0, 10.0));
        }

        let report = monitor.detect_degradation().unwrap();
        assert!(!report.degraded);
        assert_eq!(report.baseline_cpu, 20.0);

        for i in 50..60 {
            monitor.record(ResourceSample::new(start + ChronoDuration::seconds(i)).with_usage(35.0, 40.0, 10.0));
        }
        let report = monitor.detect_degradation().unwrap();
        assert_eq!(report.rolling_cpu, 35.0);
        assert!((report.cpu_increase_percent - 75.0).abs() < 1e-9);
        assert!(report.degraded);
        // Captured once; later samples never move it
        assert_eq!(report.baseline_cpu, 20.0);
    }

    #[test]
    fn degradation_needs_a_baseline_first() {
        let config = SupervisorConfig::default();
        let (monitor, _, _) = monitor(&config);
        for _ in 0..49 {
            monitor.record(ResourceSample::new(Utc::now()).with_usage(90.0, 90.0, 10.0));
        }
        assert!(monitor.detect_degradation().is_none());
    }

    #[tokio::test]
    async fn sample_combines_host_and_own_process_usage() {
        let config = SupervisorConfig::default();
        let (monitor, system, processes) = monitor(&config);
        system.set_usage(42.0, 60.0, 30.0);
        processes.insert(
            ProcessStats::new(std::process::id(), 1, "vigil".to_string(), RunState::Running)
                .with_threads(6)
                .with_handles(Some(17), IoMetrics::new(1, 2)),
        );

        let sample = monitor.sample().await.unwrap();
        assert_eq!(sample.cpu_percent, 42.0);
        assert!((sample.memory_percent - 60.0).abs() < 1e-9);
        assert!((sample.disk_percent - 30.0).abs() < 1e-9);
        assert_eq!(sample.thread_count, 6);
        assert_eq!(sample.open_fds, Some(17));
        assert_eq!(monitor.history().len(), 1);
    }

    #[tokio::test]
    async fn sample_fails_when_host_metrics_are_unavailable() {
        let config = SupervisorConfig::default();
        let (monitor, system, _) = monitor(&config);
        system.fail(true);

        assert!(monitor.sample().await.is_err());
        assert!(monitor.history().is_empty());
    }

    #[tokio::test]
    async fn optimize_reports_reclaimed_bytes() {
        let config = SupervisorConfig::default();
        let (monitor, _, _) = monitor(&config);
        linear_memory(&monitor, 10, 1.0);

        let report = monitor.optimize().await;
        // The synthetic samples are far older than the retention window
        assert_eq!(report.samples_pruned, 10);
        assert!(monitor.history().is_empty());
    }
}
