use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::domain::{
    DegradationStep, FailureReason, HealthCheckOutcome, HealthIssues, HealthSnapshot, MonitoringFeature,
    PersistedState, ProcessSpec, ProcessState, ProcessStatus, RestartStrategy,
};
use crate::error::{PersistenceError, SupervisorError};
use crate::ports::{
    ChildHandle, HealthCheck, HealthCheckError, LoadSource, Notifier, ProcessLauncher, ProcessSource,
    StateStore, StopSignal,
};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats};
use super::degradation::DegradationController;
use super::health::HealthAggregator;
use super::resource_monitor::ResourceMonitor;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);
const ORPHAN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Mutable part of a registry entry, guarded by the entry's async lock
struct ManagedProcess {
    spec: ProcessSpec,
    strategy: RestartStrategy,
    state: ProcessState,
    child: Option<Box<dyn ChildHandle>>,
    pid: Option<u32>,
    restart_count: u32,
    started_at: Option<DateTime<Utc>>,
    health_check: Option<Arc<dyn HealthCheck>>,
    consecutive_failures: u32,
    last_health_check: Option<HealthCheckOutcome>,
    last_probe: Instant,
    last_failure: Option<FailureReason>,
    retries_exhausted: bool,
}

impl ManagedProcess {
    fn status(&self) -> ProcessStatus {
        ProcessStatus {
            name: self.spec.name.clone(),
            state: self.state,
            pid: self.pid,
            restart_count: self.restart_count,
            priority: self.spec.priority,
            essential: self.spec.essential,
            started_at: self.started_at,
            last_health_check: self.last_health_check.clone(),
            last_failure: self.last_failure.clone(),
            retries_exhausted: self.retries_exhausted,
        }
    }
}

struct RegistryEntry {
    name: String,
    process: tokio::sync::Mutex<ManagedProcess>,
    /// Last published view; readable without waiting on `process`
    status: RwLock<ProcessStatus>,
    breaker: Arc<CircuitBreaker>,
    monitored: AtomicBool,
}

impl RegistryEntry {
    fn publish(&self, process: &ManagedProcess) {
        *self.status.write().unwrap_or_else(|p| p.into_inner()) = process.status();
    }

    fn status(&self) -> ProcessStatus {
        self.status.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn transition(&self, process: &mut ManagedProcess, next: ProcessState) -> bool {
        let from = process.state;
        if !from.can_transition_to(next) {
            warn!(process = %self.name, from = %from, to = %next, "illegal state transition ignored");
            return false;
        }
        process.state = next;
        info!(process = %self.name, from = %from, to = %next, "process state changed");
        self.publish(process);
        true
    }

    fn is_replaceable(&self) -> bool {
        let state = self.status().state;
        matches!(state, ProcessState::Stopped | ProcessState::Failed) && !self.monitored.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Continue,
    Finished,
}

/// Effective operating mode after degradation steps
#[derive(Debug, Clone)]
struct RuntimeMode {
    config: Arc<SupervisorConfig>,
    disabled: HashSet<MonitoringFeature>,
    emergency: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DegradationStatus {
    pub applied_steps: Vec<DegradationStep>,
    pub pending_steps: Vec<DegradationStep>,
    pub disabled_features: Vec<MonitoringFeature>,
    pub emergency_mode: bool,
    pub check_interval: f64,
    pub health_check_interval: f64,
    pub metrics_collection_interval: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub source: String,
    pub unclean_shutdown: bool,
    pub restored_restart_count: u64,
    pub restored_error_count: u64,
    pub orphans_terminated: Vec<String>,
}

/// Collaborators the supervisor drives
pub struct SupervisorDeps {
    pub launcher: Arc<dyn ProcessLauncher>,
    pub process_source: Arc<dyn ProcessSource>,
    pub store: Arc<dyn StateStore>,
    pub monitor: ResourceMonitor,
    pub notifier: Option<Arc<dyn Notifier>>,
}

/// Keeps managed processes alive and reacts to host health.
///
/// One monitor task runs per process and one sampling task runs for the host.
/// Every decision about a process is taken while holding that process's lock.
pub struct ProcessSupervisor {
    config: Arc<SupervisorConfig>,
    runtime: RwLock<RuntimeMode>,
    launcher: Arc<dyn ProcessLauncher>,
    process_source: Arc<dyn ProcessSource>,
    store: Arc<dyn StateStore>,
    monitor: ResourceMonitor,
    aggregator: HealthAggregator,
    degradation: Mutex<DegradationController>,
    notifier: Option<Arc<dyn Notifier>>,
    webhook_breaker: Arc<CircuitBreaker>,
    registry: RwLock<HashMap<String, Arc<RegistryEntry>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    latest_snapshot: RwLock<Option<HealthSnapshot>>,
    sequence: AtomicU64,
    restart_total: AtomicU64,
    error_count: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    shutdown_started: AtomicBool,
    shutdown_done: watch::Sender<bool>,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig, deps: SupervisorDeps) -> Self {
        let config = Arc::new(config);
        let breaker_config = CircuitBreakerConfig::from_supervisor(&config);
        Self {
            runtime: RwLock::new(RuntimeMode {
                config: config.clone(),
                disabled: HashSet::new(),
                emergency: false,
            }),
            launcher: deps.launcher,
            process_source: deps.process_source,
            store: deps.store,
            monitor: deps.monitor,
            aggregator: HealthAggregator::new(&config),
            degradation: Mutex::new(DegradationController::new(config.degradation_steps.clone())),
            notifier: deps.notifier,
            webhook_breaker: Arc::new(CircuitBreaker::new("webhook", breaker_config)),
            registry: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            latest_snapshot: RwLock::new(None),
            sequence: AtomicU64::new(0),
            restart_total: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            shutdown_tx: watch::channel(false).0,
            shutdown_started: AtomicBool::new(false),
            shutdown_done: watch::channel(false).0,
            config,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Spawn a worker and start monitoring it.
    ///
    /// A spawn failure keeps the entry as `Failed`; the monitor task retries it
    /// when auto-restart is enabled.
    pub async fn start(
        self: &Arc<Self>,
        spec: ProcessSpec,
        health_check: Option<Arc<dyn HealthCheck>>,
    ) -> Result<ProcessStatus, SupervisorError> {
        if self.is_shutting_down() {
            return Err(SupervisorError::ShuttingDown);
        }
        if spec.name.trim().is_empty() {
            return Err(SupervisorError::InvalidProcess {
                name: spec.name,
                reason: "name must not be empty".to_string(),
            });
        }
        if spec.command.trim().is_empty() {
            return Err(SupervisorError::InvalidProcess {
                name: spec.name,
                reason: "command must not be empty".to_string(),
            });
        }

        let name = spec.name.clone();
        let process = ManagedProcess {
            strategy: spec.restart.unwrap_or_else(|| self.config.restart_strategy()),
            spec,
            state: ProcessState::Starting,
            child: None,
            pid: None,
            restart_count: 0,
            started_at: None,
            health_check,
            consecutive_failures: 0,
            last_health_check: None,
            last_probe: Instant::now(),
            last_failure: None,
            retries_exhausted: false,
        };
        let entry = Arc::new(RegistryEntry {
            name: name.clone(),
            status: RwLock::new(process.status()),
            process: tokio::sync::Mutex::new(process),
            breaker: Arc::new(CircuitBreaker::new(
                format!("health:{}", name),
                CircuitBreakerConfig::from_supervisor(&self.config),
            )),
            monitored: AtomicBool::new(true),
        });

        {
            let mut registry = self.registry_write();
            if let Some(existing) = registry.get(&name) {
                if !existing.is_replaceable() {
                    return Err(SupervisorError::DuplicateProcess(name));
                }
            }
            registry.insert(name.clone(), entry.clone());
        }
        info!(process = %name, to = %ProcessState::Starting, "process registered");

        let result = {
            let mut process = entry.process.lock().await;
            match self.launcher.spawn(&process.spec).await {
                Ok(child) => {
                    self.attach_child(&mut process, child);
                    entry.transition(&mut process, ProcessState::Running);
                    Ok(process.status())
                }
                Err(source) => {
                    self.record_error();
                    error!(process = %name, "failed to spawn process: {}", source);
                    process.last_failure = Some(FailureReason::SpawnFailed {
                        error: source.to_string(),
                    });
                    entry.transition(&mut process, ProcessState::Failed);
                    Err(SupervisorError::ProcessSpawn { name: name.clone(), source })
                }
            }
        };

        let supervisor = Arc::clone(self);
        let handle = tokio::spawn(async move { supervisor.run_monitor(entry).await });
        self.lock_tasks().push(handle);

        result
    }

    /// Intentionally stop a worker; it stays registered as `Stopped`.
    pub async fn stop(&self, name: &str) -> Result<ProcessStatus, SupervisorError> {
        let entry = self.entry(name)?;
        let mut process = entry.process.lock().await;

        match process.state {
            ProcessState::Running => {
                entry.transition(&mut process, ProcessState::Stopping);
                self.terminate_child(&entry.name, &mut process).await;
                entry.transition(&mut process, ProcessState::Stopped);
            }
            ProcessState::Failed if process.retries_exhausted => {}
            // A failed worker is waiting for its restart; abandon it through the restart path
            ProcessState::Failed => {
                entry.transition(&mut process, ProcessState::Restarting);
                entry.transition(&mut process, ProcessState::Stopping);
                entry.transition(&mut process, ProcessState::Stopped);
            }
            ProcessState::Stopping
            | ProcessState::Stopped
            | ProcessState::Starting
            | ProcessState::Restarting => {}
        }

        Ok(process.status())
    }

    /// Restart a worker on request. Counts against its retry budget.
    pub async fn restart(&self, name: &str) -> Result<ProcessStatus, SupervisorError> {
        let entry = self.entry(name)?;
        let mut process = entry.process.lock().await;

        match process.state {
            ProcessState::Running => {
                process.last_failure = Some(FailureReason::Manual);
                entry.transition(&mut process, ProcessState::Failed);
            }
            ProcessState::Failed if process.retries_exhausted => {
                return Err(SupervisorError::RetriesExhausted(name.to_string()));
            }
            ProcessState::Failed => {}
            other => {
                return Err(SupervisorError::InvalidProcess {
                    name: name.to_string(),
                    reason: format!("cannot restart from state {}", other),
                });
            }
        }

        self.restart_locked(&entry, &mut process).await;
        if process.retries_exhausted {
            return Err(SupervisorError::RetriesExhausted(name.to_string()));
        }
        Ok(process.status())
    }

    pub fn list_processes(&self) -> Vec<ProcessStatus> {
        let mut statuses: Vec<ProcessStatus> = self.entries().iter().map(|e| e.status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub fn process_status(&self, name: &str) -> Option<ProcessStatus> {
        self.entry(name).ok().map(|e| e.status())
    }

    pub fn circuit_stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<CircuitBreakerStats> = self.entries().iter().map(|e| e.breaker.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats.push(self.webhook_breaker.stats());
        stats
    }

    pub fn latest_snapshot(&self) -> Option<HealthSnapshot> {
        self.latest_snapshot.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn degradation_status(&self) -> DegradationStatus {
        let (applied_steps, pending_steps) = {
            let controller = self.lock_degradation();
            (controller.applied().to_vec(), controller.pending().to_vec())
        };
        let runtime = self.runtime();
        let mut disabled_features: Vec<MonitoringFeature> = runtime.disabled.iter().copied().collect();
        disabled_features.sort_by_key(|f| f.to_string());

        DegradationStatus {
            applied_steps,
            pending_steps,
            disabled_features,
            emergency_mode: runtime.emergency,
            check_interval: runtime.config.check_interval,
            health_check_interval: runtime.config.health_check_interval,
            metrics_collection_interval: runtime.config.metrics_collection_interval,
        }
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::SeqCst)
    }

    pub fn restart_count(&self) -> u64 {
        self.restart_total.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_started.load(Ordering::SeqCst)
    }

    /// Receiver that flips to `true` once shutdown has completed
    pub fn shutdown_complete(&self) -> watch::Receiver<bool> {
        self.shutdown_done.subscribe()
    }

    /// Spawn the host sampling driver
    pub fn start_sampling(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        let handle = tokio::spawn(async move { supervisor.run_sampler().await });
        self.lock_tasks().push(handle);
    }

    /// Load the previous run's state, restore counters and terminate its orphans.
    pub async fn recover(&self) -> RecoveryReport {
        let store = self.store.clone();
        let outcome = match tokio::task::spawn_blocking(move || store.load()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("state load task failed: {}", e);
                self.record_error();
                return RecoveryReport {
                    source: "default".to_string(),
                    unclean_shutdown: false,
                    restored_restart_count: 0,
                    restored_error_count: 0,
                    orphans_terminated: Vec::new(),
                };
            }
        };

        let state = outcome.state;
        let source = match &outcome.source {
            LoadSource::Primary => "primary".to_string(),
            LoadSource::Backup(path) => format!("backup {}", path.display()),
            LoadSource::Default => "default".to_string(),
        };
        self.restart_total.fetch_add(state.restart_count, Ordering::SeqCst);
        self.error_count.fetch_add(state.error_count, Ordering::SeqCst);

        if state.was_running {
            warn!(last_saved = %state.timestamp, "previous run did not shut down cleanly");
        }

        let mut orphans_terminated = Vec::new();
        for (name, pid) in &state.managed_process_pids {
            if !self.launcher.is_alive(*pid) {
                continue;
            }
            let command = self
                .config
                .processes
                .iter()
                .chain(state.config_snapshot.iter().flat_map(|c| c.processes.iter()))
                .find(|spec| &spec.name == name)
                .map(|spec| spec.command.clone());
            let Some(command) = command else {
                debug!(process = %name, pid, "no known command for recorded pid; leaving it alone");
                continue;
            };

            match self.process_source.process_stats(*pid).await {
                Ok(stats) if stats.runs_program(&command) => {
                    warn!(process = %name, pid, "terminating orphan from previous run");
                    self.terminate_pid(*pid).await;
                    orphans_terminated.push(name.clone());
                }
                Ok(stats) => {
                    debug!(process = %name, pid, command = %stats.command, "pid was reused by another program");
                }
                Err(e) => debug!(process = %name, pid, "cannot inspect recorded pid: {}", e),
            }
        }

        info!(
            source = %source,
            restarts = state.restart_count,
            errors = state.error_count,
            orphans = orphans_terminated.len(),
            "state recovered"
        );
        RecoveryReport {
            source,
            unclean_shutdown: state.was_running,
            restored_restart_count: state.restart_count,
            restored_error_count: state.error_count,
            orphans_terminated,
        }
    }

    /// Stop every driver and worker and persist the final state.
    ///
    /// Later and concurrent calls wait for the first one to finish.
    pub async fn graceful_shutdown(&self) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            let mut done = self.shutdown_done.subscribe();
            let _ = done.wait_for(|done| *done).await;
            return;
        }

        info!("graceful shutdown started");
        self.shutdown_tx.send_replace(true);

        let deadline = self.config.emergency_shutdown_timeout();
        let orderly = async {
            let handles: Vec<JoinHandle<()>> = self.lock_tasks().drain(..).collect();
            for result in join_all(handles).await {
                if let Err(e) = result {
                    warn!("driver task ended abnormally: {}", e);
                }
            }

            let entries = self.entries();
            join_all(entries.iter().map(|entry| self.stop_for_shutdown(entry))).await;
        };

        if tokio::time::timeout(deadline, orderly).await.is_err() {
            error!(timeout = ?deadline, "shutdown deadline exceeded; killing remaining processes");
            for (name, pid) in self.known_pids() {
                if let Err(e) = self.launcher.signal(pid, StopSignal::Kill) {
                    warn!(process = %name, pid, "kill failed: {}", e);
                }
            }
        }

        if let Err(e) = self.persist(false).await {
            warn!("final state not saved: {}", e);
        }

        self.shutdown_done.send_replace(true);
        info!("shutdown complete");
    }

    async fn run_monitor(self: Arc<Self>, entry: Arc<RegistryEntry>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            let interval = self.runtime().config.check_interval();
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = tokio::time::sleep(interval) => {}
            }

            if self.monitor_tick(&entry).await == TickOutcome::Finished {
                break;
            }
        }
        entry.monitored.store(false, Ordering::SeqCst);
        debug!(process = %entry.name, "monitor stopped");
    }

    async fn monitor_tick(&self, entry: &Arc<RegistryEntry>) -> TickOutcome {
        let mut process = entry.process.lock().await;
        if self.is_shutting_down() {
            return TickOutcome::Finished;
        }

        match process.state {
            ProcessState::Running => {}
            ProcessState::Failed if process.retries_exhausted => return TickOutcome::Finished,
            // The previous respawn failed
            ProcessState::Failed => {
                if !self.config.enable_auto_restart {
                    return TickOutcome::Finished;
                }
                return self.restart_locked(entry, &mut process).await;
            }
            ProcessState::Stopping | ProcessState::Stopped => return TickOutcome::Finished,
            ProcessState::Starting | ProcessState::Restarting => return TickOutcome::Continue,
        }

        // Liveness
        let exited = match process.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(exit) => exit.map(|e| e.code),
                Err(e) => {
                    warn!(process = %entry.name, "cannot poll child: {}", e);
                    None
                }
            },
            None => Some(None),
        };
        if let Some(code) = exited {
            process.child = None;
            process.pid = None;
            self.record_error();
            warn!(process = %entry.name, code = ?code, "process exited unexpectedly");
            process.last_failure = Some(FailureReason::Exited { code });
            entry.transition(&mut process, ProcessState::Failed);

            return self.restart_or_remove(entry, process).await;
        }

        // Health check
        let runtime_config = self.runtime().config;
        if let Some(check) = process.health_check.clone() {
            if process.last_probe.elapsed() >= runtime_config.health_check_interval() {
                process.last_probe = Instant::now();
                let timeout = runtime_config.health_check_timeout();
                let result = entry
                    .breaker
                    .call(|| async {
                        tokio::time::timeout(timeout, check.check())
                            .await
                            .unwrap_or(Err(HealthCheckError::Timeout(timeout)))
                    })
                    .await
                    .map_err(|e| match e {
                        CircuitBreakerError::Open(open) => HealthCheckError::CircuitOpen(open),
                        CircuitBreakerError::Inner(inner) => inner,
                    });

                let outcome = match result {
                    Ok(()) => {
                        process.consecutive_failures = 0;
                        HealthCheckOutcome {
                            checked_at: Utc::now(),
                            healthy: true,
                            error: None,
                        }
                    }
                    Err(e) => {
                        process.consecutive_failures += 1;
                        self.record_error();
                        warn!(
                            process = %entry.name,
                            probe = %check.describe(),
                            failures = process.consecutive_failures,
                            "health check failed: {}",
                            e
                        );
                        HealthCheckOutcome {
                            checked_at: Utc::now(),
                            healthy: false,
                            error: Some(e.to_string()),
                        }
                    }
                };
                process.last_health_check = Some(outcome);
                entry.publish(&process);

                if process.consecutive_failures >= self.config.health_check_failure_threshold {
                    process.last_failure = Some(FailureReason::Unhealthy {
                        consecutive_failures: process.consecutive_failures,
                    });
                    entry.transition(&mut process, ProcessState::Failed);
                    return self.restart_or_remove(entry, process).await;
                }
            }
        }

        // Per-process resource limits
        if self.feature_enabled(MonitoringFeature::ProcessResourceChecks) {
            if let Some(pid) = process.pid {
                match self.process_source.process_stats(pid).await {
                    Ok(stats) if stats.memory_percent > self.config.max_memory_percent => {
                        warn!(
                            process = %entry.name,
                            memory_percent = stats.memory_percent,
                            limit = self.config.max_memory_percent,
                            "process above memory limit"
                        );
                        process.last_failure = Some(FailureReason::MemoryLimit {
                            memory_percent: stats.memory_percent,
                        });
                        entry.transition(&mut process, ProcessState::Failed);
                        return self.restart_or_remove(entry, process).await;
                    }
                    Ok(_) => {}
                    Err(e) => debug!(process = %entry.name, pid, "process stats unavailable: {}", e),
                }
            }
        }

        TickOutcome::Continue
    }

    /// Restart a process the monitor just marked `Failed`, or drop it from the
    /// registry when auto-restart is off. A still-running child is terminated
    /// either way.
    async fn restart_or_remove(
        &self,
        entry: &Arc<RegistryEntry>,
        mut process: tokio::sync::MutexGuard<'_, ManagedProcess>,
    ) -> TickOutcome {
        if self.config.enable_auto_restart {
            return self.restart_locked(entry, &mut process).await;
        }
        self.terminate_child(&entry.name, &mut process).await;
        entry.publish(&process);
        drop(process);
        self.registry_write().remove(&entry.name);
        info!(process = %entry.name, "auto-restart disabled; process removed");
        TickOutcome::Finished
    }

    /// Restart a `Failed` process. The caller holds the process lock for the
    /// whole cycle, including the backoff sleep.
    async fn restart_locked(&self, entry: &RegistryEntry, process: &mut ManagedProcess) -> TickOutcome {
        if process.strategy.exhausted(process.restart_count) {
            self.terminate_child(&entry.name, process).await;
            process.retries_exhausted = true;
            entry.publish(process);
            self.record_error();
            error!(
                process = %entry.name,
                restarts = process.restart_count,
                "restart attempts exhausted; process left failed"
            );
            return TickOutcome::Finished;
        }

        let delay = process.strategy.delay_for(process.restart_count);
        entry.transition(process, ProcessState::Restarting);
        self.terminate_child(&entry.name, process).await;

        process.restart_count += 1;
        self.restart_total.fetch_add(1, Ordering::SeqCst);
        entry.publish(process);
        info!(
            process = %entry.name,
            attempt = process.restart_count,
            max_retries = process.strategy.max_retries,
            delay = ?delay,
            reason = %process.last_failure.as_ref().map(|r| r.to_string()).unwrap_or_default(),
            "restarting process"
        );

        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => {
                entry.transition(process, ProcessState::Stopping);
                entry.transition(process, ProcessState::Stopped);
                return TickOutcome::Finished;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        entry.transition(process, ProcessState::Starting);
        match self.launcher.spawn(&process.spec).await {
            Ok(child) => {
                self.attach_child(process, child);
                entry.transition(process, ProcessState::Running);
            }
            Err(e) => {
                self.record_error();
                error!(process = %entry.name, "respawn failed: {}", e);
                process.last_failure = Some(FailureReason::SpawnFailed { error: e.to_string() });
                entry.transition(process, ProcessState::Failed);
            }
        }
        TickOutcome::Continue
    }

    fn attach_child(&self, process: &mut ManagedProcess, child: Box<dyn ChildHandle>) {
        process.pid = child.pid();
        process.child = Some(child);
        process.started_at = Some(Utc::now());
        process.consecutive_failures = 0;
        process.last_probe = Instant::now();
    }

    /// SIGTERM, bounded wait, then SIGKILL
    async fn terminate_child(&self, name: &str, process: &mut ManagedProcess) {
        let Some(mut child) = process.child.take() else {
            return;
        };
        process.pid = None;

        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        if let Some(pid) = child.pid() {
            if let Err(e) = self.launcher.signal(pid, StopSignal::Terminate) {
                warn!(process = %name, pid, "SIGTERM failed: {}", e);
            }
        }

        let timeout = self.config.termination_timeout();
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(exit)) => debug!(process = %name, code = ?exit.code, "process terminated"),
            Ok(Err(e)) => warn!(process = %name, "waiting for process failed: {}", e),
            Err(_) => {
                warn!(process = %name, timeout = ?timeout, "process ignored SIGTERM; killing");
                if let Err(e) = child.start_kill() {
                    warn!(process = %name, "SIGKILL failed: {}", e);
                }
                if tokio::time::timeout(timeout, child.wait()).await.is_err() {
                    error!(process = %name, "process did not exit after SIGKILL");
                }
            }
        }
    }

    /// Terminate a pid this run did not spawn
    async fn terminate_pid(&self, pid: u32) {
        if let Err(e) = self.launcher.signal(pid, StopSignal::Terminate) {
            warn!(pid, "SIGTERM failed: {}", e);
            return;
        }
        let deadline = Instant::now() + self.config.termination_timeout();
        while self.launcher.is_alive(pid) {
            if Instant::now() >= deadline {
                warn!(pid, "orphan ignored SIGTERM; killing");
                if let Err(e) = self.launcher.signal(pid, StopSignal::Kill) {
                    warn!(pid, "SIGKILL failed: {}", e);
                }
                return;
            }
            tokio::time::sleep(ORPHAN_POLL_INTERVAL).await;
        }
    }

    async fn stop_for_shutdown(&self, entry: &Arc<RegistryEntry>) {
        let mut process = entry.process.lock().await;
        if process.state == ProcessState::Running {
            entry.transition(&mut process, ProcessState::Stopping);
            self.terminate_child(&entry.name, &mut process).await;
            entry.transition(&mut process, ProcessState::Stopped);
        } else if process.child.is_some() {
            self.terminate_child(&entry.name, &mut process).await;
            entry.publish(&process);
        }
    }

    async fn run_sampler(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut last_save = Instant::now();
        let mut last_cleanup: Option<Instant> = None;

        loop {
            let interval = self.runtime().config.metrics_collection_interval();
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = tokio::time::sleep(interval) => {}
            }

            self.sample_tick().await;

            if last_save.elapsed() >= self.config.state_save_interval() {
                last_save = Instant::now();
                if let Err(e) = self.persist(true).await {
                    warn!("periodic state save failed: {}", e);
                }
            }
            let cleanup_due = match last_cleanup {
                Some(at) => at.elapsed() >= CLEANUP_INTERVAL,
                None => true,
            };
            if cleanup_due {
                last_cleanup = Some(Instant::now());
                self.cleanup_backups().await;
            }
        }
        debug!("sampler stopped");
    }

    /// One sampling and evaluation cycle
    pub async fn sample_tick(self: &Arc<Self>) -> Option<HealthSnapshot> {
        let sample = match self.monitor.sample().await {
            Ok(sample) => sample,
            Err(e) => {
                self.record_error();
                warn!("resource sampling failed: {}", e);
                return None;
            }
        };

        let issues = HealthIssues {
            leak_detected: self.feature_enabled(MonitoringFeature::LeakDetection)
                && self.monitor.detect_leak().is_some_and(|report| report.leak_detected()),
            degradation_detected: self.feature_enabled(MonitoringFeature::DegradationDetection)
                && self.monitor.detect_degradation().is_some_and(|report| report.degraded),
        };
        let history = self.monitor.history();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = self.aggregator.evaluate(
            sequence,
            &sample,
            &history,
            issues,
            self.feature_enabled(MonitoringFeature::PredictiveAlerts),
        );

        let previous = self
            .latest_snapshot
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .replace(snapshot.clone())
            .map(|s| s.health_state);
        if previous != Some(snapshot.health_state) {
            let from = previous.map(|s| s.to_string()).unwrap_or_else(|| "NONE".to_string());
            if snapshot.health_state.is_healthy() {
                info!(from = %from, to = %snapshot.health_state, score = snapshot.health_score, "health state changed");
            } else {
                warn!(from = %from, to = %snapshot.health_state, score = snapshot.health_score, "health state changed");
            }
        }
        for alert in &snapshot.predictive_alerts {
            warn!(metric = %alert.metric, minutes = alert.minutes_to_limit, "{}", alert.message);
        }

        let memory_pressure = sample.memory_percent > self.config.warning_memory_percent;
        if (issues.leak_detected || memory_pressure) && self.feature_enabled(MonitoringFeature::MemoryOptimization) {
            self.monitor.optimize().await;
        }

        if !snapshot.health_state.is_healthy() {
            let steps = self.lock_degradation().next_steps(snapshot.health_state);
            for step in steps {
                self.apply_step(step);
            }
        }

        if self.feature_enabled(MonitoringFeature::Webhook) {
            self.deliver(snapshot.clone());
        }

        Some(snapshot)
    }

    fn apply_step(self: &Arc<Self>, step: DegradationStep) {
        match step {
            DegradationStep::ReduceMonitoringFrequency => {
                let mut runtime = self.runtime_write();
                runtime.config = Arc::new(runtime.config.with_widened_intervals(2.0));
                info!(
                    check_interval = runtime.config.check_interval,
                    metrics_interval = runtime.config.metrics_collection_interval,
                    "monitoring intervals widened"
                );
            }
            DegradationStep::DisableNonEssentialFeatures => {
                let mut runtime = self.runtime_write();
                runtime.disabled.extend(self.config.non_essential_features.iter().copied());
                info!(features = ?self.config.non_essential_features, "non-essential features disabled");
            }
            DegradationStep::ReduceConcurrency => {
                let victim = self
                    .list_processes()
                    .into_iter()
                    .filter(|s| s.state == ProcessState::Running && !s.essential)
                    .min_by_key(|s| s.priority);
                match victim {
                    Some(status) => {
                        info!(process = %status.name, priority = status.priority, "stopping process to reduce load");
                        // Termination waits on the process lock and the SIGTERM grace period
                        let supervisor = Arc::clone(self);
                        let handle = tokio::spawn(async move {
                            if let Err(e) = supervisor.stop(&status.name).await {
                                warn!(process = %status.name, "could not stop process: {}", e);
                            }
                        });
                        self.lock_tasks().push(handle);
                    }
                    None => info!("no non-essential running process to stop"),
                }
            }
            DegradationStep::EmergencyMode => {
                self.runtime_write().emergency = true;
                warn!("emergency mode: only liveness and health checks remain active");
            }
        }
    }

    fn deliver(&self, snapshot: HealthSnapshot) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let breaker = self.webhook_breaker.clone();
        tokio::spawn(async move {
            if let Err(e) = breaker.call(|| notifier.notify(&snapshot)).await {
                warn!(sequence = snapshot.sequence, "webhook delivery failed: {}", e);
            }
        });
    }

    async fn persist(&self, was_running: bool) -> Result<(), PersistenceError> {
        let managed_process_pids: BTreeMap<String, u32> = self
            .entries()
            .iter()
            .filter_map(|e| e.status().pid.map(|pid| (e.name.clone(), pid)))
            .collect();
        let state = PersistedState {
            timestamp: Utc::now(),
            restart_count: self.restart_count(),
            error_count: self.error_count(),
            was_running,
            managed_process_pids,
            config_snapshot: Some(self.config.as_ref().clone()),
        };

        let store = self.store.clone();
        let result = tokio::task::spawn_blocking(move || store.save(&state))
            .await
            .map_err(|e| PersistenceError::Task(e.to_string()))
            .and_then(|saved| saved);
        if result.is_err() {
            self.record_error();
        }
        result
    }

    async fn cleanup_backups(&self) {
        let store = self.store.clone();
        let retention = self.config.backup_retention_days;
        match tokio::task::spawn_blocking(move || store.cleanup(retention)).await {
            Ok(report) => {
                if !report.removed.is_empty() {
                    info!(removed = report.removed.len(), "old state backups removed");
                }
                for (path, e) in &report.errors {
                    self.record_error();
                    warn!(path = %path.display(), "cannot remove backup: {}", e);
                }
            }
            Err(e) => warn!("backup cleanup task failed: {}", e),
        }
    }

    fn feature_enabled(&self, feature: MonitoringFeature) -> bool {
        let runtime = self.runtime_read();
        !runtime.emergency && !runtime.disabled.contains(&feature)
    }

    fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::SeqCst);
    }

    fn known_pids(&self) -> Vec<(String, u32)> {
        self.entries()
            .iter()
            .filter_map(|e| e.status().pid.map(|pid| (e.name.clone(), pid)))
            .collect()
    }

    fn entry(&self, name: &str) -> Result<Arc<RegistryEntry>, SupervisorError> {
        self.registry_read()
            .get(name)
            .cloned()
            .ok_or_else(|| SupervisorError::ProcessNotFound(name.to_string()))
    }

    fn entries(&self) -> Vec<Arc<RegistryEntry>> {
        self.registry_read().values().cloned().collect()
    }

    fn runtime(&self) -> RuntimeMode {
        self.runtime_read().clone()
    }

    fn runtime_read(&self) -> std::sync::RwLockReadGuard<'_, RuntimeMode> {
        self.runtime.read().unwrap_or_else(|p| p.into_inner())
    }

    fn runtime_write(&self) -> std::sync::RwLockWriteGuard<'_, RuntimeMode> {
        self.runtime.write().unwrap_or_else(|p| p.into_inner())
    }

    fn registry_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<RegistryEntry>>> {
        self.registry.read().unwrap_or_else(|p| p.into_inner())
    }

    fn registry_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<RegistryEntry>>> {
        self.registry.write().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_degradation(&self) -> MutexGuard<'_, DegradationController> {
        self.degradation.lock().unwrap_or_else(|p| p.into_inner())
    }
}
