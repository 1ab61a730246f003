//! In-memory fakes for the ports, shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{CpuMetrics, DiskUsage, HealthSnapshot, MemoryMetrics, PersistedState, ProcessSpec, ProcessStats};
use crate::ports::{
    ChildHandle, CleanupReport, ExitInfo, HealthCheck, HealthCheckError, LoadOutcome, LoadSource, Notifier,
    NotifyError, ProcessLauncher, ProcessSource, StateStore, StopSignal, SystemSource,
};
use crate::error::PersistenceError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const FAKE_TOTAL_BYTES: u64 = 1000 * 1024 * 1024;

fn killed() -> ExitInfo {
    ExitInfo {
        code: None,
        success: false,
    }
}

#[derive(Debug, Default)]
struct ChildControl {
    exited: Option<ExitInfo>,
    killed: bool,
}

struct FakeChild {
    pid: u32,
    control: Arc<Mutex<ChildControl>>,
}

#[async_trait]
impl ChildHandle for FakeChild {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitInfo>> {
        Ok(self.control.lock().unwrap().exited)
    }

    async fn wait(&mut self) -> io::Result<ExitInfo> {
        loop {
            if let Some(exit) = self.control.lock().unwrap().exited {
                return Ok(exit);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn start_kill(&mut self) -> io::Result<()> {
        let mut control = self.control.lock().unwrap();
        control.killed = true;
        control.exited.get_or_insert_with(killed);
        Ok(())
    }
}

/// Launcher whose children only exit when told to
#[derive(Default)]
pub struct FakeLauncher {
    next_pid: AtomicU32,
    children: Mutex<HashMap<u32, Arc<Mutex<ChildControl>>>>,
    spawned: Mutex<Vec<(String, u32)>>,
    signals: Mutex<Vec<(u32, StopSignal)>>,
    external_alive: Mutex<HashSet<u32>>,
    fail_spawns: AtomicBool,
    exit_immediately: AtomicBool,
    ignore_terminate: AtomicBool,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            ..Default::default()
        }
    }

    pub fn fail_spawns(&self, fail: bool) {
        self.fail_spawns.store(fail, Ordering::SeqCst);
    }

    /// Children crash right after starting
    pub fn exit_immediately(&self, exit: bool) {
        self.exit_immediately.store(exit, Ordering::SeqCst);
    }

    /// Children only die on SIGKILL
    pub fn ignore_terminate(&self, ignore: bool) {
        self.ignore_terminate.store(ignore, Ordering::SeqCst);
    }

    pub fn spawn_count(&self, name: &str) -> usize {
        self.spawned.lock().unwrap().iter().filter(|(n, _)| n == name).count()
    }

    pub fn last_pid(&self, name: &str) -> Option<u32> {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, pid)| *pid)
    }

    pub fn signals(&self) -> Vec<(u32, StopSignal)> {
        self.signals.lock().unwrap().clone()
    }

    pub fn was_killed(&self, pid: u32) -> bool {
        self.children
            .lock()
            .unwrap()
            .get(&pid)
            .is_some_and(|c| c.lock().unwrap().killed)
    }

    /// Make a running child exit with `code`
    pub fn exit(&self, pid: u32, code: i32) {
        if let Some(control) = self.children.lock().unwrap().get(&pid) {
            control.lock().unwrap().exited = Some(ExitInfo {
                code: Some(code),
                success: code == 0,
            });
        }
    }

    /// Register a pid that was not spawned by this launcher
    pub fn add_external(&self, pid: u32) {
        self.external_alive.lock().unwrap().insert(pid);
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn spawn(&self, spec: &ProcessSpec) -> io::Result<Box<dyn ChildHandle>> {
        if self.fail_spawns.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such binary"));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let control = Arc::new(Mutex::new(ChildControl::default()));
        if self.exit_immediately.load(Ordering::SeqCst) {
            control.lock().unwrap().exited = Some(ExitInfo {
                code: Some(1),
                success: false,
            });
        }
        self.children.lock().unwrap().insert(pid, control.clone());
        self.spawned.lock().unwrap().push((spec.name.clone(), pid));

        Ok(Box::new(FakeChild { pid, control }))
    }

    fn signal(&self, pid: u32, signal: StopSignal) -> io::Result<()> {
        self.signals.lock().unwrap().push((pid, signal));
        let dies = signal == StopSignal::Kill || !self.ignore_terminate.load(Ordering::SeqCst);
        if !dies {
            return Ok(());
        }

        if let Some(control) = self.children.lock().unwrap().get(&pid) {
            let mut control = control.lock().unwrap();
            control.killed |= signal == StopSignal::Kill;
            control.exited.get_or_insert_with(killed);
        }
        self.external_alive.lock().unwrap().remove(&pid);
        Ok(())
    }

    fn is_alive(&self, pid: u32) -> bool {
        if let Some(control) = self.children.lock().unwrap().get(&pid) {
            return control.lock().unwrap().exited.is_none();
        }
        self.external_alive.lock().unwrap().contains(&pid)
    }
}

/// Host metrics set by the test
pub struct FakeSystemSource {
    usage: Mutex<(f64, f64, f64)>,
    fail: AtomicBool,
}

impl FakeSystemSource {
    pub fn new() -> Self {
        Self {
            usage: Mutex::new((10.0, 30.0, 20.0)),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_usage(&self, cpu: f64, memory: f64, disk: f64) {
        *self.usage.lock().unwrap() = (cpu, memory, disk);
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(f64, f64, f64), BoxError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("metrics unavailable".into());
        }
        Ok(*self.usage.lock().unwrap())
    }
}

fn share(percent: f64) -> u64 {
    (FAKE_TOTAL_BYTES as f64 * percent / 100.0) as u64
}

#[async_trait]
impl SystemSource for FakeSystemSource {
    async fn get_cpu_metrics(&self) -> Result<CpuMetrics, BoxError> {
        let (cpu, _, _) = self.check()?;
        Ok(CpuMetrics::new(cpu, cpu, 0.0))
    }

    async fn get_memory_metrics(&self) -> Result<MemoryMetrics, BoxError> {
        let (_, memory, _) = self.check()?;
        let used = share(memory);
        Ok(MemoryMetrics::new(used, FAKE_TOTAL_BYTES, FAKE_TOTAL_BYTES - used))
    }

    async fn get_disk_usage(&self, path: &Path) -> Result<DiskUsage, BoxError> {
        let (_, _, disk) = self.check()?;
        let used = share(disk);
        Ok(DiskUsage::new(path.to_path_buf(), FAKE_TOTAL_BYTES, used, FAKE_TOTAL_BYTES - used))
    }
}

#[derive(Default)]
pub struct FakeProcessSource {
    stats: Mutex<HashMap<u32, ProcessStats>>,
}

impl FakeProcessSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, stats: ProcessStats) {
        self.stats.lock().unwrap().insert(stats.pid, stats);
    }
}

#[async_trait]
impl ProcessSource for FakeProcessSource {
    async fn process_stats(&self, pid: u32) -> Result<ProcessStats, BoxError> {
        self.stats
            .lock()
            .unwrap()
            .get(&pid)
            .cloned()
            .ok_or_else(|| format!("no process {}", pid).into())
    }
}

/// State store keeping every saved state in memory
#[derive(Default)]
pub struct FakeStateStore {
    stored: Mutex<Option<PersistedState>>,
    saves: Mutex<Vec<PersistedState>>,
}

impl FakeStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            stored: Mutex::new(Some(state)),
            saves: Mutex::default(),
        }
    }

    pub fn saves(&self) -> Vec<PersistedState> {
        self.saves.lock().unwrap().clone()
    }
}

impl StateStore for FakeStateStore {
    fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        *self.stored.lock().unwrap() = Some(state.clone());
        self.saves.lock().unwrap().push(state.clone());
        Ok(())
    }

    fn load(&self) -> LoadOutcome {
        match self.stored.lock().unwrap().clone() {
            Some(state) => LoadOutcome {
                state,
                source: LoadSource::Primary,
            },
            None => LoadOutcome {
                state: PersistedState::default(),
                source: LoadSource::Default,
            },
        }
    }

    fn cleanup(&self, _retention_days: u32) -> CleanupReport {
        CleanupReport::default()
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    delivered: Mutex<Vec<HealthSnapshot>>,
    fail: AtomicBool,
}

impl FakeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<HealthSnapshot> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, snapshot: &HealthSnapshot) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Status(500));
        }
        self.delivered.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}

/// Probe with a fixed verdict
pub struct FakeHealthCheck {
    healthy: AtomicBool,
    calls: AtomicU32,
}

impl FakeHealthCheck {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthCheck for FakeHealthCheck {
    async fn check(&self) -> Result<(), HealthCheckError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(HealthCheckError::Failed("probe says no".to_string()))
        }
    }

    fn describe(&self) -> String {
        "fake".to_string()
    }
}
