use std::io;

use async_trait::async_trait;

use crate::domain::ProcessSpec;

/// Signals the supervisor sends to stop a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Terminate,
    Kill,
}

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub success: bool,
}

/// Handle to a spawned worker owned by the supervisor
#[async_trait]
pub trait ChildHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Non-blocking liveness check; `Some` once the child has exited
    fn try_wait(&mut self) -> io::Result<Option<ExitInfo>>;

    /// Wait until the child exits
    async fn wait(&mut self) -> io::Result<ExitInfo>;

    /// Request an immediate kill without waiting
    fn start_kill(&mut self) -> io::Result<()>;
}

/// Port for creating and signalling OS processes
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn spawn(&self, spec: &ProcessSpec) -> io::Result<Box<dyn ChildHandle>>;

    /// Deliver a stop signal to an arbitrary pid
    fn signal(&self, pid: u32, signal: StopSignal) -> io::Result<()>;

    fn is_alive(&self, pid: u32) -> bool;
}
