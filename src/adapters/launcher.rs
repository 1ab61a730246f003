use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::domain::ProcessSpec;
use crate::ports::{ChildHandle, ExitInfo, ProcessLauncher, StopSignal};

/// Launches workers as tokio child processes and signals them through nix
#[derive(Debug, Default, Clone)]
pub struct TokioLauncher;

impl TokioLauncher {
    pub fn new() -> Self {
        Self
    }
}

struct TokioChild {
    child: Child,
}

fn exit_info(status: std::process::ExitStatus) -> ExitInfo {
    ExitInfo {
        code: status.code(),
        success: status.success(),
    }
}

#[async_trait]
impl ChildHandle for TokioChild {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitInfo>> {
        Ok(self.child.try_wait()?.map(exit_info))
    }

    async fn wait(&mut self) -> io::Result<ExitInfo> {
        Ok(exit_info(self.child.wait().await?))
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }
}

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn spawn(&self, spec: &ProcessSpec) -> io::Result<Box<dyn ChildHandle>> {
        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn()?;
        Ok(Box::new(TokioChild { child }))
    }

    fn signal(&self, pid: u32, stop: StopSignal) -> io::Result<()> {
        let sig = match stop {
            StopSignal::Terminate => Signal::SIGTERM,
            StopSignal::Kill => Signal::SIGKILL,
        };
        let pid = i32::try_from(pid).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;

        match signal::kill(Pid::from_raw(pid), sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = i32::try_from(pid) else {
            return false;
        };
        // Signal 0 only checks existence; EPERM means it exists under another uid
        matches!(signal::kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawns_and_reports_exit_code() {
        let launcher = TokioLauncher::new();
        let spec = ProcessSpec::new("exit3", "sh").with_args(["-c", "exit 3"]);

        let mut child = launcher.spawn(&spec).await.unwrap();
        assert!(child.pid().is_some());

        let exit = child.wait().await.unwrap();
        assert_eq!(exit.code, Some(3));
        assert!(!exit.success);
    }

    #[tokio::test]
    async fn terminate_stops_a_running_child() {
        let launcher = TokioLauncher::new();
        let spec = ProcessSpec::new("sleeper", "sleep").with_args(["30"]);

        let mut child = launcher.spawn(&spec).await.unwrap();
        let pid = child.pid().unwrap();
        assert!(launcher.is_alive(pid));

        launcher.signal(pid, StopSignal::Terminate).unwrap();
        let exit = child.wait().await.unwrap();
        assert!(!exit.success);
        assert_eq!(exit.code, None);
    }

    #[tokio::test]
    async fn spawning_missing_binary_fails() {
        let launcher = TokioLauncher::new();
        let spec = ProcessSpec::new("ghost", "/nonexistent/vigil-test-binary");
        assert!(launcher.spawn(&spec).await.is_err());
    }

    #[test]
    fn signalling_a_vanished_pid_is_not_an_error() {
        let launcher = TokioLauncher::new();
        // Above the default pid_max of 4194304
        assert!(launcher.signal(4_194_305, StopSignal::Kill).is_ok());
        assert!(!launcher.is_alive(4_194_305));
    }
}
