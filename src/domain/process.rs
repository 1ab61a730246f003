use serde::{Deserialize, Serialize};

use super::IoMetrics;

/// Kernel scheduling state of a process, as reported by procfs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Running,
    Sleeping,
    Waiting,
    Zombie,
    Stopped,
    TracingStop,
    Dead,
    Unknown,
}

impl RunState {
    pub fn from_char(c: char) -> Self {
        match c {
            'R' => Self::Running,
            'S' => Self::Sleeping,
            'D' => Self::Waiting,
            'Z' => Self::Zombie,
            'T' => Self::Stopped,
            't' => Self::TracingStop,
            'X' | 'x' => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

/// Point-in-time resource usage of one OS process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStats {
    pub pid: u32,
    pub ppid: u32,
    pub command: String,
    pub state: RunState,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_bytes: u64,
    pub thread_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_fds: Option<u64>,
    pub io: IoMetrics,
}

impl ProcessStats {
    pub fn new(pid: u32, ppid: u32, command: String, state: RunState) -> Self {
        Self {
            pid,
            ppid,
            command,
            state,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            memory_bytes: 0,
            thread_count: 0,
            open_fds: None,
            io: IoMetrics::zero(),
        }
    }

    pub fn with_metrics(mut self, cpu_percent: f64, memory_percent: f64, memory_bytes: u64) -> Self {
        self.cpu_percent = cpu_percent;
        self.memory_percent = memory_percent;
        self.memory_bytes = memory_bytes;
        self
    }

    pub fn with_threads(mut self, thread_count: u64) -> Self {
        self.thread_count = thread_count;
        self
    }

    pub fn with_handles(mut self, open_fds: Option<u64>, io: IoMetrics) -> Self {
        self.open_fds = open_fds;
        self.io = io;
        self
    }

    /// Whether the first word of the command line names the same program as `program`.
    ///
    /// Compares basenames so `/usr/bin/python3 app.py` matches `python3`.
    pub fn runs_program(&self, program: &str) -> bool {
        let basename = |s: &str| s.rsplit('/').next().unwrap_or(s).to_string();
        match self.command.split_whitespace().next() {
            Some(first) => basename(first) == basename(program),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_state_from_procfs_char() {
        assert_eq!(RunState::from_char('R'), RunState::Running);
        assert_eq!(RunState::from_char('Z'), RunState::Zombie);
        assert_eq!(RunState::from_char('?'), RunState::Unknown);
    }

    #[test]
    fn runs_program_compares_basenames() {
        let stats = ProcessStats::new(
            10,
            1,
            "/usr/bin/python3 -m http.server".to_string(),
            RunState::Sleeping,
        );
        assert!(stats.runs_program("python3"));
        assert!(stats.runs_program("/opt/bin/python3"));
        assert!(!stats.runs_program("node"));
    }
}
