use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a supervised worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    Restarting,
}

impl ProcessState {
    /// Edges of the supervisor state machine.
    pub fn can_transition_to(&self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Failed)
                | (Running, Stopping)
                | (Running, Failed)
                | (Stopping, Stopped)
                | (Failed, Restarting)
                | (Restarting, Starting)
                | (Restarting, Stopping)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Restarting => "restarting",
        };
        f.write_str(s)
    }
}

/// Restart delay policy and retry cap for one worker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RestartStrategy {
    pub max_retries: u32,
    /// Base delay in seconds
    pub retry_delay: f64,
    pub exponential_backoff: bool,
    /// Upper bound for the delay in seconds
    pub max_retry_delay: f64,
}

impl RestartStrategy {
    pub fn fixed(max_retries: u32, retry_delay: f64) -> Self {
        Self {
            max_retries,
            retry_delay,
            exponential_backoff: false,
            max_retry_delay: retry_delay,
        }
    }

    pub fn exponential(max_retries: u32, retry_delay: f64, max_retry_delay: f64) -> Self {
        Self {
            max_retries,
            retry_delay,
            exponential_backoff: true,
            max_retry_delay,
        }
    }

    /// Delay before the restart that follows `restart_count` earlier restarts.
    pub fn delay_for(&self, restart_count: u32) -> Duration {
        let secs = if self.exponential_backoff {
            let factor = 2f64.powi(restart_count.min(62) as i32);
            (self.retry_delay * factor).min(self.max_retry_delay)
        } else {
            self.retry_delay
        };
        Duration::from_secs_f64(secs.max(0.0))
    }

    pub fn exhausted(&self, restart_count: u32) -> bool {
        restart_count >= self.max_retries
    }
}

/// How a worker's health is probed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HealthCheckSpec {
    Http { url: String },
    Tcp { address: String },
}

/// Static description of a worker to supervise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Higher values are shed last when concurrency is reduced
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_essential")]
    pub essential: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<RestartStrategy>,
}

fn default_priority() -> u8 {
    50
}

fn default_essential() -> bool {
    true
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            priority: default_priority(),
            essential: default_essential(),
            health_check: None,
            restart: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: u8, essential: bool) -> Self {
        self.priority = priority;
        self.essential = essential;
        self
    }
}

/// Why a worker was taken down
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    Exited { code: Option<i32> },
    SpawnFailed { error: String },
    Unhealthy { consecutive_failures: u32 },
    MemoryLimit { memory_percent: f64 },
    Manual,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code: Some(code) } => write!(f, "exited with code {}", code),
            Self::Exited { code: None } => write!(f, "terminated by signal"),
            Self::SpawnFailed { error } => write!(f, "spawn failed: {}", error),
            Self::Unhealthy {
                consecutive_failures,
            } => write!(f, "{} consecutive health check failures", consecutive_failures),
            Self::MemoryLimit { memory_percent } => {
                write!(f, "memory usage {:.1}% above limit", memory_percent)
            }
            Self::Manual => write!(f, "manual restart"),
        }
    }
}

/// Result of the most recent health probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckOutcome {
    pub checked_at: DateTime<Utc>,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read-only view of a managed worker, published after every transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub name: String,
    pub state: ProcessState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub priority: u8,
    pub essential: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<HealthCheckOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureReason>,
    pub retries_exhausted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_allows_documented_edges_only() {
        assert!(ProcessState::Starting.can_transition_to(ProcessState::Running));
        assert!(ProcessState::Running.can_transition_to(ProcessState::Failed));
        assert!(ProcessState::Failed.can_transition_to(ProcessState::Restarting));
        assert!(ProcessState::Restarting.can_transition_to(ProcessState::Starting));
        assert!(ProcessState::Stopping.can_transition_to(ProcessState::Stopped));

        assert!(!ProcessState::Stopped.can_transition_to(ProcessState::Running));
        assert!(!ProcessState::Failed.can_transition_to(ProcessState::Running));
        assert!(!ProcessState::Running.can_transition_to(ProcessState::Restarting));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let strategy = RestartStrategy::fixed(3, 2.0);
        for attempt in 0..5 {
            assert_eq!(strategy.delay_for(attempt), Duration::from_secs(2));
        }
    }

    #[test]
    fn exponential_backoff_is_monotonic_and_capped() {
        let strategy = RestartStrategy::exponential(20, 0.5, 30.0);
        let cap = Duration::from_secs(30);
        let mut previous = Duration::ZERO;
        for attempt in 0..20 {
            let delay = strategy.delay_for(attempt);
            assert!(delay >= previous, "attempt {} went backwards", attempt);
            assert!(delay <= cap, "attempt {} exceeded the cap", attempt);
            previous = delay;
        }
        assert_eq!(strategy.delay_for(0), Duration::from_millis(500));
        assert_eq!(strategy.delay_for(3), Duration::from_secs(4));
        assert_eq!(strategy.delay_for(19), cap);
    }

    #[test]
    fn exhaustion_happens_at_max_retries() {
        let strategy = RestartStrategy::fixed(2, 1.0);
        assert!(!strategy.exhausted(0));
        assert!(!strategy.exhausted(1));
        assert!(strategy.exhausted(2));
    }

    #[test]
    fn health_check_spec_uses_kind_tag() {
        let spec: HealthCheckSpec =
            serde_json::from_str(r#"{"kind":"http","url":"http://127.0.0.1:8080/health"}"#).unwrap();
        assert_eq!(
            spec,
            HealthCheckSpec::Http {
                url: "http://127.0.0.1:8080/health".to_string()
            }
        );
    }
}
