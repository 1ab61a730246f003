pub mod degradation;
pub mod disk;
pub mod health;
pub mod managed;
pub mod metrics;
pub mod process;
pub mod sample;
pub mod state;

pub use degradation::{DegradationStep, MonitoringFeature};
pub use disk::DiskUsage;
pub use health::{AlertMetric, HealthIssues, HealthSnapshot, HealthState, PredictiveAlert};
pub use managed::{
    FailureReason, HealthCheckOutcome, HealthCheckSpec, ProcessSpec, ProcessState, ProcessStatus,
    RestartStrategy,
};
pub use metrics::{CpuMetrics, IoMetrics, MemoryMetrics};
pub use process::{ProcessStats, RunState};
pub use sample::ResourceSample;
pub use state::PersistedState;
