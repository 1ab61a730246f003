pub mod circuit_breaker;
pub mod degradation;
pub mod health;
pub mod preflight;
pub mod resource_monitor;
pub mod supervisor;

pub use circuit_breaker::CircuitBreakerStats;
pub use resource_monitor::ResourceMonitor;
pub use supervisor::{DegradationStatus, ProcessSupervisor, RecoveryReport, SupervisorDeps};
