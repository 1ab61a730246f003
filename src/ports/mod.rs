pub mod health_check;
pub mod launcher;
pub mod notifier;
pub mod process_source;
pub mod state_store;
pub mod system_source;

pub use health_check::{HealthCheck, HealthCheckError};
pub use launcher::{ChildHandle, ExitInfo, ProcessLauncher, StopSignal};
pub use notifier::{Notifier, NotifyError};
pub use process_source::ProcessSource;
pub use state_store::{CleanupReport, LoadOutcome, LoadSource, StateStore};
pub use system_source::SystemSource;
