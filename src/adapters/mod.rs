pub mod launcher;
pub mod probe;
pub mod procfs;
pub mod store;
pub mod webhook;

pub use launcher::TokioLauncher;
pub use procfs::{ProcfsAdapter, ProcfsConfig};
pub use store::{PersistenceManager, SampleHistory};
pub use webhook::WebhookNotifier;
