mod file;
mod memory;

pub use file::PersistenceManager;
pub use memory::SampleHistory;
