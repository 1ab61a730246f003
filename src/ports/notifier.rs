use async_trait::async_trait;
use thiserror::Error;

use crate::domain::HealthSnapshot;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("endpoint answered with status {0}")]
    Status(u16),
}

/// Port for publishing health snapshots outside the process
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, snapshot: &HealthSnapshot) -> Result<(), NotifyError>;
}
