use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::application::circuit_breaker::CircuitOpenError;

#[derive(Debug, Error)]
pub enum HealthCheckError {
    #[error("health check timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("health check failed: {0}")]
    Failed(String),
}

/// Port for probing whether a worker is serving correctly
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<(), HealthCheckError>;

    /// Short description used in logs
    fn describe(&self) -> String;
}
