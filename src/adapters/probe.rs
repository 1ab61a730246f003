use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::domain::HealthCheckSpec;
use crate::ports::{HealthCheck, HealthCheckError};

/// Healthy when a GET on `url` answers with a 2xx status
pub struct HttpHealthCheck {
    client: reqwest::Client,
    url: String,
}

impl HttpHealthCheck {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, HealthCheckError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HealthCheckError::Failed(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self) -> Result<(), HealthCheckError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| HealthCheckError::Failed(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(HealthCheckError::Failed(format!("{} answered {}", self.url, status)))
        }
    }

    fn describe(&self) -> String {
        format!("http {}", self.url)
    }
}

/// Healthy when a TCP connection to `address` can be opened
pub struct TcpHealthCheck {
    address: String,
}

impl TcpHealthCheck {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl HealthCheck for TcpHealthCheck {
    async fn check(&self) -> Result<(), HealthCheckError> {
        TcpStream::connect(&self.address)
            .await
            .map(drop)
            .map_err(|e| HealthCheckError::Failed(format!("connect {}: {}", self.address, e)))
    }

    fn describe(&self) -> String {
        format!("tcp {}", self.address)
    }
}

/// Build the probe described by a process spec
pub fn from_spec(spec: &HealthCheckSpec, timeout: Duration) -> Result<Arc<dyn HealthCheck>, HealthCheckError> {
    Ok(match spec {
        HealthCheckSpec::Http { url } => Arc::new(HttpHealthCheck::new(url.clone(), timeout)?),
        HealthCheckSpec::Tcp { address } => Arc::new(TcpHealthCheck::new(address.clone())),
    })
}
