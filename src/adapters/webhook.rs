use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::HealthSnapshot;
use crate::ports::{Notifier, NotifyError};

/// Posts health snapshots as JSON to a fixed URL
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Request(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, snapshot: &HealthSnapshot) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(snapshot)
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }

        debug!(url = %self.url, sequence = snapshot.sequence, "webhook delivered");
        Ok(())
    }
}
