//! Chat notifications for deploy results

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::NotifyError;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    content: &'a str,
}

/// Posts deploy results to chat webhooks. Cheap to clone; clones share one
/// connection pool.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Deliver `message` once. Failures are returned, never retried.
    pub async fn send(&self, endpoint: &str, message: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(endpoint)
            .json(&ChatMessage { content: message })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status));
        }
        debug!("Notification delivered ({})", status);
        Ok(())
    }

    /// Best-effort delivery: failures are logged and dropped.
    pub async fn notify(&self, trigger_name: &str, endpoint: &str, message: &str) {
        if let Err(e) = self.send(endpoint, message).await {
            warn!("Failed to send notification for '{}': {}", trigger_name, e);
        }
    }
}
