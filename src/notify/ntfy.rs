//! ntfy.sh sink: one JSON POST per notification.

use serde::Serialize;
use std::time::Duration;
use ureq::Agent;

use super::{DeliveryError, Notification, Notifier};

pub const DEFAULT_SERVER: &str = "https://ntfy.sh";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CLIENT_TAG: &str = "cli-ntfy";

#[derive(Debug, Serialize)]
struct Publish<'a> {
    topic: &'a str,
    title: &'a str,
    message: &'a str,
    tags: [&'a str; 2],
}

/// Publishes to `<server>/` using ntfy's JSON publish form.
pub struct NtfyNotifier {
    server: String,
    topic: String,
    agent: Agent,
}

impl NtfyNotifier {
    pub fn new(server: impl Into<String>, topic: impl Into<String>) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();
        Self {
            server: server.into().trim_end_matches('/').to_string(),
            topic: topic.into(),
            agent,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/", self.server)
    }

    fn body(&self, notification: &Notification) -> Result<Vec<u8>, DeliveryError> {
        let payload = Publish {
            topic: &self.topic,
            title: &notification.title,
            message: &notification.message,
            tags: [CLIENT_TAG, &notification.category],
        };
        Ok(serde_json::to_vec(&payload)?)
    }
}

impl Notifier for NtfyNotifier {
    fn send(&self, notification: Notification) -> Result<(), DeliveryError> {
        if self.topic.is_empty() {
            return Err(DeliveryError::MissingTopic);
        }
        let body = self.body(&notification)?;
        let response = self
            .agent
            .post(&self.endpoint())
            .header("Content-Type", "application/json")
            .send(&body[..])
            .map_err(|err| match err {
                ureq::Error::StatusCode(code) => DeliveryError::Status(code),
                other => DeliveryError::Transport(Box::new(other)),
            })?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(DeliveryError::Status(status));
        }
        tracing::debug!(category = %notification.category, "notification delivered");
        Ok(())
    }
}
