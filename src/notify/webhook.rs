// Slack-compatible incoming webhook sink

use super::{Alert, Notifier};
use crate::error::{Result, RetroError};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

const ALERT_COLOR: &str = "#a30200";

/// Incoming-webhook message body
#[derive(Debug, Serialize)]
pub struct SlackMessage {
    pub text: String,
    pub attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
pub struct SlackAttachment {
    pub color: &'static str,
    pub title: String,
    pub fields: Vec<SlackField>,
}

#[derive(Debug, Serialize)]
pub struct SlackField {
    pub title: &'static str,
    pub value: String,
    pub short: bool,
}

impl From<&Alert> for SlackMessage {
    fn from(alert: &Alert) -> Self {
        let text = format!(
            "IOC matched: {} value(s) in s3://{}/{} ({}), {} entities scanned",
            alert.matches.len(),
            alert.location.container,
            alert.location.path,
            alert.location.region,
            alert.scanned
        );

        let attachments = alert
            .matches
            .iter()
            .map(|m| SlackAttachment {
                color: ALERT_COLOR,
                title: format!("{} ({})", m.value.data, m.value.value_type),
                fields: vec![
                    SlackField {
                        title: "IOC sources",
                        value: join_or_dash(&m.ioc_sources),
                        short: true,
                    },
                    SlackField {
                        title: "Entity labels",
                        value: join_or_dash(&m.entity_labels),
                        short: true,
                    },
                ],
            })
            .collect();

        Self { text, attachments }
    }
}

fn join_or_dash(items: &[String]) -> String {
    let items: Vec<&str> = items
        .iter()
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

/// Posts alerts as JSON to a webhook URL; any 2xx is success
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RetroError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        let message = SlackMessage::from(alert);
        let response = self
            .client
            .post(&self.url)
            .json(&message)
            .send()
            .await
            .map_err(|e| RetroError::from(e).with("location", &alert.location))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetroError::Notification(format!(
                "Webhook responded with status {}",
                status
            ))
            .with("location", &alert.location));
        }

        tracing::info!(
            "Sent alert for {} ({} matched values)",
            alert.location,
            alert.matches.len()
        );
        Ok(())
    }
}
