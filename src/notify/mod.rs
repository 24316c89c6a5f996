//! Alert notification
//!
//! The detection pipeline hands a single [`Alert`] per triggering blob to a
//! [`Notifier`]. Delivery failures are errors so the trigger can be
//! redelivered; nothing is retried here.

mod webhook;

pub use webhook::{SlackMessage, WebhookNotifier};

use crate::error::Result;
use crate::model::Value;
use crate::transport::BlobLocation;
use async_trait::async_trait;
use serde::Serialize;

/// Everything matched inside one blob
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub location: BlobLocation,
    pub scanned: usize,
    pub matches: Vec<AlertMatch>,
}

/// One matched value with the records on both sides of the match
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertMatch {
    pub value: Value,
    pub ioc_sources: Vec<String>,
    pub entity_labels: Vec<String>,
}

impl Alert {
    pub fn matched_values(&self) -> impl Iterator<Item = &Value> {
        self.matches.iter().map(|m| &m.value)
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<()>;
}
