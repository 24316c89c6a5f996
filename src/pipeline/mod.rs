//! Trigger-driven pipelines
//!
//! A trigger names blob locations written by a producer. The detection
//! pipeline streams each blob's entities, asks the correlation service for
//! matching IOCs and sends one alert per blob with any match. The store
//! pipeline persists the same entities so later IOC feeds can be matched
//! retrospectively.

mod detect;
mod store;
mod trigger;

pub use detect::{Detection, Detector};
pub use store::EntityStore;
pub use trigger::{parse_s3_event, parse_trigger};

use crate::error::{Result, RetroError};
use crate::model::Entity;
use crate::transport::{BlobLocation, EntityTransport, ReadQueue};
use std::fmt;
use std::time::Duration;

/// Pipeline tuning shared by detection and store runs
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Entities per correlation query; 1 queries entity by entity
    pub match_batch_size: usize,
    /// Deadline for opening the blob and for each batch read
    pub read_timeout: Duration,
    /// Deadline for the alert POST
    pub notify_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            match_batch_size: 1,
            read_timeout: Duration::from_secs(30),
            notify_timeout: Duration::from_secs(10),
        }
    }
}

/// Detection stages; `Failed` is reachable from any of them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Located,
    Streaming,
    Matching,
    Notifying,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Located => "located",
            Stage::Streaming => "streaming",
            Stage::Matching => "matching",
            Stage::Notifying => "notifying",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Reads a blob's entities on the blocking pool, one batch at a time,
/// each read bounded by a deadline.
pub(crate) struct EntityStream {
    queue: Option<ReadQueue>,
    timeout: Duration,
}

impl EntityStream {
    pub(crate) async fn open(
        transport: &EntityTransport,
        location: &BlobLocation,
        timeout: Duration,
    ) -> Result<Self> {
        let transport = transport.clone();
        let location = location.clone();
        let queue = blocking(timeout, move || transport.read_queue(location)).await??;
        Ok(Self {
            queue: Some(queue),
            timeout,
        })
    }

    /// Next batch of up to `max` entities; empty once the blob is exhausted
    pub(crate) async fn next_batch(&mut self, max: usize) -> Result<Vec<Entity>> {
        let mut queue = self
            .queue
            .take()
            .ok_or_else(|| RetroError::Transport("Entity stream aborted".to_string()))?;

        let (queue, batch) = blocking(self.timeout, move || {
            let batch = queue.next_batch(max);
            (queue, batch)
        })
        .await?;

        self.queue = Some(queue);
        batch
    }
}

async fn blocking<T, F>(timeout: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(RetroError::Transport(format!("Blob read task failed: {}", e))),
        Err(_) => Err(RetroError::Transport(format!(
            "Blob read timed out after {:?}",
            timeout
        ))),
    }
}
