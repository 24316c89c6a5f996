// Entity store pipeline: persist transported entities for retrospective matching

use super::{parse_trigger, EntityStream, PipelineOptions};
use crate::error::{Result, ResultExt};
use crate::service::RepositoryService;
use crate::transport::{BlobLocation, EntityTransport};
use std::sync::Arc;

/// Entities per repository put
const STORE_BATCH: usize = 100;

pub struct EntityStore {
    service: Arc<RepositoryService>,
    transport: EntityTransport,
    options: PipelineOptions,
}

impl EntityStore {
    pub fn new(
        service: Arc<RepositoryService>,
        transport: EntityTransport,
        options: PipelineOptions,
    ) -> Self {
        Self {
            service,
            transport,
            options,
        }
    }

    /// Store the entities of every location named by the trigger.
    /// Returns the number of entities stored.
    pub async fn handle(&self, raw_event: &str) -> Result<usize> {
        let mut stored = 0;
        for location in parse_trigger(raw_event)? {
            stored += self.store(&location).await?;
        }
        Ok(stored)
    }

    pub async fn store(&self, location: &BlobLocation) -> Result<usize> {
        let mut stream = EntityStream::open(&self.transport, location, self.options.read_timeout)
            .await
            .with("location", location)?;

        let mut stored = 0;
        loop {
            let batch = stream
                .next_batch(STORE_BATCH)
                .await
                .with("location", location)?;
            if batch.is_empty() {
                break;
            }
            self.service
                .put_entities(&batch)
                .await
                .with("location", location)
                .with("stored", stored)?;
            stored += batch.len();
        }

        tracing::info!("Stored {} entities from {}", stored, location);
        Ok(stored)
    }
}
