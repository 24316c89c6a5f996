//! Entity transport
//!
//! Moves entities from producers to the detection pipeline through a blob
//! store: producers write through a buffered [`WriteQueue`], consumers
//! stream them back through a [`ReadQueue`] opened at the same location.

pub mod blob;
mod queue;

pub use blob::{BlobLocation, BlobStore, BlobWriter, FsBlobStore, MemoryBlobStore};
pub use queue::{with_write_queue, QueueOptions, ReadQueue, WriteQueue};

use crate::error::Result;
use std::sync::Arc;

/// Opens write and read queues against one blob store
#[derive(Clone)]
pub struct EntityTransport {
    store: Arc<dyn BlobStore>,
    options: QueueOptions,
}

impl EntityTransport {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            options: QueueOptions::default(),
        }
    }

    pub fn with_options(mut self, options: QueueOptions) -> Self {
        self.options = options;
        self
    }

    pub fn write_queue(&self, location: BlobLocation) -> Result<WriteQueue> {
        WriteQueue::open(self.store.as_ref(), location, self.options)
    }

    pub fn read_queue(&self, location: BlobLocation) -> Result<ReadQueue> {
        ReadQueue::open(self.store.as_ref(), location)
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }
}
