//! Repository capability over a key-value style store
//!
//! Two parallel operation sets, one per record kind. Puts are additive and
//! all-or-nothing per batch; a failed put leaves the store in an unknown but
//! retry-safe state. Queries return every record whose value is in the
//! query set, in no particular order.

mod memory;
mod sqlite;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

use crate::error::Result;
use crate::model::{Entity, Ioc, Value};
use async_trait::async_trait;

#[async_trait]
pub trait Repository: Send + Sync {
    async fn put_entities(&self, entities: &[Entity]) -> Result<()>;

    async fn query_entities(&self, values: &[Value]) -> Result<Vec<Entity>>;

    async fn put_iocs(&self, iocs: &[Ioc]) -> Result<()>;

    async fn query_iocs(&self, values: &[Value]) -> Result<Vec<Ioc>>;
}
