// In-process repository used by tests and dry runs

use super::Repository;
use crate::error::{Result, RetroError};
use crate::model::{Entity, Ioc, Value};
use ahash::AHashSet;
use async_trait::async_trait;
use std::sync::RwLock;

/// Append-only in-memory store with the same put/query semantics as the
/// SQLite adapter: identical records collapse, distinct records sharing a
/// value are all kept.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    entities: RwLock<Vec<Entity>>,
    iocs: RwLock<Vec<Ioc>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_count(&self) -> Result<usize> {
        Ok(self.entities.read().map_err(poisoned)?.len())
    }

    pub fn ioc_count(&self) -> Result<usize> {
        Ok(self.iocs.read().map_err(poisoned)?.len())
    }
}

fn poisoned<T>(_: T) -> RetroError {
    RetroError::Storage("Memory repository lock poisoned".to_string())
}

fn append<T: Clone + PartialEq>(store: &RwLock<Vec<T>>, batch: &[T]) -> Result<()> {
    let mut guard = store.write().map_err(poisoned)?;
    for record in batch {
        if !guard.contains(record) {
            guard.push(record.clone());
        }
    }
    Ok(())
}

fn select<T: Clone>(
    store: &RwLock<Vec<T>>,
    values: &[Value],
    value_of: impl Fn(&T) -> &Value,
) -> Result<Vec<T>> {
    let wanted: AHashSet<&Value> = values.iter().collect();
    let guard = store.read().map_err(poisoned)?;
    Ok(guard
        .iter()
        .filter(|r| wanted.contains(value_of(*r)))
        .cloned()
        .collect())
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn put_entities(&self, entities: &[Entity]) -> Result<()> {
        append(&self.entities, entities)
    }

    async fn query_entities(&self, values: &[Value]) -> Result<Vec<Entity>> {
        select(&self.entities, values, |e| &e.value)
    }

    async fn put_iocs(&self, iocs: &[Ioc]) -> Result<()> {
        append(&self.iocs, iocs)
    }

    async fn query_iocs(&self, values: &[Value]) -> Result<Vec<Ioc>> {
        select(&self.iocs, values, |i| &i.value)
    }
}
