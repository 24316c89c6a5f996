//! Correlation service
//!
//! Business logic over a [`Repository`]: batched writes and the two
//! symmetric matching queries. Matching is exact set membership on the
//! `(data, type)` pair; no normalization happens here, so callers must
//! canonicalize values before storing them.

use crate::error::{Result, RetroError};
use crate::model::{Entity, Ioc, Value};
use crate::repository::Repository;
use ahash::AHashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct RepositoryService {
    repo: Arc<dyn Repository>,
    timeout: Option<Duration>,
}

impl RepositoryService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            timeout: None,
        }
    }

    /// Bound every repository call by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn put_entities(&self, entities: &[Entity]) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        self.bounded(self.repo.put_entities(entities))
            .await
            .map_err(|e| e.with("op", "put_entities").with("count", entities.len()))?;
        tracing::debug!("Stored {} entities", entities.len());
        Ok(())
    }

    /// Every stored entity whose value appears in any of `iocs`
    pub async fn get_entities(&self, iocs: &[Ioc]) -> Result<Vec<Entity>> {
        let values = distinct_values(iocs.iter().map(|i| &i.value));
        if values.is_empty() {
            return Ok(Vec::new());
        }
        self.bounded(self.repo.query_entities(&values))
            .await
            .map_err(|e| e.with("op", "query_entities").with("values", values.len()))
    }

    pub async fn put_ioc_set(&self, iocs: &[Ioc]) -> Result<()> {
        if iocs.is_empty() {
            return Ok(());
        }
        self.bounded(self.repo.put_iocs(iocs))
            .await
            .map_err(|e| e.with("op", "put_iocs").with("count", iocs.len()))?;
        tracing::debug!("Stored {} IOCs", iocs.len());
        Ok(())
    }

    /// Every stored IOC whose value appears in any of `entities`
    pub async fn get_ioc_set(&self, entities: &[Entity]) -> Result<Vec<Ioc>> {
        let values = distinct_values(entities.iter().map(|e| &e.value));
        if values.is_empty() {
            return Ok(Vec::new());
        }
        self.bounded(self.repo.query_iocs(&values))
            .await
            .map_err(|e| e.with("op", "query_iocs").with("values", values.len()))
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                RetroError::Storage(format!("Repository call timed out after {:?}", limit))
            })?,
            None => fut.await,
        }
    }
}

/// Deduplicate values, keeping first-seen order
fn distinct_values<'a>(values: impl Iterator<Item = &'a Value>) -> Vec<Value> {
    let mut seen = AHashSet::new();
    values
        .filter(|v| seen.insert(*v))
        .cloned()
        .collect()
}
