//! SQLite-backed repository
//!
//! Records are append-only rows keyed by value plus provenance and time, so
//! several rows may share one value. Batches are written in a single
//! transaction with `INSERT OR IGNORE`, which makes retried puts harmless.

use super::Repository;
use crate::error::{Result, RetroError};
use crate::model::{Entity, Ioc, Value, ValueType};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Repository adapter over a pooled SQLite database
#[derive(Clone)]
pub struct SqliteRepository {
    pool: DbPool,
}

impl SqliteRepository {
    /// Open (or create) the database at `db_path` and ensure the schema exists
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RetroError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| RetroError::Storage(format!("Failed to create connection pool: {}", e)))?;

        {
            let conn = pool
                .get()
                .map_err(|e| RetroError::Storage(format!("Failed to get connection: {}", e)))?;

            // WAL lets concurrent detections read while a put is in flight
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
            conn.execute_batch(SCHEMA)?;
        }

        tracing::debug!("Opened repository database at {}", db_path.display());
        Ok(Self { pool })
    }

    fn get_conn(pool: &DbPool) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        pool.get()
            .map_err(|e| RetroError::Storage(format!("Failed to get connection: {}", e)))
    }

    /// Run a closure against a pooled connection on the blocking thread pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Self::get_conn(&pool)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| RetroError::Storage(format!("Repository task failed: {}", e)))?
    }

    /// Row counts per table, for status output
    pub fn stats(&self) -> Result<RepoStats> {
        let conn = Self::get_conn(&self.pool)?;

        let entity_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
        let ioc_count: i64 = conn.query_row("SELECT COUNT(*) FROM iocs", [], |row| row.get(0))?;

        Ok(RepoStats {
            entity_count: entity_count as usize,
            ioc_count: ioc_count as usize,
        })
    }
}

/// Repository statistics
#[derive(Debug)]
pub struct RepoStats {
    pub entity_count: usize,
    pub ioc_count: usize,
}

fn decode_value(data: String, value_type: &str) -> Result<Value> {
    let value_type: ValueType = value_type.parse()?;
    Ok(Value::new(data, value_type))
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn put_entities(&self, entities: &[Entity]) -> Result<()> {
        let batch = entities.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO entities (value_type, value_data, label, source, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for entity in &batch {
                    stmt.execute(params![
                        entity.value.value_type.as_str(),
                        &entity.value.data,
                        &entity.label,
                        &entity.source,
                        entity.recorded_at,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn query_entities(&self, values: &[Value]) -> Result<Vec<Entity>> {
        let values = values.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT value_data, value_type, label, source, recorded_at
                 FROM entities WHERE value_type = ?1 AND value_data = ?2",
            )?;

            let mut found = Vec::new();
            for value in &values {
                let rows = stmt.query_map(
                    params![value.value_type.as_str(), &value.data],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    },
                )?;
                for row in rows {
                    let (data, value_type, label, source, recorded_at) = row?;
                    found.push(Entity {
                        value: decode_value(data, &value_type)?,
                        label,
                        source,
                        recorded_at,
                    });
                }
            }
            Ok(found)
        })
        .await
    }

    async fn put_iocs(&self, iocs: &[Ioc]) -> Result<()> {
        let batch = iocs.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO iocs (value_type, value_data, source, updated_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for ioc in &batch {
                    stmt.execute(params![
                        ioc.value.value_type.as_str(),
                        &ioc.value.data,
                        &ioc.source,
                        ioc.updated_at,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn query_iocs(&self, values: &[Value]) -> Result<Vec<Ioc>> {
        let values = values.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT value_data, value_type, source, updated_at
                 FROM iocs WHERE value_type = ?1 AND value_data = ?2",
            )?;

            let mut found = Vec::new();
            for value in &values {
                let rows = stmt.query_map(
                    params![value.value_type.as_str(), &value.data],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )?;
                for row in rows {
                    let (data, value_type, source, updated_at) = row?;
                    found.push(Ioc {
                        value: decode_value(data, &value_type)?,
                        source,
                        updated_at,
                    });
                }
            }
            Ok(found)
        })
        .await
    }
}

/// Store schema. The primary keys double as the value lookup index since
/// `(value_type, value_data)` is their prefix.
const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS entities (
        value_type TEXT NOT NULL,
        value_data TEXT NOT NULL,
        label TEXT NOT NULL,
        source TEXT NOT NULL,
        recorded_at INTEGER NOT NULL,
        PRIMARY KEY (value_type, value_data, label, source, recorded_at)
    );

    CREATE TABLE IF NOT EXISTS iocs (
        value_type TEXT NOT NULL,
        value_data TEXT NOT NULL,
        source TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (value_type, value_data, source, updated_at)
    );
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("repo.db");

        let _repo = SqliteRepository::open(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_schema_exists() {
        let temp_dir = TempDir::new().unwrap();
        let repo = SqliteRepository::open(&temp_dir.path().join("repo.db")).unwrap();
        let conn = SqliteRepository::get_conn(&repo.pool).unwrap();

        for table in ["entities", "iocs"] {
            let count: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    params![table],
                    |row| row.get(0),
                )
                .unwrap();

            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_reopen_keeps_schema() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("repo.db");

        SqliteRepository::open(&db_path).unwrap();
        let repo = SqliteRepository::open(&db_path).unwrap();
        let stats = repo.stats().unwrap();
        assert_eq!(stats.entity_count, 0);
        assert_eq!(stats.ioc_count, 0);
    }

    #[tokio::test]
    async fn test_retried_put_does_not_duplicate() {
        let temp_dir = TempDir::new().unwrap();
        let repo = SqliteRepository::open(&temp_dir.path().join("repo.db")).unwrap();
        let batch = vec![
            Entity::new(Value::domain("a.example"), "dns", "resolver", 1),
            Entity::new(Value::domain("a.example"), "dns", "resolver", 2),
        ];

        repo.put_entities(&batch).await.unwrap();
        repo.put_entities(&batch).await.unwrap();

        assert_eq!(repo.stats().unwrap().entity_count, 2);
    }

    #[test]
    fn test_unknown_stored_type_is_rejected() {
        let err = decode_value("x".to_string(), "hostname").unwrap_err();
        assert!(matches!(err, RetroError::Parse(_)));

        let value = decode_value("x".to_string(), "ip_addr").unwrap();
        assert_eq!(value, Value::ip_addr("x"));
    }
}
