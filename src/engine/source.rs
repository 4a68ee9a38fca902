//! Data source access
//!
//! The `DataSource` trait is the seam between the calculation engine and
//! the benefits database the query templates run against. The engine only
//! ever needs one shape of answer: the first scalar of the first row.

use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors from query execution against the data source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("query execution failed: {0}")]
    Execution(String),

    #[error("data source lock poisoned")]
    LockPoisoned,
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Read access to the operational database metric queries run against
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Execute a rendered query and return the first scalar of the first
    /// row; `None` when the query yields no rows (or a NULL scalar)
    async fn fetch_scalar(&self, sql: &str) -> SourceResult<Option<f64>>;
}

/// SQLite-backed data source
pub struct SqliteDataSource {
    /// std::sync::Mutex because SQLite connections are !Sync
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDataSource {
    /// Open the benefits database at the given path
    pub fn open(path: &Path) -> SourceResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| SourceError::Execution(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory source (tests, demos)
    pub fn open_in_memory() -> SourceResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| SourceError::Execution(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a batch of statements (schema setup, demo data seeding)
    pub fn execute_batch(&self, sql: &str) -> SourceResult<()> {
        let conn = self.conn.lock().map_err(|_| SourceError::LockPoisoned)?;
        conn.execute_batch(sql)
            .map_err(|e| SourceError::Execution(e.to_string()))
    }
}

#[async_trait]
impl DataSource for SqliteDataSource {
    async fn fetch_scalar(&self, sql: &str) -> SourceResult<Option<f64>> {
        let conn = self.conn.lock().map_err(|_| SourceError::LockPoisoned)?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| SourceError::Execution(e.to_string()))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| SourceError::Execution(e.to_string()))?;

        match rows.next().map_err(|e| SourceError::Execution(e.to_string()))? {
            Some(row) => {
                let value: Option<f64> = row
                    .get(0)
                    .map_err(|e| SourceError::Execution(e.to_string()))?;
                Ok(value)
            }
            None => Ok(None),
        }
    }
}
