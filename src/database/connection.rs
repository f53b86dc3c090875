//! Database connection and initialization
//!
//! Handles the shared SQLite connection and implements the storage seams
//! used by discovery and the metrics engine

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{HostSink, queries, schema};
use crate::metrics::{SampleStore, StoredSample};
use crate::models::HostRecord;

/// Database wrapper with thread-safe connection
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Creates a new database connection
    ///
    /// # Arguments
    /// * `path` - Path to the SQLite database file (created if not exists)
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&path).context("Failed to open database")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        };
        db.initialize()?;

        Ok(db)
    }

    /// Creates an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        };
        db.initialize()?;

        Ok(db)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;
        schema::create_tables(&conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))
    }

    /// Get a reference to the connection
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Get database path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Database location: `NETINV_DB_PATH`, else the platform data directory
    pub fn default_path() -> PathBuf {
        if let Some(path) = crate::config::db_path_override() {
            return path;
        }
        let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("netinv").join("inventory.db")
    }

    /// Runs `f` with the locked connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            path: self.path.clone(),
        }
    }
}

impl HostSink for Database {
    fn save_host(&self, host: &HostRecord) -> Result<()> {
        self.with_conn(|conn| queries::upsert_host(conn, host))
            .with_context(|| format!("Failed to save host {}", host.ip))?;
        Ok(())
    }
}

impl SampleStore for Database {
    fn last_sample(&self, entity: &str, metric: &str) -> Result<Option<StoredSample>> {
        let row = self.with_conn(|conn| queries::last_metric(conn, entity, metric))?;
        Ok(row.map(|(value, at)| StoredSample { value, at }))
    }

    fn record_sample(&self, entity: &str, metric: &str, value: f64, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| queries::insert_metric(conn, entity, metric, value, at))
    }

    fn series(&self, entity: &str, metric: &str, points: usize) -> Result<Vec<StoredSample>> {
        let rows = self.with_conn(|conn| queries::metric_series(conn, entity, metric, points))?;
        Ok(rows
            .into_iter()
            .map(|(value, at)| StoredSample { value, at })
            .collect())
    }
}
