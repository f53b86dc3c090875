//! Database schema definitions
//!
//! Creates the SQLite tables for devices, metric samples and audit events

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all database tables
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        -- Devices: one row per discovered host, keyed by IP or hostname
        CREATE TABLE IF NOT EXISTS devices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ip TEXT UNIQUE,
            hostname TEXT,
            os TEXT NOT NULL DEFAULT 'Unknown',
            status TEXT NOT NULL DEFAULT 'Unknown',
            virtualization TEXT,
            services TEXT NOT NULL DEFAULT '[]',
            first_seen TEXT NOT NULL DEFAULT (datetime('now')),
            last_seen TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Metric samples, append-only
        CREATE TABLE IF NOT EXISTS metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id INTEGER NOT NULL,
            metric_name TEXT NOT NULL,
            value REAL NOT NULL,
            ts_ms INTEGER NOT NULL,
            FOREIGN KEY (device_id) REFERENCES devices(id) ON DELETE CASCADE
        );

        -- Audit trail of state-changing operations
        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            kind TEXT NOT NULL,
            client TEXT NOT NULL,
            target TEXT NOT NULL,
            ok INTEGER NOT NULL DEFAULT 0,
            details TEXT NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_devices_hostname ON devices(hostname);
        CREATE INDEX IF NOT EXISTS idx_devices_last_seen ON devices(last_seen);
        CREATE INDEX IF NOT EXISTS idx_metrics_lookup ON metrics(device_id, metric_name, ts_ms);
        CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at);
        "#,
    )
    .context("Failed to create database tables")?;

    Ok(())
}
