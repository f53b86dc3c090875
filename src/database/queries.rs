//! Database query functions
//!
//! Device upserts with service merging, metric samples and audit events

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::models::*;
use crate::logging::mask_json_secrets;
use crate::models::{HostRecord, ServiceEntry};

/// Existing services first, then new `(service, port)` pairs not seen yet
pub fn merge_services(existing: &[ServiceEntry], incoming: &[ServiceEntry]) -> Vec<ServiceEntry> {
    let mut merged = existing.to_vec();
    for entry in incoming {
        if !merged.contains(entry) {
            merged.push(entry.clone());
        }
    }
    merged
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Device id by IP, or by hostname for rows that have no IP
pub fn find_device_id(conn: &Connection, ip: Option<&str>, hostname: Option<&str>) -> Result<Option<i64>> {
    let id = match (ip, hostname) {
        (Some(ip), _) => conn
            .query_row("SELECT id FROM devices WHERE ip = ?1", params![ip], |row| row.get(0))
            .optional()?,
        (None, Some(hostname)) => conn
            .query_row(
                "SELECT id FROM devices WHERE ip IS NULL AND hostname = ?1",
                params![hostname],
                |row| row.get(0),
            )
            .optional()?,
        (None, None) => None,
    };
    Ok(id)
}

fn load_services(conn: &Connection, device_id: i64) -> Result<Vec<ServiceEntry>> {
    let raw: String = conn
        .query_row("SELECT services FROM devices WHERE id = ?1", params![device_id], |row| row.get(0))
        .context("Failed to read stored services")?;
    Ok(parse_services(&raw))
}

fn parse_services(raw: &str) -> Vec<ServiceEntry> {
    match serde_json::from_str(raw) {
        Ok(services) => services,
        Err(e) => {
            tracing::warn!("Discarding unreadable services column: {}", e);
            Vec::new()
        }
    }
}

/// Insert or update a device from a host record
pub fn upsert_host(conn: &Connection, host: &HostRecord) -> Result<i64> {
    let ip = non_empty(&host.ip);
    let hostname = non_empty(&host.hostname);
    if ip.is_none() && hostname.is_none() {
        anyhow::bail!("Host record has neither IP nor hostname");
    }

    conn.execute_batch("SAVEPOINT upsert_host")
        .context("Failed to start upsert_host transaction")?;

    let upsert_result = (|| -> Result<i64> {
        let device_id = find_device_id(conn, ip, hostname)?;
        let existing = match device_id {
            Some(id) => load_services(conn, id)?,
            None => Vec::new(),
        };
        let services = serde_json::to_string(&merge_services(&existing, &host.services))
            .context("Failed to encode services")?;

        let id = if let Some(id) = device_id {
            conn.execute(
                r#"
                UPDATE devices SET
                    last_seen = datetime('now'),
                    hostname = COALESCE(?2, hostname),
                    os = ?3,
                    status = ?4,
                    virtualization = COALESCE(?5, virtualization),
                    services = ?6
                WHERE id = ?1
                "#,
                params![
                    id,
                    hostname,
                    &host.os,
                    host.status.as_str(),
                    &host.virtualization,
                    services,
                ],
            )
            .context("Failed to update device")?;
            id
        } else {
            conn.execute(
                r#"
                INSERT INTO devices (ip, hostname, os, status, virtualization, services)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    ip,
                    hostname,
                    &host.os,
                    host.status.as_str(),
                    &host.virtualization,
                    services,
                ],
            )
            .context("Failed to insert device")?;
            conn.last_insert_rowid()
        };
        Ok(id)
    })();

    match upsert_result {
        Ok(id) => {
            conn.execute_batch("RELEASE SAVEPOINT upsert_host")
                .context("Failed to commit upsert_host transaction")?;
            Ok(id)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT upsert_host; RELEASE SAVEPOINT upsert_host");
            Err(e)
        }
    }
}

/// Device id for `ip`, inserting a placeholder row when the host was
/// never discovered
pub fn ensure_device(conn: &Connection, ip: &str) -> Result<i64> {
    if let Some(id) = find_device_id(conn, Some(ip), None)? {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO devices (ip, hostname) VALUES (?1, ?1)",
        params![ip],
    )
    .context("Failed to insert placeholder device")?;
    Ok(conn.last_insert_rowid())
}

fn map_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeviceRecord> {
    Ok(DeviceRecord {
        id: row.get(0)?,
        ip: row.get(1)?,
        hostname: row.get(2)?,
        os: row.get(3)?,
        status: row.get(4)?,
        virtualization: row.get(5)?,
        services: parse_services(&row.get::<_, String>(6)?),
        first_seen: parse_datetime_column(row.get::<_, String>(7)?, 7)?,
        last_seen: parse_datetime_column(row.get::<_, String>(8)?, 8)?,
    })
}

const DEVICE_COLUMNS: &str =
    "id, ip, hostname, os, status, virtualization, services, first_seen, last_seen";

/// Get all devices, most recently seen first
pub fn get_all_devices(conn: &Connection) -> Result<Vec<DeviceRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DEVICE_COLUMNS} FROM devices ORDER BY last_seen DESC, id DESC"
    ))?;
    let devices = stmt
        .query_map([], map_device)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(devices)
}

/// Get device by IP address
pub fn get_device_by_ip(conn: &Connection, ip: &str) -> Result<Option<DeviceRecord>> {
    let device = conn
        .query_row(
            &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE ip = ?1"),
            params![ip],
            map_device,
        )
        .optional()?;
    Ok(device)
}

/// Append one metric sample for the device at `ip`
pub fn insert_metric(conn: &Connection, ip: &str, metric: &str, value: f64, at: DateTime<Utc>) -> Result<()> {
    let device_id = ensure_device(conn, ip)?;
    conn.execute(
        "INSERT INTO metrics (device_id, metric_name, value, ts_ms) VALUES (?1, ?2, ?3, ?4)",
        params![device_id, metric, value, at.timestamp_millis()],
    )
    .context("Failed to insert metric")?;
    Ok(())
}

/// Most recent `(value, timestamp)` of one metric
pub fn last_metric(conn: &Connection, ip: &str, metric: &str) -> Result<Option<(f64, DateTime<Utc>)>> {
    let row: Option<(f64, i64)> = conn
        .query_row(
            r#"
            SELECT m.value, m.ts_ms
            FROM metrics m
            JOIN devices d ON m.device_id = d.id
            WHERE d.ip = ?1 AND m.metric_name = ?2
            ORDER BY m.ts_ms DESC, m.id DESC
            LIMIT 1
            "#,
            params![ip, metric],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(row.and_then(|(value, ts)| DateTime::from_timestamp_millis(ts).map(|at| (value, at))))
}

/// Last `limit` samples of one metric, oldest first
pub fn metric_series(conn: &Connection, ip: &str, metric: &str, limit: usize) -> Result<Vec<(f64, DateTime<Utc>)>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT m.value, m.ts_ms
        FROM metrics m
        JOIN devices d ON m.device_id = d.id
        WHERE d.ip = ?1 AND m.metric_name = ?2
        ORDER BY m.ts_ms DESC, m.id DESC
        LIMIT ?3
        "#,
    )?;
    let mut rows = stmt
        .query_map(params![ip, metric, limit as i64], |row| {
            Ok((row.get::<_, f64>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.reverse();
    Ok(rows
        .into_iter()
        .filter_map(|(value, ts)| DateTime::from_timestamp_millis(ts).map(|at| (value, at)))
        .collect())
}

/// Records an audit event. Sensitive keys in `details` are masked
/// before they reach the table.
pub fn insert_event(
    conn: &Connection,
    kind: EventKind,
    client: &str,
    target: &str,
    ok: bool,
    details: &serde_json::Value,
) -> Result<i64> {
    let masked = mask_json_secrets(details);
    conn.execute(
        r#"
        INSERT INTO events (kind, client, target, ok, details)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![kind.to_string(), client, target, ok, masked.to_string()],
    )
    .context("Failed to insert event")?;
    Ok(conn.last_insert_rowid())
}

/// Get recent events, newest first
pub fn get_recent_events(conn: &Connection, limit: i64) -> Result<Vec<EventRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, created_at, kind, client, target, ok, details
        FROM events
        ORDER BY id DESC
        LIMIT ?1
        "#,
    )?;

    let events = stmt
        .query_map(params![limit], |row| {
            let kind: String = row.get(2)?;
            let details: String = row.get(6)?;
            Ok(EventRecord {
                id: row.get(0)?,
                created_at: parse_datetime_column(row.get::<_, String>(1)?, 1)?,
                kind: kind.parse().map_err(|e: String| {
                    rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
                })?,
                client: row.get(3)?,
                target: row.get(4)?,
                ok: row.get(5)?,
                details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(events)
}

fn parse_datetime_column(s: String, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_str(&format!("{} +0000", s), "%Y-%m-%d %H:%M:%S %z")
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}
