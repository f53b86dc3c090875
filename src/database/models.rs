//! Database models
//!
//! Structs for database records with serialization support

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ServiceEntry;

/// Device record from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: i64,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub os: String,
    pub status: String,
    pub virtualization: Option<String>,
    pub services: Vec<ServiceEntry>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Audited operation kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SnmpSet,
    DeviceCommand,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::SnmpSet => write!(f, "snmp_set"),
            EventKind::DeviceCommand => write!(f, "device_command"),
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snmp_set" => Ok(EventKind::SnmpSet),
            "device_command" => Ok(EventKind::DeviceCommand),
            _ => Err(format!("Unknown event kind: {}", s)),
        }
    }
}

/// Audit event from database. `details` is stored already masked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub kind: EventKind,
    pub client: String,
    pub target: String,
    pub ok: bool,
    pub details: serde_json::Value,
}
