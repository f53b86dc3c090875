//! SNMP GET / WALK / SET over v1, v2c and v3
//!
//! Sessions are opened per operation. Every UDP round trip runs under the
//! target's timeout and is retried `retries` times before giving up.
//! `get` and `walk` degrade to absent / partial results; only `set`
//! reports its failure, as a structured outcome.

mod hostinfo;
mod neighbors;

pub use hostinfo::{build_snmp_hostinfo, storage_entries};
pub use neighbors::{cdp_neighbors, discover_neighbors, lldp_neighbors};

use serde::{Deserialize, Serialize};
use snmp2::v3::{Auth, AuthProtocol as UsmAuthProtocol, Cipher, Security};
use snmp2::{AsyncSession, Oid, Pdu, Value};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::time::timeout;

use crate::config::{SNMP_SET_TIMEOUT, SNMP_WALK_MAX_ROWS, snmp_port, snmp_retries, snmp_timeout};
use crate::error::{ConfigError, ProbeError};

const MIN_V3_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnmpVersion {
    V1,
    #[default]
    V2c,
    V3,
}

impl SnmpVersion {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "v1" | "1" => Ok(SnmpVersion::V1),
            "v2c" | "v2" | "2c" | "2" => Ok(SnmpVersion::V2c),
            "v3" | "3" => Ok(SnmpVersion::V3),
            _ => Err(ConfigError::UnknownVariant {
                field: "snmp version",
                value: raw.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SnmpVersion::V1 => "v1",
            SnmpVersion::V2c => "v2c",
            SnmpVersion::V3 => "v3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProtocol {
    #[default]
    None,
    Md5,
    Sha,
    Sha256,
    Sha384,
    Sha512,
}

impl AuthProtocol {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "" | "none" => Ok(AuthProtocol::None),
            "md5" => Ok(AuthProtocol::Md5),
            "sha" | "sha1" => Ok(AuthProtocol::Sha),
            "sha256" => Ok(AuthProtocol::Sha256),
            "sha384" => Ok(AuthProtocol::Sha384),
            "sha512" => Ok(AuthProtocol::Sha512),
            _ => Err(ConfigError::UnknownVariant {
                field: "auth protocol",
                value: raw.to_string(),
            }),
        }
    }

    fn usm(&self) -> Option<UsmAuthProtocol> {
        match self {
            AuthProtocol::None => None,
            AuthProtocol::Md5 => Some(UsmAuthProtocol::Md5),
            AuthProtocol::Sha => Some(UsmAuthProtocol::Sha1),
            AuthProtocol::Sha256 => Some(UsmAuthProtocol::Sha256),
            AuthProtocol::Sha384 => Some(UsmAuthProtocol::Sha384),
            AuthProtocol::Sha512 => Some(UsmAuthProtocol::Sha512),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivProtocol {
    #[default]
    None,
    Des,
    Aes128,
    Aes192,
    Aes256,
}

impl PrivProtocol {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "" | "none" => Ok(PrivProtocol::None),
            "des" => Ok(PrivProtocol::Des),
            "aes" | "aes128" => Ok(PrivProtocol::Aes128),
            "aes192" => Ok(PrivProtocol::Aes192),
            "aes256" => Ok(PrivProtocol::Aes256),
            _ => Err(ConfigError::UnknownVariant {
                field: "privacy protocol",
                value: raw.to_string(),
            }),
        }
    }

    fn cipher(&self) -> Option<Cipher> {
        match self {
            PrivProtocol::None => None,
            PrivProtocol::Des => Some(Cipher::Des),
            PrivProtocol::Aes128 => Some(Cipher::Aes128),
            PrivProtocol::Aes192 => Some(Cipher::Aes192),
            PrivProtocol::Aes256 => Some(Cipher::Aes256),
        }
    }
}

/// User-based security model parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnmpV3Credentials {
    pub user: String,
    #[serde(default)]
    pub auth_protocol: AuthProtocol,
    #[serde(default)]
    pub auth_password: Option<String>,
    #[serde(default)]
    pub priv_protocol: PrivProtocol,
    #[serde(default)]
    pub priv_password: Option<String>,
}

impl SnmpV3Credentials {
    /// Checks the auth/privacy combination. Every problem found is reported
    /// at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        let auth_pass = self.auth_password.as_deref().unwrap_or_default();
        let priv_pass = self.priv_password.as_deref().unwrap_or_default();

        if self.auth_protocol != AuthProtocol::None {
            if auth_pass.is_empty() {
                problems.push("Authentication password required when auth protocol is specified".to_string());
            } else if auth_pass.chars().count() < MIN_V3_PASSWORD_LEN {
                problems.push("Authentication password must be at least 8 characters".to_string());
            }
        }

        if self.priv_protocol != PrivProtocol::None {
            if self.auth_protocol == AuthProtocol::None {
                problems.push("Authentication must be enabled to use privacy".to_string());
            }
            if priv_pass.is_empty() {
                problems.push("Privacy password required when privacy protocol is specified".to_string());
            } else if priv_pass.chars().count() < MIN_V3_PASSWORD_LEN {
                problems.push("Privacy password must be at least 8 characters".to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::InvalidSnmpV3(problems))
        }
    }

    fn security(&self) -> Security {
        let auth_pass = self.auth_password.as_deref().unwrap_or_default();
        let mut security = Security::new(self.user.as_bytes(), auth_pass.as_bytes());
        let Some(protocol) = self.auth_protocol.usm() else {
            return security.with_auth(Auth::NoAuthNoPriv);
        };
        security = security.with_auth_protocol(protocol);
        match self.priv_protocol.cipher() {
            Some(cipher) => security.with_auth(Auth::AuthPriv {
                cipher,
                privacy_password: self.priv_password.clone().unwrap_or_default().into_bytes(),
            }),
            None => security.with_auth(Auth::AuthNoPriv),
        }
    }
}

/// Where and how to talk SNMP to one agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmpTarget {
    pub ip: IpAddr,
    pub port: u16,
    pub version: SnmpVersion,
    pub community: String,
    pub v3: Option<SnmpV3Credentials>,
    pub timeout: Duration,
    pub retries: u8,
}

impl SnmpTarget {
    /// v1/v2c target with the configured port, timeout and retries
    pub fn community(ip: IpAddr, version: SnmpVersion, community: impl Into<String>) -> Self {
        Self {
            ip,
            port: snmp_port(),
            version,
            community: community.into(),
            v3: None,
            timeout: snmp_timeout(),
            retries: snmp_retries(),
        }
    }

    pub fn v3(ip: IpAddr, credentials: SnmpV3Credentials) -> Self {
        Self {
            v3: Some(credentials),
            ..Self::community(ip, SnmpVersion::V3, String::new())
        }
    }

    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = limit;
        self
    }

    /// Rejects a v3 target whose credentials are missing or inconsistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (self.version, &self.v3) {
            (SnmpVersion::V3, None) => Err(ConfigError::MissingField("v3")),
            (SnmpVersion::V3, Some(creds)) => {
                if creds.user.trim().is_empty() {
                    return Err(ConfigError::MissingField("v3.user"));
                }
                creds.validate()
            }
            _ => Ok(()),
        }
    }
}

/// `(oid, pretty value)` pair
pub type VarBind = (String, String);

/// Typed value for an SNMP SET, converted before any packet is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetValue {
    OctetString(String),
    Integer(i32),
    IpAddress(Ipv4Addr),
    Gauge32(u32),
    Counter32(u32),
    ObjectIdentifier(Vec<u64>),
}

impl SetValue {
    /// Accepts both `octet-string` and `OctetString` spellings of a tag.
    pub fn parse(kind: &str, raw: &str) -> Result<Self, ConfigError> {
        let tag: String = kind
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        let invalid = |reason: String| ConfigError::InvalidSnmpValue {
            kind: kind.to_string(),
            reason,
        };
        match tag.as_str() {
            "octetstring" | "string" => Ok(SetValue::OctetString(raw.to_string())),
            "integer" | "int" => raw
                .trim()
                .parse()
                .map(SetValue::Integer)
                .map_err(|e| invalid(format!("{raw:?} is not a 32-bit integer ({e})"))),
            "ipaddress" => raw
                .trim()
                .parse()
                .map(SetValue::IpAddress)
                .map_err(|_| invalid(format!("{raw:?} is not an IPv4 address"))),
            "gauge32" | "gauge" => raw
                .trim()
                .parse()
                .map(SetValue::Gauge32)
                .map_err(|e| invalid(format!("{raw:?} is not an unsigned 32-bit value ({e})"))),
            "counter32" | "counter" => raw
                .trim()
                .parse()
                .map(SetValue::Counter32)
                .map_err(|e| invalid(format!("{raw:?} is not an unsigned 32-bit value ({e})"))),
            "objectidentifier" | "oid" => parse_oid(raw)
                .map(SetValue::ObjectIdentifier)
                .ok_or_else(|| invalid(format!("{raw:?} is not a dotted OID"))),
            _ => Err(ConfigError::UnknownVariant {
                field: "snmp value type",
                value: kind.to_string(),
            }),
        }
    }
}

/// Result of a SET: bound values on success, `"<status> at <index>"` or the
/// transport error otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub response: Vec<VarBind>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl SetOutcome {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            response: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Dotted OID text into arcs. A leading dot is tolerated.
pub fn parse_oid(raw: &str) -> Option<Vec<u64>> {
    let trimmed = raw.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    let arcs: Option<Vec<u64>> = trimmed.split('.').map(|arc| arc.parse().ok()).collect();
    arcs.filter(|a| a.len() >= 2)
}

/// Last arc of a dotted OID, the row index of a single-index table.
pub fn last_arc(oid: &str) -> &str {
    oid.rsplit('.').next().unwrap_or(oid)
}

/// Suffix after `base.`, the full row index of a table column.
pub fn oid_suffix<'a>(oid: &'a str, base: &str) -> Option<&'a str> {
    oid.trim_start_matches('.')
        .strip_prefix(base.trim_start_matches('.'))
        .and_then(|rest| rest.strip_prefix('.'))
}

/// RFC 3416 error-status names
pub fn error_status_name(status: u32) -> &'static str {
    match status {
        0 => "noError",
        1 => "tooBig",
        2 => "noSuchName",
        3 => "badValue",
        4 => "readOnly",
        5 => "genErr",
        6 => "noAccess",
        7 => "wrongType",
        8 => "wrongLength",
        9 => "wrongEncoding",
        10 => "wrongValue",
        11 => "noCreation",
        12 => "inconsistentValue",
        13 => "resourceUnavailable",
        14 => "commitFailed",
        15 => "undoFailed",
        16 => "authorizationError",
        17 => "notWritable",
        18 => "inconsistentName",
        _ => "unknownError",
    }
}

/// Octet strings that are printable text stay text; anything else is hex.
pub fn render_octets(bytes: &[u8]) -> String {
    let printable = bytes
        .iter()
        .all(|b| b.is_ascii_graphic() || matches!(b, b' ' | b'\t' | b'\r' | b'\n'));
    if printable {
        String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string()
    } else {
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        format!("0x{hex}")
    }
}

/// Pretty form of a varbind value. Exception values render as `None`.
fn render_value(value: &Value<'_>) -> Option<String> {
    match value {
        Value::Integer(v) => Some(v.to_string()),
        Value::OctetString(bytes) => Some(render_octets(bytes)),
        Value::ObjectIdentifier(oid) => Some(oid.to_string()),
        Value::IpAddress(octets) => Some(Ipv4Addr::from(*octets).to_string()),
        Value::Counter32(v) | Value::Unsigned32(v) | Value::Timeticks(v) => Some(v.to_string()),
        Value::Counter64(v) => Some(v.to_string()),
        Value::Boolean(v) => Some(v.to_string()),
        Value::Opaque(bytes) => Some(render_octets(bytes)),
        Value::Null | Value::EndOfMibView | Value::NoSuchObject | Value::NoSuchInstance => None,
        other => Some(format!("{other:?}")),
    }
}

/// Wire form of a SET value. `oid_value` carries the pre-built OID for
/// `ObjectIdentifier`.
fn wire_value<'a>(value: &'a SetValue, oid_value: Option<&'a Oid<'a>>) -> Value<'a> {
    match (value, oid_value) {
        (SetValue::OctetString(s), _) => Value::OctetString(s.as_bytes()),
        (SetValue::Integer(v), _) => Value::Integer(i64::from(*v)),
        (SetValue::IpAddress(ip), _) => Value::IpAddress(ip.octets()),
        (SetValue::Gauge32(v), _) => Value::Unsigned32(*v),
        (SetValue::Counter32(v), _) => Value::Counter32(*v),
        (SetValue::ObjectIdentifier(_), Some(oid)) => Value::ObjectIdentifier(oid.clone()),
        (SetValue::ObjectIdentifier(_), None) => Value::Null,
    }
}

fn snmp_error(err: impl std::fmt::Debug) -> ProbeError {
    ProbeError::Snmp(format!("{err:?}"))
}

fn oid_from_arcs(arcs: &[u64]) -> Result<Oid<'static>, ProbeError> {
    Oid::from(arcs).map_err(|e| ProbeError::Snmp(format!("invalid OID {arcs:?}: {e:?}")))
}

fn oid_from_str(raw: &str) -> Result<Oid<'static>, ProbeError> {
    let arcs = parse_oid(raw).ok_or_else(|| ProbeError::Snmp(format!("invalid OID {raw:?}")))?;
    oid_from_arcs(&arcs)
}

/// Owned copy of a response PDU, so the session can be reused
#[derive(Debug, Default)]
struct Response {
    error_status: u32,
    error_index: u32,
    binds: Vec<(String, Option<String>)>,
}

impl Response {
    fn from_pdu(pdu: Pdu<'_>) -> Self {
        let error_status = pdu.error_status;
        let error_index = pdu.error_index;
        let binds = pdu
            .varbinds
            .map(|(oid, value)| (oid.to_string(), render_value(&value)))
            .collect();
        Self {
            error_status,
            error_index,
            binds,
        }
    }
}

enum Request<'a> {
    Get(&'a Oid<'a>),
    GetNext(&'a Oid<'a>),
    Set(&'a Oid<'a>, &'a SetValue, Option<&'a Oid<'a>>),
}

impl Request<'_> {
    fn name(&self) -> &'static str {
        match self {
            Request::Get(_) => "snmp get",
            Request::GetNext(_) => "snmp getnext",
            Request::Set(..) => "snmp set",
        }
    }
}

/// One open session against one agent
pub struct SnmpClient {
    session: Box<AsyncSession>,
    limit: Duration,
    retries: u8,
}

impl SnmpClient {
    /// Opens a session. v3 targets are validated first and then run the
    /// engine-discovery exchange.
    pub async fn connect(target: &SnmpTarget) -> Result<Self, ProbeError> {
        target
            .validate()
            .map_err(|e| ProbeError::Snmp(e.to_string()))?;
        let addr = SocketAddr::new(target.ip, target.port);
        let limit = target.timeout;

        let session = match (target.version, &target.v3) {
            (SnmpVersion::V3, Some(creds)) => {
                let mut session = timeout(limit, Box::pin(AsyncSession::new_v3(addr, 0, creds.security())))
                    .await
                    .map_err(|_| ProbeError::timeout("snmp session", limit))?
                    .map_err(snmp_error)
                    .map(Box::new)?;
                timeout(limit, Box::pin(session.init()))
                    .await
                    .map_err(|_| ProbeError::timeout("snmp engine discovery", limit))?
                    .map_err(snmp_error)?;
                session
            }
            (SnmpVersion::V1, _) => timeout(limit, Box::pin(AsyncSession::new_v1(addr, target.community.as_bytes(), 0)))
                .await
                .map_err(|_| ProbeError::timeout("snmp session", limit))?
                .map_err(snmp_error)
                .map(Box::new)?,
            _ => timeout(limit, Box::pin(AsyncSession::new_v2c(addr, target.community.as_bytes(), 0)))
                .await
                .map_err(|_| ProbeError::timeout("snmp session", limit))?
                .map_err(snmp_error)
                .map(Box::new)?,
        };

        Ok(Self {
            session,
            limit,
            retries: target.retries,
        })
    }

    pub fn set_timeout(&mut self, limit: Duration) {
        self.limit = limit;
    }

    async fn request(&mut self, request: Request<'_>) -> Result<Response, ProbeError> {
        let mut last_err = ProbeError::timeout(request.name(), self.limit);
        for _ in 0..=self.retries {
            let outcome = match &request {
                Request::Get(oid) => timeout(self.limit, Box::pin(self.session.get(oid)))
                    .await
                    .map(|r| r.map(Response::from_pdu)),
                Request::GetNext(oid) => timeout(self.limit, Box::pin(self.session.getnext(oid)))
                    .await
                    .map(|r| r.map(Response::from_pdu)),
                Request::Set(oid, value, oid_value) => {
                    let wire = wire_value(value, *oid_value);
                    timeout(self.limit, Box::pin(self.session.set(&[(*oid, wire)])))
                        .await
                        .map(|r| r.map(Response::from_pdu))
                }
            };
            match outcome {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => last_err = snmp_error(e),
                Err(_) => last_err = ProbeError::timeout(request.name(), self.limit),
            }
        }
        Err(last_err)
    }

    /// Single scalar, pretty-printed. Errors and exception values are `None`.
    pub async fn get(&mut self, oid: &str) -> Option<String> {
        let oid = oid_from_str(oid).ok()?;
        match self.request(Request::Get(&oid)).await {
            Ok(resp) if resp.error_status == 0 => resp.binds.into_iter().next().and_then(|(_, v)| v),
            Ok(_) => None,
            Err(e) => {
                crate::log_debug!("SNMP get {} failed: {}", oid, e);
                None
            }
        }
    }

    /// Walks the subtree under `base` with GETNEXT. Stops at the end of the
    /// subtree, at an error or at the row cap; whatever was collected is
    /// returned.
    pub async fn walk(&mut self, base: &str) -> Vec<VarBind> {
        let mut rows = Vec::new();
        let Some(base_arcs) = parse_oid(base) else {
            return rows;
        };
        let base_text = base_arcs.iter().map(u64::to_string).collect::<Vec<_>>().join(".");
        let mut cursor = base_arcs;

        while rows.len() < SNMP_WALK_MAX_ROWS {
            let Ok(oid) = oid_from_arcs(&cursor) else {
                break;
            };
            let resp = match self.request(Request::GetNext(&oid)).await {
                Ok(resp) => resp,
                Err(e) => {
                    crate::log_debug!("SNMP walk of {} stopped after {} rows: {}", base_text, rows.len(), e);
                    break;
                }
            };
            if resp.error_status != 0 {
                break;
            }
            let Some((next_oid, value)) = resp.binds.into_iter().next() else {
                break;
            };
            if oid_suffix(&next_oid, &base_text).is_none() {
                break;
            }
            let Some(next_arcs) = parse_oid(&next_oid) else {
                break;
            };
            // An agent answering with a non-increasing OID would loop forever.
            if next_arcs <= cursor {
                break;
            }
            let Some(value) = value else {
                break;
            };
            rows.push((next_oid, value));
            cursor = next_arcs;
        }
        rows
    }

    /// Writes one typed value. Failures come back inside the outcome.
    pub async fn set(&mut self, oid: &str, value: &SetValue) -> SetOutcome {
        let Ok(oid) = oid_from_str(oid) else {
            return SetOutcome::failed(format!("invalid OID {oid:?}"));
        };
        let oid_value = match value {
            SetValue::ObjectIdentifier(arcs) => match oid_from_arcs(arcs) {
                Ok(o) => Some(o),
                Err(e) => return SetOutcome::failed(e.to_string()),
            },
            _ => None,
        };

        match self.request(Request::Set(&oid, value, oid_value.as_ref())).await {
            Ok(resp) if resp.error_status != 0 => SetOutcome::failed(format!(
                "{} at {}",
                error_status_name(resp.error_status),
                resp.error_index
            )),
            Ok(resp) => SetOutcome {
                ok: true,
                response: resp
                    .binds
                    .into_iter()
                    .map(|(oid, value)| (oid, value.unwrap_or_default()))
                    .collect(),
                error: None,
            },
            Err(e) => SetOutcome::failed(e.to_string()),
        }
    }
}

/// One-shot GET. Any failure, including an unreachable agent, is `None`.
pub async fn snmp_get(target: &SnmpTarget, oid: &str) -> Option<String> {
    match Box::pin(SnmpClient::connect(target)).await {
        Ok(mut client) => client.get(oid).await,
        Err(e) => {
            crate::log_debug!("SNMP session to {} failed: {}", target.ip, e);
            None
        }
    }
}

/// One-shot WALK with partial results.
pub async fn snmp_walk(target: &SnmpTarget, oid: &str) -> Vec<VarBind> {
    match Box::pin(SnmpClient::connect(target)).await {
        Ok(mut client) => client.walk(oid).await,
        Err(e) => {
            crate::log_debug!("SNMP session to {} failed: {}", target.ip, e);
            Vec::new()
        }
    }
}

/// Validates credentials, OID and value before any packet leaves, then
/// writes. Only validation problems are returned as `Err`.
pub async fn snmp_set(target: &SnmpTarget, oid: &str, kind: &str, raw_value: &str) -> Result<SetOutcome, ConfigError> {
    target.validate()?;
    if oid.trim().is_empty() {
        return Err(ConfigError::MissingField("oid"));
    }
    if parse_oid(oid).is_none() {
        return Err(ConfigError::InvalidSnmpValue {
            kind: "oid".to_string(),
            reason: format!("{oid:?} is not a dotted OID"),
        });
    }
    let value = SetValue::parse(kind, raw_value)?;

    let target = target.clone().with_timeout(target.timeout.max(SNMP_SET_TIMEOUT));
    let outcome = match Box::pin(SnmpClient::connect(&target)).await {
        Ok(mut client) => client.set(oid, &value).await,
        Err(e) => SetOutcome::failed(e.to_string()),
    };
    crate::log_stderr!(
        "SNMP set {} on {} ({}): {}",
        oid,
        target.ip,
        target.version.as_str(),
        if outcome.ok { "ok" } else { "failed" }
    );
    Ok(outcome)
}
