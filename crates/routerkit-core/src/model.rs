// ── Service-level records ──
//
// What the services persist and report, on top of the wire types from
// routerkit-api.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use routerkit_api::{ConnectedDevice, Protocol, RouterId, RouterStatus};
use serde::{Deserialize, Serialize};
use strum::Display;

// ── Identifiers ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(pub u64);

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u64);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Customer ────────────────────────────────────────────────────────

/// The slice of a customer account the router services need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub username: String,
}

impl Customer {
    pub fn new(id: u64, username: impl Into<String>) -> Self {
        Self {
            id: CustomerId(id),
            username: username.into(),
        }
    }
}

// ── Port forwarding ─────────────────────────────────────────────────

/// A persisted port-forwarding rule.
///
/// Within one router, at most one active rule holds a given external port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForwardingRule {
    pub id: RuleId,
    pub router_id: RouterId,
    /// `None` for rules read back from a router that no customer owns.
    pub customer_id: Option<CustomerId>,
    pub external_port: u16,
    pub internal_ip: IpAddr,
    pub internal_port: u16,
    pub protocol: Protocol,
    pub is_active: bool,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Insert form of [`PortForwardingRule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPortRule {
    pub router_id: RouterId,
    pub customer_id: Option<CustomerId>,
    pub external_port: u16,
    pub internal_ip: IpAddr,
    pub internal_port: u16,
    pub protocol: Protocol,
    pub description: String,
}

/// Outcome of removing a customer's rules from one router.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    /// Rules confirmed gone on the router and deactivated.
    pub removed: Vec<RuleId>,
    /// Rules left active, with the driver's reason.
    pub failed: Vec<(RuleId, String)>,
}

impl RemovalReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

// ── Connectivity ────────────────────────────────────────────────────

/// Tri-state result of a connection test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Connectivity {
    /// Reachable and authenticated.
    Online,
    /// Reachable, credentials refused.
    LoginFailed,
    Unreachable,
}

/// A connection test with whatever status the router returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionTest {
    pub connectivity: Connectivity,
    pub status: Option<RouterStatus>,
    pub message: String,
    pub checked_at: DateTime<Utc>,
}

/// Status answer from [`RouterManager::get_router_status`](crate::RouterManager::get_router_status).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub is_online: bool,
    pub last_checked: Option<DateTime<Utc>>,
    /// `true` when answered from the last check instead of a fresh probe.
    pub cached: bool,
    pub status: Option<RouterStatus>,
    pub message: String,
}

// ── Devices ─────────────────────────────────────────────────────────

/// Device category guessed from its hostname.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceKind {
    Phone,
    Tablet,
    Tv,
    Computer,
    Other,
}

const KIND_KEYWORDS: &[(DeviceKind, &[&str])] = &[
    (DeviceKind::Phone, &["iphone", "android", "mobile", "phone"]),
    (DeviceKind::Tablet, &["ipad", "tablet"]),
    (DeviceKind::Tv, &["tv", "smarttv", "roku", "firetv"]),
    (DeviceKind::Computer, &["laptop", "macbook", "pc", "desktop"]),
];

impl DeviceKind {
    /// First category whose keyword appears in `hostname` (case-insensitive).
    pub fn detect(hostname: Option<&str>) -> Self {
        let Some(name) = hostname.map(str::to_ascii_lowercase) else {
            return Self::Other;
        };
        KIND_KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| name.contains(w)))
            .map_or(Self::Other, |(kind, _)| *kind)
    }
}

/// A device as last seen on a router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub router_id: RouterId,
    pub device: ConnectedDevice,
    pub kind: DeviceKind,
    pub is_active: bool,
}

impl DeviceRecord {
    pub fn new(router_id: RouterId, device: ConnectedDevice) -> Self {
        Self {
            router_id,
            kind: DeviceKind::detect(device.hostname.as_deref()),
            device,
            is_active: true,
        }
    }
}

// ── Reports ─────────────────────────────────────────────────────────

/// One full monitor pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub probed: usize,
    pub online: usize,
    pub login_failed: usize,
    pub unreachable: usize,
    /// Probes that failed for a reason other than reachability or login.
    pub errors: usize,
    /// Online routers whose device list could not be read.
    pub device_sync_failed: usize,
}

/// Service-wide counters plus a probe of one router.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub router_count: usize,
    pub online_routers: usize,
    pub active_port_rules: usize,
    pub sample: Option<SampleProbe>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleProbe {
    pub router: String,
    pub connectivity: Option<Connectivity>,
    pub message: String,
}
