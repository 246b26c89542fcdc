// ── Wire-level domain types ──
//
// Types every driver speaks: the connection profile a driver is built
// from, and the normalized status / device / rule records it returns.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

use crate::error::Error;

// ── Identifiers ─────────────────────────────────────────────────────

/// Stable identifier of a router connection profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouterId(pub u64);

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tenant (ISP) owning a router profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub u64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Enumerations ────────────────────────────────────────────────────

/// Router vendor tag. Parsed case-insensitively.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RouterType {
    Huawei,
    Mikrotik,
    Tenda,
    #[strum(to_string = "tplink", serialize = "tp-link")]
    Tplink,
    Ubiquiti,
    Other,
}

/// WiFi security mode requested by the caller, before vendor mapping.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SecurityType {
    Wpa2,
    Wpa3,
    Wpa,
    Wep,
    None,
}

/// Port-forwarding protocol.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Protocol {
    Tcp,
    Udp,
    Both,
}

impl Protocol {
    /// The concrete protocols a rule with this tag installs.
    pub fn expand(self) -> &'static [Protocol] {
        match self {
            Self::Tcp => &[Self::Tcp],
            Self::Udp => &[Self::Udp],
            Self::Both => &[Self::Tcp, Self::Udp],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Both => "both",
        }
    }

    /// Loose parse of vendor spellings ("TCP", "tcp/udp", "ALL", "6", ...).
    pub fn from_vendor(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tcp" | "6" | "1" => Some(Self::Tcp),
            "udp" | "17" | "2" => Some(Self::Udp),
            "both" | "tcp/udp" | "tcp+udp" | "tcpudp" | "all" | "0" | "3" => Some(Self::Both),
            _ => None,
        }
    }
}

// ── MacAddress ──────────────────────────────────────────────────────

/// MAC address, normalized to lowercase colon-separated format (aa:bb:cc:dd:ee:ff).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MacAddress(String);

impl MacAddress {
    /// Create a normalized MAC address from any common format.
    /// Accepts colon-separated, dash-separated, or bare hex.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let lowered = raw.as_ref().trim().to_lowercase().replace('-', ":");
        if lowered.len() == 12 && lowered.chars().all(|c| c.is_ascii_hexdigit()) {
            let pairs: Vec<&str> = (0..6).filter_map(|i| lowered.get(i * 2..i * 2 + 2)).collect();
            return Self(pairs.join(":"));
        }
        Self(lowered)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

// ── RouterProfile ───────────────────────────────────────────────────

/// Everything a driver needs to reach and authenticate against one router.
#[derive(Debug, Clone)]
pub struct RouterProfile {
    pub id: RouterId,
    pub tenant_id: TenantId,
    pub name: String,
    pub router_type: RouterType,
    pub model: String,
    pub ip_address: IpAddr,
    pub username: String,
    pub password: SecretString,
    pub web_port: u16,
    /// RouterOS API port; only MikroTik uses it.
    pub api_port: u16,
    pub use_https: bool,
    pub is_online: bool,
    pub last_checked: Option<DateTime<Utc>>,
}

impl RouterProfile {
    pub const DEFAULT_WEB_PORT: u16 = 80;
    pub const DEFAULT_API_PORT: u16 = 8728;

    pub fn new(id: RouterId, router_type: RouterType, ip_address: IpAddr) -> Self {
        Self {
            id,
            tenant_id: TenantId(1),
            name: format!("router-{id}"),
            router_type,
            model: String::new(),
            ip_address,
            username: "admin".into(),
            password: SecretString::from(String::new()),
            web_port: Self::DEFAULT_WEB_PORT,
            api_port: Self::DEFAULT_API_PORT,
            use_https: false,
            is_online: false,
            last_checked: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: SecretString) -> Self {
        self.username = username.into();
        self.password = password;
        self
    }

    pub fn with_web_port(mut self, port: u16) -> Self {
        self.web_port = port;
        self
    }

    /// Root URL of the router's web interface.
    pub fn web_base_url(&self) -> Result<Url, Error> {
        let scheme = if self.use_https { "https" } else { "http" };
        let host = match self.ip_address {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{v6}]"),
        };
        Ok(Url::parse(&format!("{scheme}://{host}:{}/", self.web_port))?)
    }

    /// `ip:port` label used in logs and error messages.
    pub fn web_target(&self) -> String {
        format!("{}:{}", self.ip_address, self.web_port)
    }
}

// ── Driver results ──────────────────────────────────────────────────

/// Normalized router status.
///
/// `parse_error` is set when the router answered but the body could not
/// be decoded; `is_online` stays `true` in that case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterStatus {
    pub is_online: bool,
    pub model: Option<String>,
    pub identity: Option<String>,
    pub serial: Option<String>,
    pub firmware_version: Option<String>,
    pub hardware_version: Option<String>,
    pub uptime: Option<String>,
    pub wan_status: Option<String>,
    pub wan_ip: Option<String>,
    pub cpu_load: Option<String>,
    pub memory_used: Option<String>,
    pub connected_clients: Option<u32>,
    pub parse_error: Option<String>,
}

impl RouterStatus {
    pub fn online() -> Self {
        Self {
            is_online: true,
            ..Self::default()
        }
    }

    /// Reachable router whose reply could not be decoded.
    pub fn unparsed(message: impl Into<String>) -> Self {
        Self {
            is_online: true,
            parse_error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Where a connected-device record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceSource {
    Dhcp,
    Wireless,
    HostTable,
}

/// A client currently attached to a router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedDevice {
    pub mac_address: MacAddress,
    pub ip_address: Option<IpAddr>,
    pub hostname: Option<String>,
    pub interface: Option<String>,
    pub signal_strength: Option<i32>,
    pub source: DeviceSource,
    pub last_seen: DateTime<Utc>,
}

impl ConnectedDevice {
    pub fn new(mac: impl AsRef<str>, source: DeviceSource) -> Self {
        Self {
            mac_address: MacAddress::new(mac),
            ip_address: None,
            hostname: None,
            interface: None,
            signal_strength: None,
            source,
            last_seen: Utc::now(),
        }
    }
}

/// A port-forwarding rule as read back from a router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRule {
    /// Vendor identifier (Huawei index, RouterOS `.id`, Tenda list id).
    pub id: String,
    pub name: String,
    pub external_port: u16,
    pub internal_ip: Option<IpAddr>,
    pub internal_port: u16,
    pub protocol: Protocol,
    pub enabled: bool,
    /// Created by routerkit, detected from the name or comment prefix.
    pub managed: bool,
}

/// Parse an optional IP field, treating empty and unparsable values as absent.
pub(crate) fn parse_ip(raw: Option<&str>) -> Option<IpAddr> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}

/// Keep a string field only if it carries a non-blank value.
pub(crate) fn non_empty(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}
