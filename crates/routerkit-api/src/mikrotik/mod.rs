// MikroTik driver over the RouterOS binary API.
//
// The socket is reached through the `RouterOsConnector` seam: production
// uses `TcpConnector`, tests plug in a scripted connector.

mod protocol;

pub use protocol::{Attrs, Reply, RouterOsConnection, attr, encode_length, read_length};

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::driver::RouterDriver;
use crate::error::Error;
use crate::model::{
    ConnectedDevice, DeviceSource, DriverRule, MacAddress, Protocol, RouterProfile, RouterStatus,
    SecurityType, non_empty, parse_ip,
};
use crate::transport::TransportConfig;

const NAT: &str = "/ip/firewall/nat";
const FILTER: &str = "/ip/firewall/filter";

/// Comment prefix that tags rules created by routerkit.
pub const COMMENT_PREFIX: &str = "cloudconnect-";

/// Correlation comment shared by every rule backing one forward.
pub fn rule_comment(external_port: u16, protocol: Protocol) -> String {
    format!("{COMMENT_PREFIX}{external_port}-{}", protocol.as_str())
}

/// Security-profile values for one WiFi security type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WirelessSecurity {
    pub mode: &'static str,
    pub authentication_types: Option<&'static str>,
}

/// Vendor mapping. WPA3 and WEP have no wireless-package equivalent here.
pub fn mikrotik_security(security: SecurityType) -> Option<WirelessSecurity> {
    match security {
        SecurityType::Wpa2 => Some(WirelessSecurity {
            mode: "dynamic-keys",
            authentication_types: Some("wpa2-psk"),
        }),
        SecurityType::Wpa => Some(WirelessSecurity {
            mode: "dynamic-keys",
            authentication_types: Some("wpa-psk"),
        }),
        SecurityType::None => Some(WirelessSecurity {
            mode: "none",
            authentication_types: None,
        }),
        SecurityType::Wpa3 | SecurityType::Wep => None,
    }
}

// ── Connection seam ─────────────────────────────────────────────────

/// An authenticated API session.
#[async_trait]
pub trait RouterOsApi: Send {
    async fn call(&mut self, path: &str, words: &[String]) -> Result<Reply, Error>;
    async fn close(&mut self);
}

/// Opens authenticated API sessions for a profile.
#[async_trait]
pub trait RouterOsConnector: Send + Sync {
    async fn open(&self, profile: &RouterProfile) -> Result<Box<dyn RouterOsApi>, Error>;
}

#[async_trait]
impl<S> RouterOsApi for RouterOsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn call(&mut self, path: &str, words: &[String]) -> Result<Reply, Error> {
        RouterOsConnection::call(self, path, words).await
    }

    async fn close(&mut self) {
        self.shutdown().await;
    }
}

/// Plain TCP connector with a connect/read timeout.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl RouterOsConnector for TcpConnector {
    async fn open(&self, profile: &RouterProfile) -> Result<Box<dyn RouterOsApi>, Error> {
        let target = format!("{}:{}", profile.ip_address, profile.api_port);
        debug!("connecting to RouterOS API at {target}");

        let stream = match timeout(self.timeout, TcpStream::connect((profile.ip_address, profile.api_port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Error::Connection {
                    target,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(Error::Timeout {
                    target,
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let mut conn = RouterOsConnection::new(stream, target, self.timeout);
        conn.login(&profile.username, &profile.password).await?;
        Ok(Box::new(conn))
    }
}

// ── Driver ──────────────────────────────────────────────────────────

/// Driver for MikroTik RouterOS devices.
pub struct MikroTikDriver {
    profile: RouterProfile,
    connector: Arc<dyn RouterOsConnector>,
    api: Option<Box<dyn RouterOsApi>>,
}

impl MikroTikDriver {
    pub fn new(profile: RouterProfile, transport: &TransportConfig) -> Self {
        Self::with_connector(profile, Arc::new(TcpConnector::new(transport.timeout)))
    }

    pub fn with_connector(profile: RouterProfile, connector: Arc<dyn RouterOsConnector>) -> Self {
        Self {
            profile,
            connector,
            api: None,
        }
    }

    /// Run one command, connecting first if needed. A socket-level failure
    /// drops the session so the next call reconnects.
    async fn call(&mut self, path: &str, words: &[String]) -> Result<Reply, Error> {
        self.ensure_connected().await?;
        let Some(api) = self.api.as_mut() else {
            return Err(Error::Connection {
                target: self.profile.ip_address.to_string(),
                reason: "session closed".into(),
            });
        };
        let result = api.call(path, words).await;
        if result.as_ref().is_err_and(Error::is_unreachable) {
            self.api = None;
        }
        result
    }

    /// First record of a `print`, tolerating a refused command.
    async fn print_first(&mut self, path: &str) -> Result<Option<Attrs>, Error> {
        match self.call(path, &[]).await {
            Ok(reply) => Ok(reply.records.into_iter().next()),
            Err(e) if e.is_unreachable() => Err(e),
            Err(e) => {
                warn!(router = %self.profile.ip_address, path, error = %e, "RouterOS print failed");
                Ok(None)
            }
        }
    }

    async fn print_all_or_empty(&mut self, path: &str) -> Result<Vec<Attrs>, Error> {
        match self.call(path, &[]).await {
            Ok(reply) => Ok(reply.records),
            Err(e) if e.is_unreachable() => Err(e),
            Err(e) => {
                warn!(router = %self.profile.ip_address, path, error = %e, "RouterOS print failed");
                Ok(Vec::new())
            }
        }
    }

    /// Remove `created` rules newest first. Returns `cause` when every
    /// rule was removed, `PartialApply` otherwise.
    async fn rollback(&mut self, created: Vec<(&'static str, String)>, cause: Error) -> Error {
        let mut leftover = Vec::new();
        for (menu, id) in created.into_iter().rev() {
            if let Err(e) = self.call(&format!("{menu}/remove"), &[attr(".id", &id)]).await {
                warn!(router = %self.profile.ip_address, menu, id = %id, error = %e, "rollback failed");
                leftover.push(format!("{menu} {id}"));
            }
        }
        if leftover.is_empty() {
            cause
        } else {
            Error::PartialApply {
                operation: "port forward create".into(),
                message: cause.to_string(),
                leftover,
            }
        }
    }
}

fn nat_words(external_port: u16, internal_ip: IpAddr, internal_port: u16, protocol: Protocol, comment: &str) -> Vec<String> {
    vec![
        attr("chain", "dstnat"),
        attr("action", "dst-nat"),
        attr("protocol", protocol.as_str()),
        attr("dst-port", &external_port.to_string()),
        attr("to-addresses", &internal_ip.to_string()),
        attr("to-ports", &internal_port.to_string()),
        attr("comment", comment),
    ]
}

fn filter_words(internal_ip: IpAddr, internal_port: u16, protocol: Protocol, comment: &str) -> Vec<String> {
    vec![
        attr("chain", "forward"),
        attr("action", "accept"),
        attr("protocol", protocol.as_str()),
        attr("dst-address", &internal_ip.to_string()),
        attr("dst-port", &internal_port.to_string()),
        attr("comment", comment),
    ]
}

/// Leading integer of a RouterOS signal reading such as `-65dBm@6Mbps`.
fn parse_signal(raw: &str) -> Option<i32> {
    let end = raw
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map_or(raw.len(), |(i, _)| i);
    raw.get(..end)?.parse().ok()
}

fn merge_status(routerboard: Option<&Attrs>, resource: Option<&Attrs>, identity: Option<&Attrs>) -> RouterStatus {
    let get = |attrs: Option<&Attrs>, key: &str| attrs.and_then(|a| non_empty(a.get(key).map(String::as_str)));

    let memory_used = resource.and_then(|r| {
        let total: u64 = r.get("total-memory")?.parse().ok()?;
        let free: u64 = r.get("free-memory")?.parse().ok()?;
        Some(total.saturating_sub(free).to_string())
    });

    RouterStatus {
        is_online: true,
        model: get(routerboard, "model").or_else(|| get(resource, "board-name")),
        serial: get(routerboard, "serial-number"),
        firmware_version: get(resource, "version").or_else(|| get(routerboard, "current-firmware")),
        hardware_version: get(resource, "architecture-name"),
        uptime: get(resource, "uptime"),
        cpu_load: get(resource, "cpu-load"),
        memory_used,
        identity: get(identity, "name"),
        ..RouterStatus::default()
    }
}

/// Merge DHCP leases and wireless registrations into one list keyed by MAC.
/// DHCP wins for IP and hostname; wireless fills signal and interface.
fn merge_devices(leases: &[Attrs], registrations: &[Attrs]) -> Vec<ConnectedDevice> {
    let mut devices: Vec<ConnectedDevice> = Vec::new();
    let mut index: HashMap<MacAddress, usize> = HashMap::new();

    for lease in leases {
        let Some(active_ip) = non_empty(lease.get("active-address").map(String::as_str)) else {
            continue;
        };
        let mac = lease
            .get("active-mac-address")
            .or_else(|| lease.get("mac-address"))
            .map(String::as_str);
        let Some(mac) = non_empty(mac) else {
            continue;
        };
        let mut device = ConnectedDevice::new(mac, DeviceSource::Dhcp);
        device.ip_address = parse_ip(Some(active_ip.as_str()));
        device.hostname = non_empty(lease.get("host-name").map(String::as_str));
        index.insert(device.mac_address.clone(), devices.len());
        devices.push(device);
    }

    for reg in registrations {
        let Some(mac) = non_empty(reg.get("mac-address").map(String::as_str)) else {
            continue;
        };
        let mac = MacAddress::new(mac);
        let interface = non_empty(reg.get("interface").map(String::as_str));
        let signal = reg.get("signal-strength").and_then(|s| parse_signal(s));

        if let Some(&i) = index.get(&mac) {
            if let Some(existing) = devices.get_mut(i) {
                existing.interface = interface.or_else(|| existing.interface.take());
                existing.signal_strength = signal.or(existing.signal_strength);
            }
            continue;
        }

        let mut device = ConnectedDevice::new(mac.as_str(), DeviceSource::Wireless);
        device.ip_address = parse_ip(reg.get("last-ip").map(String::as_str));
        device.interface = interface;
        device.signal_strength = signal;
        index.insert(mac, devices.len());
        devices.push(device);
    }

    devices
}

fn parse_nat_rule(attrs: &Attrs) -> Option<DriverRule> {
    if attrs.get("action").map(String::as_str) != Some("dst-nat") {
        return None;
    }
    let external_port: u16 = attrs.get("dst-port")?.parse().ok()?;
    let comment = attrs.get("comment").cloned().unwrap_or_default();
    Some(DriverRule {
        id: attrs.get(".id").cloned().unwrap_or_default(),
        managed: comment.starts_with(COMMENT_PREFIX),
        name: comment,
        external_port,
        internal_ip: parse_ip(attrs.get("to-addresses").map(String::as_str)),
        internal_port: attrs
            .get("to-ports")
            .and_then(|p| p.parse().ok())
            .unwrap_or(external_port),
        protocol: attrs
            .get("protocol")
            .and_then(|p| Protocol::from_vendor(p))
            .unwrap_or(Protocol::Tcp),
        enabled: attrs.get("disabled").map(String::as_str) != Some("true"),
    })
}

#[async_trait]
impl RouterDriver for MikroTikDriver {
    fn profile(&self) -> &RouterProfile {
        &self.profile
    }

    fn is_connected(&self) -> bool {
        self.api.is_some()
    }

    async fn connect(&mut self) -> Result<(), Error> {
        if self.api.is_some() {
            return Ok(());
        }
        let api = self.connector.open(&self.profile).await?;
        info!(router = %self.profile.ip_address, port = self.profile.api_port, "connected to MikroTik router");
        self.api = Some(api);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut api) = self.api.take() {
            api.close().await;
            debug!(router = %self.profile.ip_address, "RouterOS session closed");
        }
    }

    async fn get_status(&mut self) -> Result<RouterStatus, Error> {
        self.ensure_connected().await?;

        let routerboard = self.print_first("/system/routerboard/print").await?;
        let resource = self.print_first("/system/resource/print").await?;
        let identity = self.print_first("/system/identity/print").await?;

        if routerboard.is_none() && resource.is_none() && identity.is_none() {
            return Ok(RouterStatus::unparsed("no system endpoint returned data"));
        }
        Ok(merge_status(routerboard.as_ref(), resource.as_ref(), identity.as_ref()))
    }

    async fn get_connected_devices(&mut self) -> Result<Vec<ConnectedDevice>, Error> {
        let leases = self.print_all_or_empty("/ip/dhcp-server/lease/print").await?;
        let registrations = self
            .print_all_or_empty("/interface/wireless/registration-table/print")
            .await?;
        Ok(merge_devices(&leases, &registrations))
    }

    async fn change_wifi_settings(
        &mut self,
        ssid: &str,
        password: &SecretString,
        security: SecurityType,
    ) -> Result<(), Error> {
        let mapped = mikrotik_security(security).ok_or(Error::UnsupportedSecurity {
            vendor: "MikroTik",
            security,
        })?;

        let interfaces = self.call("/interface/wireless/print", &[]).await?;
        let iface = interfaces
            .records
            .first()
            .ok_or_else(|| Error::parse("/interface/wireless/print", "no wireless interface"))?;
        let name = iface
            .get("name")
            .cloned()
            .ok_or_else(|| Error::parse("/interface/wireless/print", "interface without a name"))?;
        let profile_name = iface
            .get("security-profile")
            .cloned()
            .unwrap_or_else(|| "default".into());

        let mut words = vec![attr(".id", &profile_name), attr("mode", mapped.mode)];
        if let Some(auth) = mapped.authentication_types {
            let key = password.expose_secret();
            words.push(attr("authentication-types", auth));
            words.push(attr("unicast-ciphers", "aes-ccm"));
            words.push(attr("group-ciphers", "aes-ccm"));
            words.push(attr("wpa-pre-shared-key", key));
            words.push(attr("wpa2-pre-shared-key", key));
        }
        self.call("/interface/wireless/security-profiles/set", &words).await?;
        self.call("/interface/wireless/set", &[attr(".id", &name), attr("ssid", ssid)])
            .await?;

        info!(router = %self.profile.ip_address, interface = %name, ssid, security = %security, "WiFi settings updated");
        Ok(())
    }

    async fn reboot(&mut self) -> Result<(), Error> {
        self.ensure_connected().await?;
        match self.call("/system/reboot", &[]).await {
            Ok(_) => {}
            Err(e) if e.is_unreachable() => {
                debug!(error = %e, "socket dropped after reboot command");
            }
            Err(e) => return Err(e),
        }
        info!(router = %self.profile.ip_address, "reboot requested");
        self.disconnect().await;
        Ok(())
    }

    async fn create_port_forwarding(
        &mut self,
        external_port: u16,
        internal_ip: IpAddr,
        internal_port: u16,
        protocol: Protocol,
    ) -> Result<(), Error> {
        self.ensure_connected().await?;
        let comment = rule_comment(external_port, protocol);
        let mut created: Vec<(&'static str, String)> = Vec::new();

        for &proto in protocol.expand() {
            let steps = [
                (NAT, nat_words(external_port, internal_ip, internal_port, proto, &comment)),
                (FILTER, filter_words(internal_ip, internal_port, proto, &comment)),
            ];
            for (menu, words) in steps {
                let outcome = self.call(&format!("{menu}/add"), &words).await.and_then(|reply| {
                    reply
                        .ret()
                        .map(ToOwned::to_owned)
                        .ok_or_else(|| Error::parse(format!("{menu}/add"), "no id returned"))
                });
                match outcome {
                    Ok(id) => created.push((menu, id)),
                    Err(e) => {
                        warn!(
                            router = %self.profile.ip_address,
                            port = external_port,
                            protocol = %proto,
                            error = %e,
                            "port forward step failed, rolling back"
                        );
                        return Err(self.rollback(created, e).await);
                    }
                }
            }
        }

        info!(
            router = %self.profile.ip_address,
            port = external_port,
            protocol = %protocol,
            rules = created.len(),
            "port forward created"
        );
        Ok(())
    }

    async fn get_port_forwarding_rules(&mut self) -> Result<Vec<DriverRule>, Error> {
        let reply = self.call(&format!("{NAT}/print"), &[]).await?;
        Ok(reply.records.iter().filter_map(parse_nat_rule).collect())
    }

    async fn remove_port_forwarding(
        &mut self,
        external_port: u16,
        protocol: Protocol,
    ) -> Result<(), Error> {
        let comment = rule_comment(external_port, protocol);
        let mut targets: Vec<(&'static str, String)> = Vec::new();
        for menu in [NAT, FILTER] {
            let reply = self.call(&format!("{menu}/print"), &[]).await?;
            targets.extend(
                reply
                    .records
                    .iter()
                    .filter(|r| r.get("comment") == Some(&comment))
                    .filter_map(|r| r.get(".id").map(|id| (menu, id.clone()))),
            );
        }

        if targets.is_empty() {
            return Err(Error::NotFound {
                what: format!("rules tagged {comment}"),
            });
        }
        for (menu, id) in &targets {
            self.call(&format!("{menu}/remove"), &[attr(".id", id)]).await?;
        }
        info!(
            router = %self.profile.ip_address,
            port = external_port,
            protocol = %protocol,
            rules = targets.len(),
            "port forward removed"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attrs {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
    }

    #[test]
    fn wpa3_and_wep_are_not_mapped() {
        assert!(mikrotik_security(SecurityType::Wpa3).is_none());
        assert!(mikrotik_security(SecurityType::Wep).is_none());
        assert_eq!(mikrotik_security(SecurityType::Wpa2).unwrap().authentication_types, Some("wpa2-psk"));
        assert_eq!(mikrotik_security(SecurityType::None).unwrap().mode, "none");
    }

    #[test]
    fn signal_strength_parses_leading_integer() {
        assert_eq!(parse_signal("-65dBm@6Mbps"), Some(-65));
        assert_eq!(parse_signal("-71"), Some(-71));
        assert_eq!(parse_signal("n/a"), None);
    }

    #[test]
    fn devices_are_deduplicated_by_mac() {
        let leases = vec![
            attrs(&[
                ("active-address", "192.168.88.10"),
                ("active-mac-address", "AA:BB:CC:00:00:01"),
                ("host-name", "alice-phone"),
            ]),
            attrs(&[("address", "192.168.88.11"), ("mac-address", "AA:BB:CC:00:00:02")]),
        ];
        let registrations = vec![
            attrs(&[
                ("mac-address", "aa:bb:cc:00:00:01"),
                ("interface", "wlan1"),
                ("signal-strength", "-60dBm@54Mbps"),
            ]),
            attrs(&[("mac-address", "AA:BB:CC:00:00:03"), ("interface", "wlan1")]),
        ];

        let devices = merge_devices(&leases, &registrations);
        assert_eq!(devices.len(), 2, "inactive lease skipped, shared MAC merged");

        let alice = &devices[0];
        assert_eq!(alice.hostname.as_deref(), Some("alice-phone"));
        assert_eq!(alice.ip_address, Some("192.168.88.10".parse().unwrap()));
        assert_eq!(alice.interface.as_deref(), Some("wlan1"));
        assert_eq!(alice.signal_strength, Some(-60));
        assert_eq!(alice.source, DeviceSource::Dhcp);

        assert_eq!(devices[1].source, DeviceSource::Wireless);
    }

    #[test]
    fn status_merges_partial_sources() {
        let resource = attrs(&[
            ("version", "7.14.2"),
            ("uptime", "3d4h"),
            ("cpu-load", "4"),
            ("total-memory", "1000"),
            ("free-memory", "400"),
            ("board-name", "hAP ac2"),
        ]);
        let status = merge_status(None, Some(&resource), None);
        assert!(status.is_online);
        assert_eq!(status.model.as_deref(), Some("hAP ac2"));
        assert_eq!(status.memory_used.as_deref(), Some("600"));
        assert!(status.identity.is_none());
    }

    #[test]
    fn only_dst_nat_rules_are_listed() {
        let nat = attrs(&[
            (".id", "*A"),
            ("action", "dst-nat"),
            ("dst-port", "10001"),
            ("to-addresses", "192.168.88.10"),
            ("to-ports", "80"),
            ("protocol", "tcp"),
            ("comment", "cloudconnect-10001-tcp"),
        ]);
        let masquerade = attrs(&[(".id", "*1"), ("action", "masquerade")]);
        let rule = parse_nat_rule(&nat).unwrap();
        assert!(rule.managed);
        assert_eq!(rule.internal_port, 80);
        assert!(parse_nat_rule(&masquerade).is_none());
    }
}
