// Tenda form/JSON driver (AC10, AC18, F3, F6 and relatives).
//
// Login posts an MD5 hex password to `/login/Auth` and receives a `stok`
// token that is appended to every later query string. Firmware families
// disagree on endpoint names, so status and device reads walk an ordered
// probe list.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::REFERER;
use reqwest::{Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use url::Url;

use crate::driver::{MANAGED_RULE_PREFIX, RouterDriver, managed_rule_name};
use crate::error::Error;
use crate::model::{
    ConnectedDevice, DeviceSource, DriverRule, Protocol, RouterProfile, RouterStatus,
    SecurityType, parse_ip,
};
use crate::transport::TransportConfig;

const LOGIN: &str = "login/Auth";
const LOGOUT: &str = "logout";
const WIFI_INFO: &str = "goform/getWifiInfo";
const WIFI_SET: &str = "goform/setWifiInfo";
const REBOOT: &str = "goform/sysReboot";
const FORWARD_LIST: &str = "goform/getPortForwardList";
const FORWARD_SET: &str = "goform/setPortForward";

/// Status endpoints in probe order; the first parseable JSON body wins.
pub const STATUS_ENDPOINTS: &[&str] = &["goform/getStatus", "goform/GetRouterStatus"];

/// Device-list endpoints in probe order; the first non-empty list wins.
pub const DEVICE_ENDPOINTS: &[&str] = &[
    "goform/getClientInfo",
    "goform/getWifiClientInfo",
    "goform/getDHCPClientList",
];

/// Vendor value for a WiFi security type. WPA3 is not offered by the
/// firmware families this driver targets.
pub fn tenda_security_mode(security: SecurityType) -> Option<&'static str> {
    match security {
        SecurityType::Wpa2 => Some("WPA2-PSK"),
        SecurityType::Wpa => Some("WPA-PSK"),
        SecurityType::Wep => Some("WEP"),
        SecurityType::None => Some("NONE"),
        SecurityType::Wpa3 => None,
    }
}

/// Lowercase hex MD5 of the password, as the login form expects.
pub fn hashed_password(password: &str) -> String {
    format!("{:x}", md5::compute(password.as_bytes()))
}

/// Driver for Tenda home routers.
pub struct TendaDriver {
    profile: RouterProfile,
    base_url: Url,
    http: reqwest::Client,
    timeout: Duration,
    stok: Option<String>,
    logged_in: bool,
}

impl TendaDriver {
    pub fn new(profile: RouterProfile, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            base_url: profile.web_base_url()?,
            http: transport.build_session_client()?,
            timeout: transport.timeout,
            profile,
            stok: None,
            logged_in: false,
        })
    }

    fn transport_err(&self, err: reqwest::Error) -> Error {
        Error::from_transport(&self.profile.web_target(), self.timeout, err)
    }

    fn endpoint_url(&self, endpoint: &str) -> Result<Url, Error> {
        let mut url = self.base_url.join(endpoint)?;
        if let Some(ref stok) = self.stok {
            url.query_pairs_mut().append_pair("stok", stok);
        }
        Ok(url)
    }

    async fn request(&self, endpoint: &str, form: Option<&[(&str, String)]>) -> Result<Response, Error> {
        let url = self.endpoint_url(endpoint)?;
        let referer = self.base_url.join("main.html")?;

        let builder = match form {
            Some(fields) => {
                debug!("POST {}", url.path());
                self.http.post(url).form(fields)
            }
            None => {
                debug!("GET {}", url.path());
                self.http.get(url)
            }
        };
        builder
            .header(REFERER, referer.as_str())
            .send()
            .await
            .map_err(|e| self.transport_err(e))
    }

    /// GET a JSON endpoint. `None` when the endpoint is missing or its body
    /// is not JSON; transport failures propagate.
    async fn get_json(&mut self, endpoint: &str) -> Result<Option<Value>, Error> {
        self.ensure_connected().await?;
        let resp = self.request(endpoint, None).await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: format!("{endpoint} returned 401"),
            });
        }
        if !status.is_success() {
            debug!(endpoint, %status, "endpoint unavailable");
            return Ok(None);
        }
        let body = resp.text().await.map_err(|e| self.transport_err(e))?;
        match serde_json::from_str::<Value>(&body) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                debug!(endpoint, error = %e, "endpoint returned non-JSON body");
                Ok(None)
            }
        }
    }

    async fn post(&mut self, endpoint: &str, form: &[(&str, String)]) -> Result<Response, Error> {
        self.ensure_connected().await?;
        self.request(endpoint, Some(form)).await
    }

    /// POST a form and require `{"result": 0}` (or `errCode`) in reply.
    async fn post_checked(&mut self, operation: &str, endpoint: &str, form: &[(&str, String)]) -> Result<(), Error> {
        let resp = self.post(endpoint, form).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::rejected(operation, format!("HTTP {status}")));
        }
        let body = resp.text().await.map_err(|e| self.transport_err(e))?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| Error::parse(endpoint, format!("expected JSON result: {e}")))?;
        match result_code(&value) {
            0 => Ok(()),
            code => Err(Error::rejected(operation, format!("result code {code}"))),
        }
    }

    async fn read_forward_list(&mut self) -> Result<Vec<Value>, Error> {
        let value = self
            .get_json(FORWARD_LIST)
            .await?
            .ok_or_else(|| Error::rejected("port forward read", format!("{FORWARD_LIST} unavailable")))?;
        Ok(value
            .get("port_forward_list")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn write_forward_list(&mut self, rules: &[Value]) -> Result<(), Error> {
        let encoded = serde_json::to_string(rules).map_err(|e| Error::parse(FORWARD_SET, e.to_string()))?;
        self.post_checked("port forward update", FORWARD_SET, &[("port_forward_list", encoded)])
            .await
    }

    /// Read-modify-write one concrete-protocol rule.
    async fn add_forward(
        &mut self,
        external_port: u16,
        internal_ip: IpAddr,
        internal_port: u16,
        protocol: Protocol,
    ) -> Result<(), Error> {
        let mut rules = self.read_forward_list().await?;
        let id = next_rule_id(&rules);
        rules.push(json!({
            "id": id.to_string(),
            "enable": "1",
            "name": managed_rule_name(external_port, protocol),
            "protocol": protocol.as_str().to_ascii_uppercase(),
            "external_port": external_port.to_string(),
            "internal_port": internal_port.to_string(),
            "internal_ip": internal_ip.to_string(),
        }));
        self.write_forward_list(&rules).await
    }

    /// Remove the rules a failed create already wrote. Returns `cause` when
    /// every one is gone, `PartialApply` otherwise.
    async fn rollback(&mut self, external_port: u16, created: Vec<Protocol>, cause: Error) -> Error {
        let mut leftover = Vec::new();
        for proto in created.into_iter().rev() {
            match self.remove_port_forwarding(external_port, proto).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(
                        router = %self.profile.ip_address,
                        port = external_port,
                        protocol = %proto,
                        error = %e,
                        "rollback failed"
                    );
                    leftover.push(managed_rule_name(external_port, proto));
                }
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

/// `result` / `errCode` from a Tenda reply; absent means success.
fn result_code(value: &Value) -> i64 {
    ["result", "errCode"]
        .iter()
        .find_map(|k| value.get(*k))
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
        .unwrap_or(0)
}

/// Field as a string, accepting numbers as well.
fn field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match value.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn next_rule_id(rules: &[Value]) -> u64 {
    rules
        .iter()
        .filter_map(|r| field(r, &["id"])?.parse::<u64>().ok())
        .max()
        .unwrap_or(0)
        + 1
}

fn parse_status(value: &Value) -> RouterStatus {
    RouterStatus {
        is_online: true,
        model: field(value, &["product_type", "productType", "model"]),
        hardware_version: field(value, &["hardware_version", "hardVersion"]),
        firmware_version: field(value, &["firmware_version", "softVersion"]),
        wan_ip: field(value, &["wan_ip", "wanIp"]),
        uptime: field(value, &["up_time", "runTime"]),
        connected_clients: field(value, &["station_count", "clientNum"]).and_then(|s| s.parse().ok()),
        ..RouterStatus::default()
    }
}

fn parse_devices(value: &Value) -> Vec<ConnectedDevice> {
    let (items, tagged) = if let Some(list) = value.get("client_info").and_then(Value::as_array) {
        (list.as_slice(), true)
    } else if let Some(list) = value.as_array() {
        (list.as_slice(), false)
    } else {
        return Vec::new();
    };
    let hostname_keys: &[&str] = if tagged {
        &["hostname", "name"]
    } else {
        &["name", "hostname"]
    };

    items
        .iter()
        .filter_map(|item| {
            let mac = field(item, &["mac", "macAddr"])?;
            let wireless = item.get("wireless").is_some_and(|w| match w {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_i64() == Some(1),
                Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
                _ => false,
            });
            let mut device = ConnectedDevice::new(
                mac,
                if wireless { DeviceSource::Wireless } else { DeviceSource::Dhcp },
            );
            device.ip_address = parse_ip(field(item, &["ip", "ipAddr"]).as_deref());
            device.hostname = field(item, hostname_keys);
            if tagged {
                device.interface = Some(if wireless { "wireless" } else { "wired" }.to_owned());
            }
            Some(device)
        })
        .collect()
}

fn parse_forward(rule: &Value) -> Option<DriverRule> {
    let external_port = field(rule, &["external_port"])?.parse().ok()?;
    let name = field(rule, &["name"]).unwrap_or_default();
    Some(DriverRule {
        id: field(rule, &["id"]).unwrap_or_default(),
        managed: name.starts_with(MANAGED_RULE_PREFIX),
        name,
        external_port,
        internal_ip: parse_ip(field(rule, &["internal_ip"]).as_deref()),
        internal_port: field(rule, &["internal_port"])
            .and_then(|p| p.parse().ok())
            .unwrap_or(external_port),
        protocol: field(rule, &["protocol"])
            .and_then(|p| Protocol::from_vendor(&p))
            .unwrap_or(Protocol::Tcp),
        enabled: field(rule, &["enable"]).as_deref() != Some("0"),
    })
}

fn forward_matches(rule: &Value, external_port: u16, protocol: Protocol) -> bool {
    let Some(parsed) = parse_forward(rule) else {
        return false;
    };
    parsed.managed
        && parsed.external_port == external_port
        && (protocol == Protocol::Both || parsed.protocol == protocol)
}

#[async_trait]
impl RouterDriver for TendaDriver {
    fn profile(&self) -> &RouterProfile {
        &self.profile
    }

    fn is_connected(&self) -> bool {
        self.logged_in
    }

    async fn connect(&mut self) -> Result<(), Error> {
        if self.logged_in {
            return Ok(());
        }
        let url = self.base_url.join(LOGIN)?;
        let form = [
            ("username", self.profile.username.clone()),
            ("password", hashed_password(self.profile.password.expose_secret())),
        ];
        debug!("POST {}", url.path());
        let resp = self
            .http
            .post(url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| self.transport_err(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Authentication {
                message: format!("login returned HTTP {status}"),
            });
        }
        let redirected = resp.url().path() != url.path();
        let body = resp.text().await.map_err(|e| self.transport_err(e))?;

        let stok = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("stok").and_then(Value::as_str).map(ToOwned::to_owned));

        match stok {
            Some(token) => self.stok = Some(token),
            None if redirected => {}
            None => {
                return Err(Error::Authentication {
                    message: "login returned neither a token nor a redirect".into(),
                });
            }
        }
        self.logged_in = true;
        info!(router = %self.profile.ip_address, "connected to Tenda router");
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(stok) = self.stok.take() {
            if let Ok(mut url) = self.base_url.join(LOGOUT) {
                url.query_pairs_mut().append_pair("stok", &stok);
                debug!("GET {}", url.path());
                if let Err(e) = self.http.get(url).send().await {
                    debug!(error = %e, "logout failed");
                }
            }
        }
        self.logged_in = false;
    }

    async fn get_status(&mut self) -> Result<RouterStatus, Error> {
        for endpoint in STATUS_ENDPOINTS {
            if let Some(value) = self.get_json(endpoint).await? {
                if value.is_object() {
                    return Ok(parse_status(&value));
                }
            }
        }
        warn!(router = %self.profile.ip_address, "no Tenda status endpoint returned JSON");
        Ok(RouterStatus::unparsed("no status endpoint returned a parseable body"))
    }

    async fn get_connected_devices(&mut self) -> Result<Vec<ConnectedDevice>, Error> {
        for endpoint in DEVICE_ENDPOINTS {
            let Some(value) = self.get_json(endpoint).await? else {
                continue;
            };
            let devices = parse_devices(&value);
            if !devices.is_empty() {
                debug!(endpoint, count = devices.len(), "device list read");
                return Ok(devices);
            }
        }
        Ok(Vec::new())
    }

    async fn change_wifi_settings(
        &mut self,
        ssid: &str,
        password: &SecretString,
        security: SecurityType,
    ) -> Result<(), Error> {
        let mode = tenda_security_mode(security).ok_or(Error::UnsupportedSecurity {
            vendor: "Tenda",
            security,
        })?;

        let current = self
            .get_json(WIFI_INFO)
            .await?
            .ok_or_else(|| Error::rejected("wifi update", format!("{WIFI_INFO} unavailable")))?;

        let key = password.expose_secret().to_owned();
        let (wep_key, wpa_key) = match security {
            SecurityType::Wep => (key, String::new()),
            SecurityType::None => (String::new(), String::new()),
            _ => (String::new(), key),
        };
        let encryption = if security == SecurityType::Wpa2 { "AES" } else { "TKIP" };

        let form = [
            ("ssid", ssid.to_owned()),
            ("security", mode.to_owned()),
            ("wep_key", wep_key),
            ("wpa_enc", encryption.to_owned()),
            ("wpa_key", wpa_key),
            ("channel", field(&current, &["channel"]).unwrap_or_else(|| "auto".into())),
            ("bandwidth", field(&current, &["bandwidth"]).unwrap_or_else(|| "20MHz".into())),
            (
                "wireless_mode",
                field(&current, &["wireless_mode"]).unwrap_or_else(|| "11bgn mixed".into()),
            ),
        ];
        self.post_checked("wifi update", WIFI_SET, &form).await?;
        info!(router = %self.profile.ip_address, ssid, security = %security, "WiFi settings updated");
        Ok(())
    }

    async fn reboot(&mut self) -> Result<(), Error> {
        self.ensure_connected().await?;
        match self.request(REBOOT, Some(&[("action", "reboot".to_owned())])).await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => return Err(Error::rejected("reboot", format!("HTTP {}", resp.status()))),
            Err(Error::Transport(e)) if !e.is_connect() => {
                debug!(error = %e, "connection dropped after reboot request");
            }
            // Logged in already, so the request went out.
            Err(Error::Timeout { .. }) => {
                debug!("no reply to reboot request before timeout");
            }
            Err(e) => return Err(e),
        }
        info!(router = %self.profile.ip_address, "reboot requested");
        self.stok = None;
        self.logged_in = false;
        Ok(())
    }

    async fn create_port_forwarding(
        &mut self,
        external_port: u16,
        internal_ip: IpAddr,
        internal_port: u16,
        protocol: Protocol,
    ) -> Result<(), Error> {
        let mut created = Vec::new();
        for &proto in protocol.expand() {
            if let Err(e) = self.add_forward(external_port, internal_ip, internal_port, proto).await {
                warn!(
                    router = %self.profile.ip_address,
                    port = external_port,
                    protocol = %proto,
                    error = %e,
                    "port forward create failed"
                );
                return Err(self.rollback(external_port, created, e).await);
            }
            info!(
                router = %self.profile.ip_address,
                port = external_port,
                protocol = %proto,
                "port forward created"
            );
            created.push(proto);
        }
        Ok(())
    }

    async fn get_port_forwarding_rules(&mut self) -> Result<Vec<DriverRule>, Error> {
        let rules = self.read_forward_list().await?;
        Ok(rules.iter().filter_map(parse_forward).collect())
    }

    async fn remove_port_forwarding(
        &mut self,
        external_port: u16,
        protocol: Protocol,
    ) -> Result<(), Error> {
        let rules = self.read_forward_list().await?;
        let before = rules.len();
        let kept: Vec<Value> = rules
            .into_iter()
            .filter(|r| !forward_matches(r, external_port, protocol))
            .collect();
        if kept.len() == before {
            return Err(Error::NotFound {
                what: format!("port forward {external_port}/{protocol}"),
            });
        }
        self.write_forward_list(&kept).await?;
        info!(
            router = %self.profile.ip_address,
            port = external_port,
            protocol = %protocol,
            removed = before - kept.len(),
            "port forward removed"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn wpa3_is_not_mapped() {
        assert_eq!(tenda_security_mode(SecurityType::Wpa3), None);
        assert_eq!(tenda_security_mode(SecurityType::None), Some("NONE"));
    }

    #[test]
    fn password_hash_is_lower_hex_md5() {
        assert_eq!(hashed_password("admin"), "21232f297a57a5a743894a0e4a801fc3");
    }

    #[test]
    fn result_code_accepts_numbers_and_strings() {
        assert_eq!(result_code(&json!({"result": 0})), 0);
        assert_eq!(result_code(&json!({"errCode": "3"})), 3);
        assert_eq!(result_code(&json!({})), 0);
    }

    #[test]
    fn next_id_follows_highest_existing() {
        let rules = vec![json!({"id": "2"}), json!({"id": 7}), json!({"id": "x"})];
        assert_eq!(next_rule_id(&rules), 8);
        assert_eq!(next_rule_id(&[]), 1);
    }

    #[test]
    fn client_info_marks_wireless_interface() {
        let devices = parse_devices(&json!({
            "client_info": [
                {"mac": "AA:BB:CC:00:00:01", "ip": "192.168.0.10", "hostname": "tv", "wireless": true},
                {"mac": "AA:BB:CC:00:00:02", "ip": "192.168.0.11", "hostname": "nas", "wireless": 0},
                {"ip": "192.168.0.12"}
            ]
        }));
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].interface.as_deref(), Some("wireless"));
        assert_eq!(devices[1].interface.as_deref(), Some("wired"));
    }

    #[test]
    fn bare_list_uses_name_field() {
        let devices = parse_devices(&json!([{"mac": "aa:bb:cc:00:00:09", "name": "printer"}]));
        assert_eq!(devices[0].hostname.as_deref(), Some("printer"));
    }

    #[test]
    fn removal_for_both_matches_each_protocol() {
        let tcp = json!({"name": "CloudConnect_10001_TCP", "external_port": "10001", "protocol": "TCP"});
        let udp = json!({"name": "CloudConnect_10001_UDP", "external_port": "10001", "protocol": "UDP"});
        assert!(forward_matches(&tcp, 10001, Protocol::Both));
        assert!(forward_matches(&udp, 10001, Protocol::Both));
        assert!(!forward_matches(&udp, 10001, Protocol::Tcp));
        assert!(!forward_matches(&tcp, 10002, Protocol::Tcp));
    }

    #[test]
    fn removal_skips_unmanaged_rules_on_the_port() {
        let manual = json!({"name": "game", "external_port": "10001", "protocol": "UDP"});
        assert!(!forward_matches(&manual, 10001, Protocol::Both));
        assert!(!forward_matches(&manual, 10001, Protocol::Udp));
    }
}
