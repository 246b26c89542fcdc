// Huawei HTTP+XML driver (HG8245H, HG8245Q and relatives).
//
// Authenticates with HTTP Digest against `/api/system/deviceinfo`; when the
// firmware does not speak digest it falls back to a JSON login and then a
// raw XML login, both of which leave a session cookie in the jar.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Method, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use crate::digest::{DigestChallenge, DigestSession};
use crate::driver::{MANAGED_RULE_PREFIX, RouterDriver, managed_rule_name};
use crate::error::Error;
use crate::legacy::extract_csrf_token;
use crate::model::{
    ConnectedDevice, DeviceSource, DriverRule, Protocol, RouterProfile, RouterStatus,
    SecurityType, non_empty, parse_ip,
};
use crate::transport::TransportConfig;
use crate::xml::{self, XmlNode};

const DEVICE_INFO: &str = "/api/system/deviceinfo";
const MONITORING_STATUS: &str = "/api/monitoring/status";
const HOST_LIST: &str = "/api/wlan/host-list";
const WLAN_NETWORK: &str = "/api/wlan/network";
const PORT_MAPPING: &str = "/api/security/port-mapping";
const DEVICE_CONTROL: &str = "/api/device/control";
const USER_LOGIN: &str = "/api/user/login";

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Vendor value for a WiFi security type.
pub fn huawei_security_mode(security: SecurityType) -> &'static str {
    match security {
        SecurityType::Wpa2 => "WPA2-PSK",
        SecurityType::Wpa3 => "WPA3-PSK",
        SecurityType::Wpa => "WPA-PSK",
        SecurityType::Wep => "WEP",
        SecurityType::None => "None",
    }
}

fn huawei_protocol(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Tcp => "TCP",
        Protocol::Udp => "UDP",
        Protocol::Both => "TCP/UDP",
    }
}

#[derive(Debug)]
enum Session {
    /// The device API answered without asking for credentials.
    Open,
    Digest(DigestSession),
    /// Cookie set by the JSON or XML login; lives in the client's jar.
    Cookie,
}

/// Driver for Huawei ONTs and home gateways.
pub struct HuaweiDriver {
    profile: RouterProfile,
    base_url: Url,
    http: reqwest::Client,
    timeout: Duration,
    session: Option<Session>,
}

impl HuaweiDriver {
    pub fn new(profile: RouterProfile, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            base_url: profile.web_base_url()?,
            http: transport.build_session_client()?,
            timeout: transport.timeout,
            profile,
            session: None,
        })
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn transport_err(&self, err: reqwest::Error) -> Error {
        Error::from_transport(&self.profile.web_target(), self.timeout, err)
    }

    /// Send a request, attaching a digest `Authorization` header when the
    /// session is digest-based.
    async fn send(&self, method: Method, path: &str, body: Option<String>) -> Result<Response, Error> {
        let url = self.url(path)?;
        debug!("{method} {url}");

        let mut req = self.http.request(method.clone(), url);
        if let Some(Session::Digest(ref digest)) = self.session {
            req = req.header(AUTHORIZATION, digest.authorization(method.as_str(), path));
        }
        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/xml").body(body);
        }
        req.send().await.map_err(|e| self.transport_err(e))
    }

    /// Decode an XML reply, mapping 401 to `Authentication`, other non-2xx
    /// to `Rejected`, and `<error>` documents to `Rejected`.
    async fn read_xml(&self, path: &str, resp: Response) -> Result<XmlNode, Error> {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: format!("{path} returned 401"),
            });
        }
        let body = resp.text().await.map_err(|e| self.transport_err(e))?;
        if !status.is_success() {
            return Err(Error::rejected(path, format!("HTTP {status}")));
        }
        let root = xml::parse(&body).map_err(|m| Error::parse(path, m))?;
        check_router_error(path, &root)?;
        Ok(root)
    }

    async fn get_xml(&mut self, path: &str) -> Result<XmlNode, Error> {
        self.ensure_connected().await?;
        let resp = self.send(Method::GET, path, None).await?;
        self.read_xml(path, resp).await
    }

    /// POST an XML request. A 2xx reply counts as success unless the body
    /// is an `<error>` document.
    async fn post_xml(&mut self, operation: &str, path: &str, body: String) -> Result<(), Error> {
        self.ensure_connected().await?;
        let resp = self.send(Method::POST, path, Some(body)).await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: format!("{path} returned 401"),
            });
        }
        let text = resp.text().await.map_err(|e| self.transport_err(e))?;
        if !status.is_success() {
            return Err(Error::rejected(operation, format!("HTTP {status}")));
        }
        match xml::parse(&text) {
            Ok(root) => check_router_error(operation, &root),
            Err(_) => {
                debug!(operation, "non-XML acknowledgement accepted");
                Ok(())
            }
        }
    }

    // ── Authentication ─────────────────────────────────────────────

    /// Digest handshake against the device-info endpoint.
    async fn try_digest(&self) -> Result<Option<Session>, Error> {
        let url = self.url(DEVICE_INFO)?;
        debug!("GET {url}");
        let resp = self.http.get(url.clone()).send().await.map_err(|e| self.transport_err(e))?;

        match resp.status() {
            StatusCode::OK => {
                let body = resp.text().await.map_err(|e| self.transport_err(e))?;
                Ok(xml::parse(&body).is_ok().then_some(Session::Open))
            }
            StatusCode::UNAUTHORIZED => {
                let challenge = resp
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(DigestChallenge::parse);
                let Some(challenge) = challenge else {
                    debug!("401 without a digest challenge");
                    return Ok(None);
                };

                let digest = DigestSession::new(&self.profile.username, &self.profile.password, challenge);
                let resp = self
                    .http
                    .get(url)
                    .header(AUTHORIZATION, digest.authorization("GET", DEVICE_INFO))
                    .send()
                    .await
                    .map_err(|e| self.transport_err(e))?;
                if resp.status() != StatusCode::OK {
                    debug!(status = %resp.status(), "digest credentials refused");
                    return Ok(None);
                }
                let body = resp.text().await.map_err(|e| self.transport_err(e))?;
                Ok(xml::parse(&body).is_ok().then_some(Session::Digest(digest)))
            }
            other => {
                debug!(status = %other, "device info unavailable, trying form login");
                Ok(None)
            }
        }
    }

    async fn login_page_csrf(&self) -> Option<String> {
        let url = self.url("/").ok()?;
        debug!("GET {url}");
        let resp = self.http.get(url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let html = resp.text().await.ok()?;
        extract_csrf_token(&html)
    }

    async fn try_json_login(&self) -> Result<bool, Error> {
        let mut body = json!({
            "Username": self.profile.username,
            "Password": self.profile.password.expose_secret(),
        });
        if let Some(token) = self.login_page_csrf().await {
            body["csrf_token"] = json!(token);
        }

        let url = self.url(USER_LOGIN)?;
        debug!("POST {url} (json)");
        let resp = self.http.post(url).json(&body).send().await.map_err(|e| self.transport_err(e))?;
        login_accepted(resp).await.map_err(|e| self.transport_err(e))
    }

    async fn try_xml_login(&self) -> Result<bool, Error> {
        let body = format!(
            "{XML_HEADER}<request><Username>{}</Username><Password>{}</Password></request>",
            xml::text(&self.profile.username),
            xml::text(self.profile.password.expose_secret()),
        );
        let url = self.url(USER_LOGIN)?;
        debug!("POST {url} (xml)");
        let resp = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport_err(e))?;
        login_accepted(resp).await.map_err(|e| self.transport_err(e))
    }

    async fn find_rule(&mut self, external_port: u16, protocol: Protocol) -> Result<DriverRule, Error> {
        let mut matches: Vec<DriverRule> = self
            .get_port_forwarding_rules()
            .await?
            .into_iter()
            .filter(|r| r.external_port == external_port && r.protocol == protocol)
            .collect();
        matches.sort_by_key(|r| !r.managed);
        matches.into_iter().next().ok_or_else(|| Error::NotFound {
            what: format!("port mapping {external_port}/{protocol}"),
        })
    }
}

async fn login_accepted(resp: Response) -> Result<bool, reqwest::Error> {
    if !resp.status().is_success() {
        return Ok(false);
    }
    let body = resp.text().await?;
    Ok(xml::parse(&body).map_or(true, |root| root.name != "error"))
}

fn check_router_error(operation: &str, root: &XmlNode) -> Result<(), Error> {
    if root.name != "error" {
        return Ok(());
    }
    let code = root.child_text("code").unwrap_or("unknown");
    let message = root.child_text("message").unwrap_or_default();
    Err(Error::rejected(
        operation,
        format!("error code {code} {message}").trim_end().to_owned(),
    ))
}

fn parse_status(root: &XmlNode) -> RouterStatus {
    RouterStatus {
        is_online: true,
        model: root.find_text(&["ModelName", "DeviceName"]).map(str::to_owned),
        serial: root.find_text(&["SerialNumber"]).map(str::to_owned),
        hardware_version: root.find_text(&["HardwareVersion"]).map(str::to_owned),
        firmware_version: root.find_text(&["SoftwareVersion"]).map(str::to_owned),
        uptime: root.find_text(&["UpTime", "UptimeSeconds"]).map(str::to_owned),
        wan_status: root.find_text(&["WANAccessType", "ConnectionStatus"]).map(str::to_owned),
        wan_ip: root.find_text(&["WanIPAddress", "WANIPAddress"]).map(str::to_owned),
        ..RouterStatus::default()
    }
}

fn parse_hosts(root: &XmlNode) -> Vec<ConnectedDevice> {
    root.find_all("Host")
        .into_iter()
        .filter_map(|host| {
            let mac = non_empty(host.child_text("MACAddress"))?;
            let mut device = ConnectedDevice::new(mac, DeviceSource::HostTable);
            device.ip_address = parse_ip(host.child_text("IPAddress"));
            device.hostname = non_empty(host.child_text("HostName"));
            device.interface = non_empty(host.child_text("InterfaceType"));
            Some(device)
        })
        .collect()
}

fn parse_port_mappings(root: &XmlNode) -> Vec<DriverRule> {
    root.find_all("PortMapping")
        .into_iter()
        .filter_map(|rule| {
            let external_port = rule.child_text("ExternalPort")?.parse().ok()?;
            let name = rule.child_text("Name").unwrap_or_default().to_owned();
            Some(DriverRule {
                id: rule.child_text("Index").unwrap_or_default().to_owned(),
                managed: name.starts_with(MANAGED_RULE_PREFIX),
                name,
                external_port,
                internal_ip: parse_ip(rule.child_text("InternalClient")),
                internal_port: rule
                    .child_text("InternalPort")
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(external_port),
                protocol: rule
                    .child_text("Protocol")
                    .and_then(Protocol::from_vendor)
                    .unwrap_or(Protocol::Tcp),
                enabled: rule.child_text("Enable") == Some("1"),
            })
        })
        .collect()
}

#[async_trait]
impl RouterDriver for HuaweiDriver {
    fn profile(&self) -> &RouterProfile {
        &self.profile
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn connect(&mut self) -> Result<(), Error> {
        if self.session.is_some() {
            return Ok(());
        }
        let target = self.profile.web_target();

        if let Some(session) = self.try_digest().await? {
            info!(router = %target, ?session, "connected to Huawei router");
            self.session = Some(session);
            return Ok(());
        }
        if self.try_json_login().await? || self.try_xml_login().await? {
            info!(router = %target, "connected to Huawei router (cookie login)");
            self.session = Some(Session::Cookie);
            return Ok(());
        }

        warn!(router = %target, "every Huawei login method was refused");
        Err(Error::Authentication {
            message: format!("{target}: digest, JSON and XML login were all refused"),
        })
    }

    async fn disconnect(&mut self) {
        if self.session.take().is_some() {
            debug!(router = %self.profile.web_target(), "Huawei session released");
        }
    }

    async fn get_status(&mut self) -> Result<RouterStatus, Error> {
        self.ensure_connected().await?;

        let mut endpoint = MONITORING_STATUS;
        let mut resp = self.send(Method::GET, endpoint, None).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            endpoint = DEVICE_INFO;
            resp = self.send(Method::GET, endpoint, None).await?;
        }
        match self.read_xml(endpoint, resp).await {
            Ok(root) => Ok(parse_status(&root)),
            Err(Error::ProtocolParse { message, .. }) => {
                warn!(router = %self.profile.ip_address, %message, "undecodable Huawei status");
                Ok(RouterStatus::unparsed(message))
            }
            Err(e) => Err(e),
        }
    }

    async fn get_connected_devices(&mut self) -> Result<Vec<ConnectedDevice>, Error> {
        self.ensure_connected().await?;
        let resp = self.send(Method::GET, HOST_LIST, None).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!("host list not available on this firmware");
            return Ok(Vec::new());
        }
        let root = self.read_xml(HOST_LIST, resp).await?;
        Ok(parse_hosts(&root))
    }

    async fn change_wifi_settings(
        &mut self,
        ssid: &str,
        password: &SecretString,
        security: SecurityType,
    ) -> Result<(), Error> {
        let mode = huawei_security_mode(security);

        let current = self.get_xml(WLAN_NETWORK).await?;
        let wlan_id = current
            .find_text(&["WLANID"])
            .ok_or_else(|| Error::parse(WLAN_NETWORK, "WLANID not present"))?
            .to_owned();

        let body = format!(
            "{XML_HEADER}<request><WLANConfiguration>\
             <WLANID>{}</WLANID>\
             <WLANSSID>{}</WLANSSID>\
             <WLANAuthMode>{mode}</WLANAuthMode>\
             <WLANEncryptType>AES</WLANEncryptType>\
             <WLANKey>{}</WLANKey>\
             <BeaconType>11i</BeaconType>\
             <WLANEnable>1</WLANEnable>\
             </WLANConfiguration></request>",
            xml::text(&wlan_id),
            xml::text(ssid),
            xml::text(password.expose_secret()),
        );
        self.post_xml("wifi update", WLAN_NETWORK, body).await?;
        info!(router = %self.profile.ip_address, ssid, security = %security, "WiFi settings updated");
        Ok(())
    }

    async fn reboot(&mut self) -> Result<(), Error> {
        self.ensure_connected().await?;
        let body = format!("{XML_HEADER}<request><Control>1</Control></request>");
        match self.post_xml("reboot", DEVICE_CONTROL, body).await {
            Ok(()) => {}
            Err(Error::Transport(e)) if !e.is_connect() => {
                debug!(error = %e, "connection dropped after reboot request");
            }
            // The session is already up, so the request went out.
            Err(Error::Timeout { .. }) => {
                debug!("no reply to reboot request before timeout");
            }
            Err(e) => return Err(e),
        }
        info!(router = %self.profile.ip_address, "reboot requested");
        self.session = None;
        Ok(())
    }

    async fn create_port_forwarding(
        &mut self,
        external_port: u16,
        internal_ip: IpAddr,
        internal_port: u16,
        protocol: Protocol,
    ) -> Result<(), Error> {
        let body = format!(
            "{XML_HEADER}<request><PortMapping>\
             <Enable>1</Enable>\
             <Name>{}</Name>\
             <ExternalPort>{external_port}</ExternalPort>\
             <InternalPort>{internal_port}</InternalPort>\
             <InternalClient>{internal_ip}</InternalClient>\
             <Protocol>{}</Protocol>\
             <Status>1</Status>\
             </PortMapping></request>",
            managed_rule_name(external_port, protocol),
            huawei_protocol(protocol),
        );
        self.post_xml("port mapping create", PORT_MAPPING, body).await?;
        info!(
            router = %self.profile.ip_address,
            port = external_port,
            protocol = %protocol,
            "port mapping created"
        );
        Ok(())
    }

    async fn get_port_forwarding_rules(&mut self) -> Result<Vec<DriverRule>, Error> {
        let root = self.get_xml(PORT_MAPPING).await?;
        Ok(parse_port_mappings(&root))
    }

    async fn remove_port_forwarding(
        &mut self,
        external_port: u16,
        protocol: Protocol,
    ) -> Result<(), Error> {
        let rule = self.find_rule(external_port, protocol).await?;
        let body = format!(
            "{XML_HEADER}<request><Delete><Index>{}</Index></Delete></request>",
            xml::text(&rule.id)
        );
        self.post_xml("port mapping delete", PORT_MAPPING, body).await?;
        info!(
            router = %self.profile.ip_address,
            port = external_port,
            protocol = %protocol,
            "port mapping removed"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn every_security_type_has_a_huawei_mode() {
        let table = [
            (SecurityType::Wpa2, "WPA2-PSK"),
            (SecurityType::Wpa3, "WPA3-PSK"),
            (SecurityType::Wpa, "WPA-PSK"),
            (SecurityType::Wep, "WEP"),
            (SecurityType::None, "None"),
        ];
        for (security, mode) in table {
            assert_eq!(huawei_security_mode(security), mode, "{security}");
        }
    }

    #[test]
    fn port_mappings_mark_managed_rules() {
        let root = xml::parse(
            "<response><PortMappings>\
             <PortMapping><Index>1</Index><Name>game</Name><ExternalPort>3074</ExternalPort>\
             <InternalPort>3074</InternalPort><InternalClient>192.168.1.5</InternalClient>\
             <Protocol>UDP</Protocol><Enable>1</Enable></PortMapping>\
             <PortMapping><Index>2</Index><Name>CloudConnect_10001_TCP</Name><ExternalPort>10001</ExternalPort>\
             <InternalPort>80</InternalPort><InternalClient>192.168.1.9</InternalClient>\
             <Protocol>TCP/UDP</Protocol><Enable>0</Enable></PortMapping>\
             </PortMappings></response>",
        )
        .unwrap();
        let rules = parse_port_mappings(&root);
        assert_eq!(rules.len(), 2);
        assert!(!rules[0].managed);
        assert_eq!(rules[0].protocol, Protocol::Udp);
        assert!(rules[1].managed);
        assert_eq!(rules[1].protocol, Protocol::Both);
        assert!(!rules[1].enabled);
    }

    #[test]
    fn router_error_document_is_a_rejection() {
        let root = xml::parse("<error><code>100003</code><message></message></error>").unwrap();
        let err = check_router_error("reboot", &root).unwrap_err();
        assert!(matches!(err, Error::Rejected { ref message, .. } if message == "error code 100003"));
    }

    #[test]
    fn hosts_without_mac_are_skipped() {
        let root = xml::parse(
            "<response><Hosts>\
             <Host><MACAddress>AA-BB-CC-DD-EE-01</MACAddress><IPAddress>192.168.1.2</IPAddress>\
             <HostName>laptop</HostName><InterfaceType>Wireless</InterfaceType></Host>\
             <Host><MACAddress></MACAddress></Host>\
             </Hosts></response>",
        )
        .unwrap();
        let hosts = parse_hosts(&root);
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].mac_address.as_str(), "aa:bb:cc:dd:ee:01");
        assert_eq!(hosts[0].hostname.as_deref(), Some("laptop"));
    }
}
