use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use secrecy::ExposeSecret;
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use super::{LegacyRouterClient, extract_csrf_token};
use crate::error::Error;
use crate::model::{Protocol, RouterProfile};
use crate::transport::TransportConfig;
use crate::xml;

const LOGIN: &str = "api/user/login";
const STANDARD_MAPPING: &str = "api/nat/portmapping";
const ONT_FORWARD: &str = "api/router/portforward";

/// Models that expose the ONT port-forward endpoint instead of NAT mapping.
const ONT_MODELS: &[&str] = &["hg8245h", "hg8245q"];

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

fn protocol_label(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Tcp => "TCP",
        Protocol::Udp => "UDP",
        Protocol::Both => "TCP/UDP",
    }
}

/// Cookie-session client for Huawei gateways.
pub struct HuaweiClient {
    profile: RouterProfile,
    base_url: Url,
    http: reqwest::Client,
    timeout: Duration,
    logged_in: bool,
}

impl HuaweiClient {
    pub fn new(profile: RouterProfile, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            base_url: profile.web_base_url()?,
            http: transport.build_session_client()?,
            timeout: transport.timeout,
            profile,
            logged_in: false,
        })
    }

    fn transport_err(&self, err: reqwest::Error) -> Error {
        Error::from_transport(&self.profile.web_target(), self.timeout, err)
    }

    fn is_ont_model(&self) -> bool {
        let model = self.profile.model.to_ascii_lowercase();
        ONT_MODELS.contains(&model.as_str())
    }

    async fn post_xml(&self, path: &str, body: String) -> Result<reqwest::StatusCode, Error> {
        let url = self.base_url.join(path)?;
        debug!("POST {url}");
        let resp = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport_err(e))?;
        Ok(resp.status())
    }

    async fn alternative_login(&self) -> Result<bool, Error> {
        let body = format!(
            "{XML_HEADER}<request><Username>{}</Username><Password>{}</Password></request>",
            xml::text(&self.profile.username),
            xml::text(self.profile.password.expose_secret()),
        );
        Ok(self.post_xml(LOGIN, body).await?.is_success())
    }
}

#[async_trait]
impl LegacyRouterClient for HuaweiClient {
    fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    async fn login(&mut self) -> Result<(), Error> {
        let root = self.base_url.clone();
        debug!("GET {root}");
        let page = self.http.get(root).send().await.map_err(|e| self.transport_err(e))?;
        let html = page.text().await.map_err(|e| self.transport_err(e))?;

        let mut body = json!({
            "Username": self.profile.username,
            "Password": self.profile.password.expose_secret(),
        });
        if let Some(token) = extract_csrf_token(&html) {
            body["csrf_token"] = json!(token);
        }

        let url = self.base_url.join(LOGIN)?;
        debug!("POST {url}");
        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_err(e))?;

        if resp.status().is_success() || self.alternative_login().await? {
            self.logged_in = true;
            info!(router = %self.profile.ip_address, "legacy Huawei login succeeded");
            return Ok(());
        }
        Err(Error::Authentication {
            message: format!("{}: JSON and XML login refused", self.profile.web_target()),
        })
    }

    async fn add_port_forwarding(
        &mut self,
        external_port: u16,
        internal_ip: IpAddr,
        internal_port: u16,
        protocol: Protocol,
        description: &str,
    ) -> Result<(), Error> {
        self.ensure_logged_in().await?;

        let proto = protocol_label(protocol);
        let description = xml::text(description);
        let (path, body) = if self.is_ont_model() {
            (
                ONT_FORWARD,
                format!(
                    "{XML_HEADER}<request><MappingIndex></MappingIndex>\
                     <InternalClient>{internal_ip}</InternalClient>\
                     <Protocol>{proto}</Protocol>\
                     <InternalPort>{internal_port}</InternalPort>\
                     <ExternalPort>{external_port}</ExternalPort>\
                     <LeaseDuration>0</LeaseDuration>\
                     <Description>{description}</Description></request>"
                ),
            )
        } else {
            (
                STANDARD_MAPPING,
                format!(
                    "{XML_HEADER}<request><PortMappingIndex></PortMappingIndex>\
                     <InternalClient>{internal_ip}</InternalClient>\
                     <PortMappingProtocol>{proto}</PortMappingProtocol>\
                     <InternalPort>{internal_port}</InternalPort>\
                     <ExternalPort>{external_port}</ExternalPort>\
                     <PortMappingDescription>{description}</PortMappingDescription></request>"
                ),
            )
        };

        let status = self.post_xml(path, body).await?;
        if !status.is_success() {
            return Err(Error::rejected("port mapping add", format!("HTTP {status}")));
        }
        info!(router = %self.profile.ip_address, port = external_port, protocol = proto, "legacy port mapping added");
        Ok(())
    }

    async fn remove_port_forwarding(&mut self, external_port: u16, protocol: Protocol) -> Result<(), Error> {
        self.ensure_logged_in().await?;

        let url = self.base_url.join(STANDARD_MAPPING)?;
        debug!("GET {url}");
        let resp = self.http.get(url).send().await.map_err(|e| self.transport_err(e))?;
        let body = resp.text().await.map_err(|e| self.transport_err(e))?;
        let root = xml::parse(&body).map_err(|m| Error::parse(STANDARD_MAPPING, m))?;

        let wanted_port = external_port.to_string();
        let wanted_proto = protocol_label(protocol);
        let index = root
            .find_all("PortMappingInstance")
            .into_iter()
            .find(|rule| {
                rule.child_text("ExternalPort") == Some(wanted_port.as_str())
                    && rule
                        .child_text("PortMappingProtocol")
                        .is_some_and(|p| p.eq_ignore_ascii_case(wanted_proto))
            })
            .and_then(|rule| rule.child_text("PortMappingIndex"))
            .map(str::to_owned)
            .ok_or_else(|| Error::NotFound {
                what: format!("port mapping {external_port}/{protocol}"),
            })?;

        let payload = format!(
            "{XML_HEADER}<request><PortMappingIndex>{}</PortMappingIndex></request>",
            xml::text(&index)
        );
        let status = self.post_xml(STANDARD_MAPPING, payload).await?;
        if !status.is_success() {
            return Err(Error::rejected("port mapping remove", format!("HTTP {status}")));
        }
        info!(router = %self.profile.ip_address, port = external_port, "legacy port mapping removed");
        Ok(())
    }
}
