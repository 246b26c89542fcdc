use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use secrecy::ExposeSecret;
use tracing::{debug, info};
use url::Url;

use super::LegacyRouterClient;
use crate::error::Error;
use crate::model::{Protocol, RouterProfile};
use crate::transport::TransportConfig;

const LOGIN_PAGE: &str = "login.html";
const LOGIN: &str = "login/Auth";
const VIRTUAL_SERVERS: &str = "goform/virtualSer";
const SET_VIRTUAL_SERVER: &str = "goform/setVirtualSer";

/// One row of the virtual-server table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VirtualServer {
    pub index: String,
    pub external_port: String,
    pub protocol: String,
    pub internal_ip: String,
    pub internal_port: String,
}

/// Rows of every rule/list table; the first row of each table is a header.
pub(crate) fn parse_virtual_servers(html: &str) -> Vec<VirtualServer> {
    let document = Html::parse_document(html);
    let (Ok(tables), Ok(rows), Ok(cells)) = (
        Selector::parse(r#"table[class*="rule"], table[class*="list"]"#),
        Selector::parse("tr"),
        Selector::parse("td"),
    ) else {
        return Vec::new();
    };

    let mut servers = Vec::new();
    for table in document.select(&tables) {
        for row in table.select(&rows).skip(1) {
            let cols: Vec<String> = row
                .select(&cells)
                .map(|td| td.text().collect::<String>().trim().to_owned())
                .collect();
            if let [index, external_port, protocol, internal_ip, internal_port, ..] = cols.as_slice() {
                servers.push(VirtualServer {
                    index: index.clone(),
                    external_port: external_port.clone(),
                    protocol: protocol.clone(),
                    internal_ip: internal_ip.clone(),
                    internal_port: internal_port.clone(),
                });
            }
        }
    }
    servers
}

/// Form code for a concrete protocol.
fn vproto(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Udp => "2",
        Protocol::Tcp | Protocol::Both => "1",
    }
}

/// Form-session client for Tenda virtual servers.
pub struct TendaClient {
    profile: RouterProfile,
    base_url: Url,
    http: reqwest::Client,
    timeout: Duration,
    logged_in: bool,
}

impl TendaClient {
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

    async fn post_form(&self, path: &str, form: &[(&str, String)]) -> Result<reqwest::StatusCode, Error> {
        let url = self.base_url.join(path)?;
        debug!("POST {url}");
        let resp = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| self.transport_err(e))?;
        Ok(resp.status())
    }

    async fn virtual_servers(&self) -> Result<Vec<VirtualServer>, Error> {
        let url = self.base_url.join(VIRTUAL_SERVERS)?;
        debug!("GET {url}");
        let resp = self.http.get(url).send().await.map_err(|e| self.transport_err(e))?;
        let body = resp.text().await.map_err(|e| self.transport_err(e))?;
        Ok(parse_virtual_servers(&body))
    }

    async fn add_single(
        &self,
        external_port: u16,
        internal_ip: IpAddr,
        internal_port: u16,
        protocol: Protocol,
        description: &str,
    ) -> Result<(), Error> {
        let next_index = self.virtual_servers().await?.len() + 1;
        let form = [
            ("virtualSer", "add".to_owned()),
            ("vPort", external_port.to_string()),
            ("vProto", vproto(protocol).to_owned()),
            ("vIp", internal_ip.to_string()),
            ("vPortIn", internal_port.to_string()),
            ("vEnable", "1".to_owned()),
            ("vDesc", description.to_owned()),
            ("vIndex", next_index.to_string()),
        ];
        let status = self.post_form(SET_VIRTUAL_SERVER, &form).await?;
        if !status.is_success() {
            return Err(Error::rejected("virtual server add", format!("HTTP {status}")));
        }
        Ok(())
    }
}

#[async_trait]
impl LegacyRouterClient for TendaClient {
    fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    async fn login(&mut self) -> Result<(), Error> {
        let page = self.base_url.join(LOGIN_PAGE)?;
        debug!("GET {page}");
        self.http.get(page).send().await.map_err(|e| self.transport_err(e))?;

        let digest = format!("{:X}", md5::compute(self.profile.password.expose_secret().as_bytes()));
        let form = [("username", self.profile.username.clone()), ("password", digest)];
        let status = self.post_form(LOGIN, &form).await?;
        if status != reqwest::StatusCode::OK {
            return Err(Error::Authentication {
                message: format!("{}: login returned HTTP {status}", self.profile.web_target()),
            });
        }
        self.logged_in = true;
        info!(router = %self.profile.ip_address, "legacy Tenda login succeeded");
        Ok(())
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

        let mut first_error = None;
        for &proto in protocol.expand() {
            if let Err(e) = self
                .add_single(external_port, internal_ip, internal_port, proto, description)
                .await
            {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                info!(router = %self.profile.ip_address, port = external_port, %protocol, "legacy virtual server added");
                Ok(())
            }
        }
    }

    async fn remove_port_forwarding(&mut self, external_port: u16, protocol: Protocol) -> Result<(), Error> {
        self.ensure_logged_in().await?;

        let wanted_port = external_port.to_string();
        let servers = self.virtual_servers().await?;
        let Some(server) = servers.iter().find(|s| {
            s.external_port == wanted_port && s.protocol.eq_ignore_ascii_case(protocol.as_str())
        }) else {
            return Err(Error::NotFound {
                what: format!("virtual server {external_port}/{protocol}"),
            });
        };

        let form = [("virtualSer", "del".to_owned()), ("vIndex", server.index.clone())];
        let status = self.post_form(SET_VIRTUAL_SERVER, &form).await?;
        if !status.is_success() {
            return Err(Error::rejected("virtual server remove", format!("HTTP {status}")));
        }
        info!(router = %self.profile.ip_address, port = external_port, "legacy virtual server removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn rule_tables_skip_header_and_short_rows() {
        let html = r#"
            <table class="rule-table">
              <tr><th>#</th><th>Ext</th><th>Proto</th><th>IP</th><th>Int</th></tr>
              <tr><td>1</td><td>10080</td><td>TCP</td><td>192.168.0.20</td><td>80</td><td>on</td></tr>
              <tr><td>2</td><td>short</td></tr>
            </table>
            <table class="other"><tr><td>x</td></tr><tr><td>9</td><td>1</td><td>TCP</td><td>a</td><td>b</td></tr></table>
        "#;
        let servers = parse_virtual_servers(html);
        assert_eq!(
            servers,
            vec![VirtualServer {
                index: "1".into(),
                external_port: "10080".into(),
                protocol: "TCP".into(),
                internal_ip: "192.168.0.20".into(),
                internal_port: "80".into(),
            }]
        );
    }

    #[test]
    fn list_class_tables_are_read_too() {
        let html = r#"<table class="port list"><tr><td>h</td></tr>
            <tr><td>3</td><td>22</td><td>udp</td><td>10.0.0.5</td><td>2222</td></tr></table>"#;
        let servers = parse_virtual_servers(html);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].index, "3");
    }

    #[test]
    fn protocol_form_codes() {
        assert_eq!(vproto(Protocol::Tcp), "1");
        assert_eq!(vproto(Protocol::Udp), "2");
    }
}
