// Legacy port-forwarding clients.
//
// The older management path predates the driver contract: a login plus
// add/remove of port forwards, nothing else. Kept for routers provisioned
// through it; new code goes through `DriverFactory`.

mod huawei;
mod tenda;

pub use huawei::HuaweiClient;
pub use tenda::TendaClient;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::LazyLock;

use async_trait::async_trait;
use scraper::{Html, Selector};

use crate::error::Error;
use crate::model::{Protocol, RouterProfile, RouterType};
use crate::transport::TransportConfig;

/// Narrow login + port-forward client used by the legacy path.
///
/// `add_port_forwarding` and `remove_port_forwarding` log in first when
/// no session is held.
#[async_trait]
pub trait LegacyRouterClient: Send {
    fn is_logged_in(&self) -> bool;

    async fn login(&mut self) -> Result<(), Error>;

    async fn add_port_forwarding(
        &mut self,
        external_port: u16,
        internal_ip: IpAddr,
        internal_port: u16,
        protocol: Protocol,
        description: &str,
    ) -> Result<(), Error>;

    async fn remove_port_forwarding(&mut self, external_port: u16, protocol: Protocol) -> Result<(), Error>;

    async fn ensure_logged_in(&mut self) -> Result<(), Error> {
        if self.is_logged_in() {
            return Ok(());
        }
        self.login().await
    }
}

type LegacyConstructor = fn(&RouterProfile, &TransportConfig) -> Result<Box<dyn LegacyRouterClient>, Error>;

static LEGACY_CLIENTS: LazyLock<HashMap<RouterType, LegacyConstructor>> = LazyLock::new(|| {
    let mut map: HashMap<RouterType, LegacyConstructor> = HashMap::new();
    map.insert(RouterType::Huawei, |p, t| Ok(Box::new(HuaweiClient::new(p.clone(), t)?)));
    map.insert(RouterType::Tenda, |p, t| Ok(Box::new(TendaClient::new(p.clone(), t)?)));
    map
});

/// Legacy client for `profile`, or `UnsupportedRouterType`.
pub fn get_router_client(
    profile: &RouterProfile,
    transport: &TransportConfig,
) -> Result<Box<dyn LegacyRouterClient>, Error> {
    let constructor = LEGACY_CLIENTS
        .get(&profile.router_type)
        .ok_or_else(|| Error::UnsupportedRouterType(profile.router_type.to_string()))?;
    constructor(profile, transport)
}

/// CSRF token selectors, in the order firmware families use them.
const CSRF_SELECTORS: &[&str] = &[
    r#"input[name="csrf_token"]"#,
    r#"input[name="token"]"#,
    r#"meta[name="csrf-token"]"#,
    "#token",
];

/// Pull a CSRF token out of a login page (`value` or `content` attribute).
pub(crate) fn extract_csrf_token(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    CSRF_SELECTORS.iter().find_map(|raw| {
        let selector = Selector::parse(raw).ok()?;
        let element = document.select(&selector).next()?;
        element
            .value()
            .attr("value")
            .or_else(|| element.value().attr("content"))
            .map(str::to_owned)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::RouterId;

    #[test]
    fn csrf_token_from_hidden_input() {
        let html = r#"<html><body><form><input type="hidden" name="csrf_token" value="abc123"></form></body></html>"#;
        assert_eq!(extract_csrf_token(html).as_deref(), Some("abc123"));
    }

    #[test]
    fn csrf_token_from_meta_tag() {
        let html = r#"<html><head><meta name="csrf-token" content="meta-tok"></head></html>"#;
        assert_eq!(extract_csrf_token(html).as_deref(), Some("meta-tok"));
    }

    #[test]
    fn no_token_on_plain_page() {
        assert_eq!(extract_csrf_token("<html><body>hello</body></html>"), None);
    }

    #[test]
    fn registry_rejects_vendors_without_legacy_client() {
        let transport = TransportConfig::default();
        let ip = "10.0.0.1".parse().unwrap();
        for ty in [RouterType::Mikrotik, RouterType::Other] {
            let profile = RouterProfile::new(RouterId(1), ty, ip);
            assert!(matches!(
                get_router_client(&profile, &transport).err().unwrap(),
                Error::UnsupportedRouterType(_)
            ));
        }
        let huawei = RouterProfile::new(RouterId(2), RouterType::Huawei, ip);
        assert!(get_router_client(&huawei, &transport).is_ok());
    }
}
