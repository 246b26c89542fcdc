// Shared fake driver for the service tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use routerkit_api::{
    ConnectedDevice, DriverFactory, DriverRule, Error, Protocol, RouterDriver, RouterId,
    RouterProfile, RouterStatus, RouterType, SecurityType, TransportConfig,
};
use routerkit_core::{DeviceStore, MemoryStore, RouterManager, RouterStore, RuleStore};
use secrecy::SecretString;

/// How the fake router answers `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reach {
    Online,
    Unreachable,
    BadLogin,
    /// Vendor without a working driver.
    Unsupported,
    /// Never answers.
    Hang,
}

#[derive(Debug)]
pub struct FakeRouter {
    pub reach: Reach,
    pub rules: Vec<DriverRule>,
    pub devices: Vec<ConnectedDevice>,
    /// Device listing fails after login.
    pub devices_fail: bool,
    /// Ports whose create call is rejected.
    pub reject_ports: Vec<u16>,
    /// Ports whose remove call is rejected.
    pub stuck_ports: Vec<u16>,
    pub calls: Vec<String>,
    pub disconnects: usize,
}

impl FakeRouter {
    pub fn new(reach: Reach) -> Self {
        Self {
            reach,
            rules: Vec::new(),
            devices: Vec::new(),
            devices_fail: false,
            reject_ports: Vec::new(),
            stuck_ports: Vec::new(),
            calls: Vec::new(),
            disconnects: 0,
        }
    }
}

pub type Shared = Arc<Mutex<FakeRouter>>;

pub struct FakeDriver {
    profile: RouterProfile,
    state: Shared,
    connected: bool,
}

impl FakeDriver {
    fn log(&self, call: impl Into<String>) {
        self.state.lock().unwrap().calls.push(call.into());
    }
}

#[async_trait]
impl RouterDriver for FakeDriver {
    fn profile(&self) -> &RouterProfile {
        &self.profile
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), Error> {
        self.log("connect");
        let reach = self.state.lock().unwrap().reach;
        match reach {
            Reach::Online => {
                self.connected = true;
                Ok(())
            }
            Reach::Unreachable => Err(Error::Connection {
                target: self.profile.web_target(),
                reason: "connection refused".into(),
            }),
            Reach::BadLogin => Err(Error::Authentication {
                message: "invalid credentials".into(),
            }),
            Reach::Unsupported => Err(Error::UnsupportedOperation {
                vendor: "FakeVendor",
                operation: "connect",
            }),
            Reach::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.state.lock().unwrap().disconnects += 1;
    }

    async fn get_status(&mut self) -> Result<RouterStatus, Error> {
        self.ensure_connected().await?;
        self.log("status");
        Ok(RouterStatus {
            model: Some("FakeBox 1".into()),
            ..RouterStatus::online()
        })
    }

    async fn get_connected_devices(&mut self) -> Result<Vec<ConnectedDevice>, Error> {
        self.ensure_connected().await?;
        self.log("devices");
        let state = self.state.lock().unwrap();
        if state.devices_fail {
            return Err(Error::ProtocolParse {
                endpoint: "/devices".into(),
                message: "garbled device table".into(),
            });
        }
        Ok(state.devices.clone())
    }

    async fn change_wifi_settings(
        &mut self,
        ssid: &str,
        _password: &SecretString,
        security: SecurityType,
    ) -> Result<(), Error> {
        self.ensure_connected().await?;
        self.log(format!("wifi {ssid} {security}"));
        Ok(())
    }

    async fn reboot(&mut self) -> Result<(), Error> {
        self.ensure_connected().await?;
        self.log("reboot");
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
        self.log(format!("create {external_port} {internal_ip}:{internal_port} {protocol}"));
        let mut state = self.state.lock().unwrap();
        if state.reject_ports.contains(&external_port) {
            return Err(Error::Rejected {
                operation: "port mapping".into(),
                message: "rule table full".into(),
            });
        }
        state.rules.push(DriverRule {
            id: format!("*{external_port}"),
            name: routerkit_api::managed_rule_name(external_port, protocol),
            external_port,
            internal_ip: Some(internal_ip),
            internal_port,
            protocol,
            enabled: true,
            managed: true,
        });
        Ok(())
    }

    async fn get_port_forwarding_rules(&mut self) -> Result<Vec<DriverRule>, Error> {
        self.ensure_connected().await?;
        self.log("rules");
        Ok(self.state.lock().unwrap().rules.clone())
    }

    async fn remove_port_forwarding(&mut self, external_port: u16, protocol: Protocol) -> Result<(), Error> {
        self.ensure_connected().await?;
        self.log(format!("remove {external_port} {protocol}"));
        let mut state = self.state.lock().unwrap();
        if state.stuck_ports.contains(&external_port) {
            return Err(Error::Rejected {
                operation: "port mapping removal".into(),
                message: "busy".into(),
            });
        }
        let before = state.rules.len();
        state
            .rules
            .retain(|r| !(r.external_port == external_port && r.protocol == protocol));
        if state.rules.len() == before {
            return Err(Error::NotFound {
                what: format!("rule for port {external_port}"),
            });
        }
        Ok(())
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub manager: RouterManager,
    pub routers: Vec<(RouterProfile, Shared)>,
}

impl Harness {
    pub fn router(&self, index: usize) -> &RouterProfile {
        &self.routers[index].0
    }

    pub fn state(&self, index: usize) -> &Shared {
        &self.routers[index].1
    }
}

/// One fake router per entry, registered under the Huawei tag and keyed
/// by IP, stored in a fresh `MemoryStore`.
pub async fn harness(reaches: &[Reach]) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let mut routers = Vec::new();
    for (i, reach) in reaches.iter().enumerate() {
        let n = u64::try_from(i).unwrap() + 1;
        let ip: IpAddr = format!("10.0.0.{n}").parse().unwrap();
        let mut profile = RouterProfile::new(RouterId(n), RouterType::Huawei, ip)
            .with_credentials("admin", SecretString::from("secret".to_owned()));
        profile.name = format!("site-{n}");
        store.insert_router(profile.clone()).await.unwrap();
        routers.push((profile, Arc::new(Mutex::new(FakeRouter::new(*reach)))));
    }

    let mut factory = DriverFactory::empty(TransportConfig::default());
    let states: Vec<(IpAddr, Shared)> = routers
        .iter()
        .map(|(p, s)| (p.ip_address, Arc::clone(s)))
        .collect();
    factory.register(RouterType::Huawei, move |profile, _| {
        let state = states
            .iter()
            .find(|(ip, _)| *ip == profile.ip_address)
            .map(|(_, s)| Arc::clone(s))
            .ok_or_else(|| Error::UnsupportedRouterType("unknown fake".into()))?;
        Ok(Box::new(FakeDriver {
            profile,
            state,
            connected: false,
        }))
    });

    let manager = RouterManager::new(
        factory,
        Arc::clone(&store) as Arc<dyn RouterStore>,
        Arc::clone(&store) as Arc<dyn RuleStore>,
        Arc::clone(&store) as Arc<dyn DeviceStore>,
    );
    Harness {
        store,
        manager,
        routers,
    }
}

pub fn device(mac: &str, ip: &str, hostname: &str) -> ConnectedDevice {
    let mut device = ConnectedDevice::new(mac, routerkit_api::DeviceSource::Dhcp);
    device.ip_address = Some(ip.parse().unwrap());
    device.hostname = Some(hostname.to_owned());
    device
}
