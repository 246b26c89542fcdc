// Driver registry keyed by router type.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::driver::RouterDriver;
use crate::error::Error;
use crate::huawei::HuaweiDriver;
use crate::mikrotik::MikroTikDriver;
use crate::model::{RouterProfile, RouterType};
use crate::stub::UnsupportedDriver;
use crate::tenda::TendaDriver;
use crate::transport::TransportConfig;

/// Builds a not-yet-connected driver for a profile.
pub type DriverConstructor =
    Arc<dyn Fn(RouterProfile, &TransportConfig) -> Result<Box<dyn RouterDriver>, Error> + Send + Sync>;

/// Maps router types to driver constructors.
///
/// The default registry knows Huawei, MikroTik, Tenda and the TP-Link /
/// Ubiquiti stubs. `register` adds or replaces an entry.
#[derive(Clone)]
pub struct DriverFactory {
    transport: TransportConfig,
    registry: HashMap<RouterType, DriverConstructor>,
}

impl DriverFactory {
    /// Factory with every built-in driver registered.
    pub fn new(transport: TransportConfig) -> Self {
        let mut factory = Self::empty(transport);
        factory.register(RouterType::Huawei, |p, t| Ok(Box::new(HuaweiDriver::new(p, t)?)));
        factory.register(RouterType::Mikrotik, |p, t| Ok(Box::new(MikroTikDriver::new(p, t))));
        factory.register(RouterType::Tenda, |p, t| Ok(Box::new(TendaDriver::new(p, t)?)));
        factory.register(RouterType::Tplink, |p, _| Ok(Box::new(UnsupportedDriver::tplink(p))));
        factory.register(RouterType::Ubiquiti, |p, _| Ok(Box::new(UnsupportedDriver::ubiquiti(p))));
        factory
    }

    /// Factory with nothing registered.
    pub fn empty(transport: TransportConfig) -> Self {
        Self {
            transport,
            registry: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, router_type: RouterType, constructor: F)
    where
        F: Fn(RouterProfile, &TransportConfig) -> Result<Box<dyn RouterDriver>, Error>
            + Send
            + Sync
            + 'static,
    {
        self.registry.insert(router_type, Arc::new(constructor));
    }

    pub fn supports(&self, router_type: RouterType) -> bool {
        self.registry.contains_key(&router_type)
    }

    pub fn transport(&self) -> &TransportConfig {
        &self.transport
    }

    /// Build a driver for `profile`. Nothing is constructed for an
    /// unregistered type.
    pub fn get_driver(&self, profile: &RouterProfile) -> Result<Box<dyn RouterDriver>, Error> {
        let Some(constructor) = self.registry.get(&profile.router_type) else {
            return Err(Error::UnsupportedRouterType(profile.router_type.to_string()));
        };
        debug!(router = %profile.ip_address, router_type = %profile.router_type, "building driver");
        constructor(profile.clone(), &self.transport)
    }
}

impl Default for DriverFactory {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}
