// Placeholder drivers for vendors the factory recognizes but cannot drive yet.

use std::net::IpAddr;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::driver::RouterDriver;
use crate::error::Error;
use crate::model::{ConnectedDevice, DriverRule, Protocol, RouterProfile, RouterStatus, SecurityType};

/// Driver whose every operation reports `UnsupportedOperation`.
pub struct UnsupportedDriver {
    profile: RouterProfile,
    vendor: &'static str,
}

impl UnsupportedDriver {
    pub fn tplink(profile: RouterProfile) -> Self {
        Self {
            profile,
            vendor: "TP-Link",
        }
    }

    pub fn ubiquiti(profile: RouterProfile) -> Self {
        Self {
            profile,
            vendor: "Ubiquiti",
        }
    }

    fn unsupported<T>(&self, operation: &'static str) -> Result<T, Error> {
        Err(Error::UnsupportedOperation {
            vendor: self.vendor,
            operation,
        })
    }
}

#[async_trait]
impl RouterDriver for UnsupportedDriver {
    fn profile(&self) -> &RouterProfile {
        &self.profile
    }

    fn is_connected(&self) -> bool {
        false
    }

    async fn connect(&mut self) -> Result<(), Error> {
        self.unsupported("connect")
    }

    async fn disconnect(&mut self) {}

    async fn get_status(&mut self) -> Result<RouterStatus, Error> {
        self.unsupported("get_status")
    }

    async fn get_connected_devices(&mut self) -> Result<Vec<ConnectedDevice>, Error> {
        self.unsupported("get_connected_devices")
    }

    async fn change_wifi_settings(
        &mut self,
        _ssid: &str,
        _password: &SecretString,
        _security: SecurityType,
    ) -> Result<(), Error> {
        self.unsupported("change_wifi_settings")
    }

    async fn reboot(&mut self) -> Result<(), Error> {
        self.unsupported("reboot")
    }

    async fn create_port_forwarding(
        &mut self,
        _external_port: u16,
        _internal_ip: IpAddr,
        _internal_port: u16,
        _protocol: Protocol,
    ) -> Result<(), Error> {
        self.unsupported("create_port_forwarding")
    }

    async fn get_port_forwarding_rules(&mut self) -> Result<Vec<DriverRule>, Error> {
        self.unsupported("get_port_forwarding_rules")
    }

    async fn remove_port_forwarding(
        &mut self,
        _external_port: u16,
        _protocol: Protocol,
    ) -> Result<(), Error> {
        self.unsupported("remove_port_forwarding")
    }
}
