// ── Driver contract ──
//
// One trait every vendor driver implements. A driver owns its session
// (HTTP cookie jar, digest state, RouterOS socket) exclusively: methods
// take `&mut self`, so sharing a session across tasks requires building
// a second driver.

use std::net::IpAddr;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::Error;
use crate::model::{ConnectedDevice, DriverRule, Protocol, RouterProfile, RouterStatus, SecurityType};

/// Uniform operation set over heterogeneous router vendors.
///
/// Every operation establishes a session first when none exists
/// (see [`RouterDriver::ensure_connected`]). Failures are typed: an
/// unreachable router surfaces as [`Error::Connection`] or
/// [`Error::Timeout`], refused credentials as [`Error::Authentication`],
/// and a router that answered "no" as [`Error::Rejected`].
#[async_trait]
pub trait RouterDriver: Send {
    /// Profile this driver was built from.
    fn profile(&self) -> &RouterProfile;

    /// Whether a session is currently held.
    fn is_connected(&self) -> bool;

    /// Establish and authenticate a session. Idempotent.
    async fn connect(&mut self) -> Result<(), Error>;

    /// Release the session. Never fails; a no-op if never connected.
    async fn disconnect(&mut self);

    /// Connect if no session is held.
    async fn ensure_connected(&mut self) -> Result<(), Error> {
        if self.is_connected() {
            return Ok(());
        }
        self.connect().await
    }

    /// Current router status.
    ///
    /// A reachable router whose reply cannot be decoded yields
    /// `Ok` with `is_online = true` and `parse_error` set.
    async fn get_status(&mut self) -> Result<RouterStatus, Error>;

    /// Clients currently attached. Empty when the router reports none.
    async fn get_connected_devices(&mut self) -> Result<Vec<ConnectedDevice>, Error>;

    /// Change SSID, passphrase and security mode.
    ///
    /// Security types the vendor cannot express fail with
    /// [`Error::UnsupportedSecurity`] before any request is sent.
    async fn change_wifi_settings(
        &mut self,
        ssid: &str,
        password: &SecretString,
        security: SecurityType,
    ) -> Result<(), Error>;

    /// Reboot. A connection dropped after the request was sent counts as success.
    async fn reboot(&mut self) -> Result<(), Error>;

    /// Install a port-forwarding rule. `Protocol::Both` installs TCP and UDP
    /// and only succeeds if both do.
    async fn create_port_forwarding(
        &mut self,
        external_port: u16,
        internal_ip: IpAddr,
        internal_port: u16,
        protocol: Protocol,
    ) -> Result<(), Error>;

    /// Rules currently configured on the router.
    async fn get_port_forwarding_rules(&mut self) -> Result<Vec<DriverRule>, Error>;

    /// Remove the rule(s) forwarding `external_port` / `protocol`.
    /// Fails with [`Error::NotFound`] when nothing matches.
    async fn remove_port_forwarding(
        &mut self,
        external_port: u16,
        protocol: Protocol,
    ) -> Result<(), Error>;
}

/// Name used for rules this system creates on HTTP routers.
pub fn managed_rule_name(external_port: u16, protocol: Protocol) -> String {
    format!(
        "{MANAGED_RULE_PREFIX}{external_port}_{}",
        protocol.as_str().to_ascii_uppercase()
    )
}

/// Prefix that marks a router-side rule as created by routerkit.
pub const MANAGED_RULE_PREFIX: &str = "CloudConnect_";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_names_carry_port_and_protocol() {
        assert_eq!(managed_rule_name(10001, Protocol::Tcp), "CloudConnect_10001_TCP");
        assert_eq!(managed_rule_name(10001, Protocol::Both), "CloudConnect_10001_BOTH");
    }
}
