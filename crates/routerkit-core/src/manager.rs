// ── Router manager ──
//
// On-demand router operations. Every call builds its own driver from the
// factory, connects, does its work and disconnects; nothing is cached
// across calls except what lands in the stores.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use routerkit_api::{
    DriverFactory, DriverRule, Protocol, RouterDriver, RouterProfile, RouterStatus, SecurityType,
};
use secrecy::SecretString;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::model::{
    Connectivity, ConnectionTest, Customer, HealthReport, NewPortRule, PortForwardingRule,
    SampleProbe, StatusReport,
};
use crate::store::{DeviceStore, RouterStore, RuleStore};

/// A fresh status check is skipped when the last one is younger than this.
pub const STATUS_CACHE_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Devices not seen for this long are marked inactive after a sync.
pub const DEVICE_STALE_AFTER: Duration = Duration::from_secs(10 * 60);

/// Cheaply cloneable handle over the factory and stores.
#[derive(Clone)]
pub struct RouterManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    factory: DriverFactory,
    routers: Arc<dyn RouterStore>,
    rules: Arc<dyn RuleStore>,
    devices: Arc<dyn DeviceStore>,
}

impl RouterManager {
    pub fn new(
        factory: DriverFactory,
        routers: Arc<dyn RouterStore>,
        rules: Arc<dyn RuleStore>,
        devices: Arc<dyn DeviceStore>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                factory,
                routers,
                rules,
                devices,
            }),
        }
    }

    pub fn factory(&self) -> &DriverFactory {
        &self.inner.factory
    }

    pub fn routers(&self) -> &Arc<dyn RouterStore> {
        &self.inner.routers
    }

    pub fn rules(&self) -> &Arc<dyn RuleStore> {
        &self.inner.rules
    }

    pub fn devices(&self) -> &Arc<dyn DeviceStore> {
        &self.inner.devices
    }

    /// Build and connect a driver for `profile`.
    pub async fn connected_driver(&self, profile: &RouterProfile) -> Result<Box<dyn RouterDriver>, CoreError> {
        let mut driver = self.inner.factory.get_driver(profile)?;
        if let Err(e) = driver.connect().await {
            driver.disconnect().await;
            return Err(e.into());
        }
        Ok(driver)
    }

    // ── Connectivity ───────────────────────────────────────────────

    /// Connect and read status, recording `is_online` / `last_checked`.
    ///
    /// Unknown router types and vendors without a working driver are an
    /// `Err` and leave the stored state untouched. Reachability and login
    /// problems are reported through [`Connectivity`].
    pub async fn test_connection(&self, profile: &RouterProfile) -> Result<ConnectionTest, CoreError> {
        let mut driver = self.inner.factory.get_driver(profile)?;

        let (connectivity, status, message) = match driver.connect().await {
            Err(e @ routerkit_api::Error::UnsupportedOperation { .. }) => {
                driver.disconnect().await;
                return Err(e.into());
            }
            Err(e) if e.is_unreachable() => (Connectivity::Unreachable, None, e.to_string()),
            Err(e) => (Connectivity::LoginFailed, None, e.to_string()),
            Ok(()) => match driver.get_status().await {
                Ok(status) if status.is_online => {
                    let message = status
                        .parse_error
                        .clone()
                        .map_or_else(|| "Connection successful".to_owned(), |e| format!("Online, status unreadable: {e}"));
                    (Connectivity::Online, Some(status), message)
                }
                Ok(status) => (Connectivity::Unreachable, Some(status), "Router reported offline".to_owned()),
                Err(e) if e.is_unreachable() => (Connectivity::Unreachable, None, e.to_string()),
                Err(e) if e.is_auth() => (Connectivity::LoginFailed, None, e.to_string()),
                Err(e) => {
                    warn!(router = %profile.ip_address, error = %e, "status read failed after login");
                    (Connectivity::Online, None, format!("Online, status failed: {e}"))
                }
            },
        };
        driver.disconnect().await;

        let checked_at = Utc::now();
        self.record_check(profile, connectivity == Connectivity::Online, checked_at)
            .await;
        debug!(router = %profile.ip_address, %connectivity, "connection tested");
        Ok(ConnectionTest {
            connectivity,
            status,
            message,
            checked_at,
        })
    }

    async fn record_check(&self, profile: &RouterProfile, is_online: bool, at: chrono::DateTime<Utc>) {
        if let Err(e) = self.inner.routers.record_check(profile.id, is_online, at).await {
            debug!(router = %profile.ip_address, error = %e, "check not recorded");
        }
    }

    /// Cached status when the last check is recent, otherwise a fresh test.
    pub async fn get_router_status(&self, profile: &RouterProfile, force: bool) -> Result<StatusReport, CoreError> {
        let stored = self.inner.routers.get_router(profile.id).await.ok();
        let last = stored.as_ref().unwrap_or(profile);

        if !force {
            if let Some(checked) = last.last_checked {
                let age = Utc::now().signed_duration_since(checked);
                if age.to_std().is_ok_and(|age| age < STATUS_CACHE_WINDOW) {
                    return Ok(StatusReport {
                        is_online: last.is_online,
                        last_checked: Some(checked),
                        cached: true,
                        status: None,
                        message: "Using cached status".into(),
                    });
                }
            }
        }

        let test = self.test_connection(profile).await?;
        Ok(StatusReport {
            is_online: test.connectivity == Connectivity::Online,
            last_checked: Some(test.checked_at),
            cached: false,
            status: test.status,
            message: test.message,
        })
    }

    // ── Devices ────────────────────────────────────────────────────

    /// Read connected devices and record them. Returns the count written.
    pub async fn sync_connected_devices(&self, profile: &RouterProfile) -> Result<usize, CoreError> {
        let mut driver = self.connected_driver(profile).await?;
        let result = driver.get_connected_devices().await;
        driver.disconnect().await;
        let devices = result?;

        let stale_before = Utc::now() - chrono::Duration::from_std(DEVICE_STALE_AFTER).unwrap_or_default();
        let written = self
            .inner
            .devices
            .record_devices(profile.id, devices, stale_before)
            .await?;
        info!(router = %profile.ip_address, devices = written, "connected devices synced");
        Ok(written)
    }

    // ── Configuration ──────────────────────────────────────────────

    pub async fn update_wifi_settings(
        &self,
        profile: &RouterProfile,
        ssid: &str,
        password: &SecretString,
        security: SecurityType,
    ) -> Result<(), CoreError> {
        let mut driver = self.connected_driver(profile).await?;
        let result = driver.change_wifi_settings(ssid, password, security).await;
        driver.disconnect().await;
        result?;
        info!(router = %profile.ip_address, ssid, %security, "WiFi settings changed");
        Ok(())
    }

    /// Reboot and mark the router offline until the next check.
    pub async fn reboot_router(&self, profile: &RouterProfile) -> Result<(), CoreError> {
        let mut driver = self.connected_driver(profile).await?;
        let result = driver.reboot().await;
        driver.disconnect().await;
        result?;
        self.record_check(profile, false, Utc::now()).await;
        info!(router = %profile.ip_address, "router reboot initiated");
        Ok(())
    }

    // ── Port forwarding ────────────────────────────────────────────

    /// Rules configured on the router, reconciled into the rule store.
    pub async fn sync_port_forwarding_rules(&self, profile: &RouterProfile) -> Result<Vec<DriverRule>, CoreError> {
        let mut driver = self.connected_driver(profile).await?;
        let result = driver.get_port_forwarding_rules().await;
        driver.disconnect().await;
        let rules = result?;

        for rule in &rules {
            self.inner.rules.upsert_observed_rule(profile.id, rule).await?;
        }
        info!(router = %profile.ip_address, rules = rules.len(), "port forwarding rules synced");
        Ok(rules)
    }

    /// Install a rule on the router and persist it. Nothing is persisted
    /// unless the driver reports success.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_port_forwarding_rule(
        &self,
        profile: &RouterProfile,
        customer: Option<&Customer>,
        external_port: u16,
        internal_ip: IpAddr,
        internal_port: u16,
        protocol: Protocol,
        description: Option<String>,
    ) -> Result<PortForwardingRule, CoreError> {
        let mut driver = self.connected_driver(profile).await?;
        let result = driver
            .create_port_forwarding(external_port, internal_ip, internal_port, protocol)
            .await;
        driver.disconnect().await;
        result?;

        let rule = self
            .inner
            .rules
            .insert_rule(NewPortRule {
                router_id: profile.id,
                customer_id: customer.map(|c| c.id),
                external_port,
                internal_ip,
                internal_port,
                protocol,
                description: description.unwrap_or_else(|| format!("Port {external_port} forwarding")),
            })
            .await?;
        info!(
            router = %profile.ip_address,
            port = external_port,
            %protocol,
            target = %format!("{internal_ip}:{internal_port}"),
            "port forwarding created"
        );
        Ok(rule)
    }

    /// Remove a rule from the router and deactivate it. A rule already
    /// absent on the router counts as removed.
    pub async fn delete_port_forwarding_rule(&self, rule: &PortForwardingRule) -> Result<(), CoreError> {
        let profile = self.inner.routers.get_router(rule.router_id).await?;
        let mut driver = self.connected_driver(&profile).await?;
        let result = driver.remove_port_forwarding(rule.external_port, rule.protocol).await;
        driver.disconnect().await;

        match result {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(router = %profile.ip_address, port = rule.external_port, "rule already absent on router");
            }
            Err(e) => return Err(e.into()),
        }
        self.inner.rules.deactivate_rule(rule.id).await?;
        info!(router = %profile.ip_address, port = rule.external_port, "port forwarding removed");
        Ok(())
    }

    // ── Health ─────────────────────────────────────────────────────

    /// Store counters plus a connection test of the first router.
    pub async fn health_check(&self) -> Result<HealthReport, CoreError> {
        let routers = self.inner.routers.list_routers().await?;
        let active_port_rules = self
            .inner
            .rules
            .all_rules()
            .await?
            .iter()
            .filter(|r| r.is_active)
            .count();

        let sample = match routers.first() {
            Some(profile) => Some(match self.test_connection(profile).await {
                Ok(test) => SampleProbe {
                    router: profile.name.clone(),
                    connectivity: Some(test.connectivity),
                    message: test.message,
                },
                Err(e) => SampleProbe {
                    router: profile.name.clone(),
                    connectivity: None,
                    message: e.to_string(),
                },
            }),
            None => None,
        };

        // Counted after the sample probe so its result is included.
        let online_routers = self
            .inner
            .routers
            .list_routers()
            .await?
            .iter()
            .filter(|r| r.is_online)
            .count();

        Ok(HealthReport {
            router_count: routers.len(),
            online_routers,
            active_port_rules,
            sample,
        })
    }

    /// Status of a router without touching the store.
    pub async fn read_status(&self, profile: &RouterProfile) -> Result<RouterStatus, CoreError> {
        let mut driver = self.connected_driver(profile).await?;
        let result = driver.get_status().await;
        driver.disconnect().await;
        Ok(result?)
    }
}
