// ── Port management service ──
//
// Hands out external ports per customer and drives the router to install
// or remove the matching forwarding rule. A rule is persisted only after
// the router accepted it, and deactivated only after the router confirmed
// it is gone.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use routerkit_api::{Protocol, RouterId, RouterProfile};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::allocator::{DEFAULT_RANGE_END, DEFAULT_RANGE_START, PortAllocator};
use crate::error::CoreError;
use crate::manager::RouterManager;
use crate::model::{Customer, PortForwardingRule, RemovalReport};

/// Port range and forwarding target for customer rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    pub range_start: u16,
    pub range_end: u16,
    /// Port on the customer's device that external traffic lands on.
    pub internal_port: u16,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            range_start: DEFAULT_RANGE_START,
            range_end: DEFAULT_RANGE_END,
            internal_port: 80,
        }
    }
}

// ── Customer IP resolution ──────────────────────────────────────────

/// Finds the LAN address a customer's rule should forward to.
#[async_trait]
pub trait CustomerIpResolver: Send + Sync {
    /// `Ok(None)` when no address can be determined.
    async fn resolve(&self, customer: &Customer, router: &RouterProfile) -> Result<Option<IpAddr>, CoreError>;
}

/// Resolves from devices seen on the router: a hostname containing the
/// customer's username first, then any active device. When neither is
/// known, devices are synced from the router once and the lookup retried.
pub struct DeviceLookupResolver {
    manager: RouterManager,
}

impl DeviceLookupResolver {
    pub fn new(manager: RouterManager) -> Self {
        Self { manager }
    }

    async fn lookup(&self, customer: &Customer, router: RouterId) -> Result<Option<IpAddr>, CoreError> {
        let devices = self.manager.devices().active_devices(router).await?;
        let username = customer.username.to_lowercase();

        let by_name = devices.iter().find_map(|d| {
            let hostname = d.device.hostname.as_deref()?.to_lowercase();
            if username.is_empty() || !hostname.contains(&username) {
                return None;
            }
            d.device.ip_address
        });
        Ok(by_name.or_else(|| devices.iter().find_map(|d| d.device.ip_address)))
    }
}

#[async_trait]
impl CustomerIpResolver for DeviceLookupResolver {
    async fn resolve(&self, customer: &Customer, router: &RouterProfile) -> Result<Option<IpAddr>, CoreError> {
        if let Some(ip) = self.lookup(customer, router.id).await? {
            return Ok(Some(ip));
        }

        debug!(router = %router.ip_address, customer = %customer.username, "no cached device, syncing");
        if let Err(e) = self.manager.sync_connected_devices(router).await {
            warn!(router = %router.ip_address, error = %e, "device sync for IP lookup failed");
            return Ok(None);
        }
        self.lookup(customer, router.id).await
    }
}

// ── Service ─────────────────────────────────────────────────────────

pub struct PortManagementService {
    manager: RouterManager,
    allocator: PortAllocator,
    settings: PortSettings,
    resolver: Arc<dyn CustomerIpResolver>,
}

impl PortManagementService {
    pub fn new(manager: RouterManager, settings: PortSettings, resolver: Arc<dyn CustomerIpResolver>) -> Self {
        Self {
            allocator: PortAllocator::new(settings.range_start..=settings.range_end),
            manager,
            settings,
            resolver,
        }
    }

    /// Service resolving customer IPs from devices seen on the router.
    pub fn with_device_lookup(manager: RouterManager, settings: PortSettings) -> Self {
        let resolver = Arc::new(DeviceLookupResolver::new(manager.clone()));
        Self::new(manager, settings, resolver)
    }

    pub fn settings(&self) -> &PortSettings {
        &self.settings
    }

    /// Claim a free external port for `customer`. The claim holds until
    /// [`release_claim`](Self::release_claim).
    pub async fn assign_customer_port(&self, customer: &Customer, router: &RouterProfile) -> Result<u16, CoreError> {
        let port = self
            .allocator
            .claim(router.id, self.manager.rules().as_ref())
            .await?;
        debug!(router = %router.ip_address, customer = %customer.username, port, "port assigned");
        Ok(port)
    }

    pub async fn release_claim(&self, router: RouterId, port: u16) {
        self.allocator.release(router, port).await;
    }

    /// Up to `limit` unclaimed ports with no active rule, lowest first.
    pub async fn get_available_ports(&self, router: RouterId, limit: usize) -> Result<Vec<u16>, CoreError> {
        self.allocator
            .available(router, self.manager.rules().as_ref(), limit)
            .await
    }

    /// Active rules the customer holds on `router`.
    pub async fn customer_rules(&self, customer: &Customer, router: RouterId) -> Result<Vec<PortForwardingRule>, CoreError> {
        self.manager.rules().customer_rules(router, customer.id).await
    }

    /// Forward a fresh external port to the customer's device.
    pub async fn setup_customer_port_forwarding(
        &self,
        customer: &Customer,
        router: &RouterProfile,
    ) -> Result<PortForwardingRule, CoreError> {
        let internal_ip = self
            .resolver
            .resolve(customer, router)
            .await?
            .ok_or(CoreError::CustomerIpUnavailable { customer: customer.id })?;

        let port = self.assign_customer_port(customer, router).await?;
        let result = self
            .manager
            .create_port_forwarding_rule(
                router,
                Some(customer),
                port,
                internal_ip,
                self.settings.internal_port,
                Protocol::Tcp,
                Some(format!("Web access for {}", customer.username)),
            )
            .await;
        self.release_claim(router.id, port).await;

        match &result {
            Ok(rule) => info!(
                router = %router.ip_address,
                customer = %customer.username,
                port = rule.external_port,
                target = %internal_ip,
                "customer port forwarding set up"
            ),
            Err(e) => warn!(
                router = %router.ip_address,
                customer = %customer.username,
                port,
                error = %e,
                "customer port forwarding failed"
            ),
        }
        result
    }

    /// Remove every active rule the customer holds on `router`.
    ///
    /// A rule is deactivated only when the router confirmed removal or
    /// reported it already absent; anything else lands in `failed` and the
    /// rule stays active.
    pub async fn remove_customer_port_forwarding(
        &self,
        customer: &Customer,
        router: &RouterProfile,
    ) -> Result<RemovalReport, CoreError> {
        let rules = self.customer_rules(customer, router.id).await?;
        let mut report = RemovalReport::default();
        if rules.is_empty() {
            return Ok(report);
        }

        let mut driver = match self.manager.connected_driver(router).await {
            Ok(driver) => driver,
            Err(e) => {
                let reason = e.to_string();
                warn!(router = %router.ip_address, error = %reason, "cannot remove customer rules");
                report.failed = rules.iter().map(|r| (r.id, reason.clone())).collect();
                return Ok(report);
            }
        };

        for rule in &rules {
            match driver.remove_port_forwarding(rule.external_port, rule.protocol).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(router = %router.ip_address, port = rule.external_port, "rule already absent on router");
                }
                Err(e) => {
                    warn!(router = %router.ip_address, port = rule.external_port, error = %e, "rule removal failed");
                    report.failed.push((rule.id, e.to_string()));
                    continue;
                }
            }
            match self.manager.rules().deactivate_rule(rule.id).await {
                Ok(()) => report.removed.push(rule.id),
                Err(e) => report.failed.push((rule.id, e.to_string())),
            }
        }
        driver.disconnect().await;

        info!(
            router = %router.ip_address,
            customer = %customer.username,
            removed = report.removed.len(),
            failed = report.failed.len(),
            "customer port forwarding removed"
        );
        Ok(report)
    }
}
