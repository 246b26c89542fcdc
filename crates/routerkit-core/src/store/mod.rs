// ── Persistence seams ──
//
// The services read and write through these traits; the persistence
// engine behind them is the caller's. `MemoryStore` is the bundled
// implementation used by the CLI and the tests.

mod memory;

pub use memory::{MemoryStore, RouterState, Snapshot};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use routerkit_api::{ConnectedDevice, DriverRule, RouterId, RouterProfile};

use crate::error::CoreError;
use crate::model::{CustomerId, DeviceRecord, NewPortRule, PortForwardingRule, RuleId};

/// Router connection profiles.
#[async_trait]
pub trait RouterStore: Send + Sync {
    async fn list_routers(&self) -> Result<Vec<RouterProfile>, CoreError>;

    /// Fails with `RouterNotFound`.
    async fn get_router(&self, id: RouterId) -> Result<RouterProfile, CoreError>;

    /// Fails with `DuplicateEndpoint` when the tenant already has a router
    /// at the same IP.
    async fn insert_router(&self, profile: RouterProfile) -> Result<(), CoreError>;

    async fn record_check(&self, id: RouterId, is_online: bool, checked_at: DateTime<Utc>) -> Result<(), CoreError>;

    /// Fails with `ProfileInUse` while active rules reference the router.
    async fn delete_router(&self, id: RouterId) -> Result<(), CoreError>;
}

/// Port-forwarding rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn active_rules(&self, router: RouterId) -> Result<Vec<PortForwardingRule>, CoreError>;

    async fn customer_rules(&self, router: RouterId, customer: CustomerId) -> Result<Vec<PortForwardingRule>, CoreError>;

    /// Every rule, active or not.
    async fn all_rules(&self) -> Result<Vec<PortForwardingRule>, CoreError>;

    /// Persist an active rule. Fails with `PortInUse` when another active
    /// rule on the router holds the external port.
    async fn insert_rule(&self, rule: NewPortRule) -> Result<PortForwardingRule, CoreError>;

    async fn deactivate_rule(&self, id: RuleId) -> Result<(), CoreError>;

    /// Reconcile a rule read back from the router, keyed by
    /// (router, external port, internal ip, internal port, protocol).
    async fn upsert_observed_rule(&self, router: RouterId, rule: &DriverRule) -> Result<(), CoreError>;
}

/// Devices seen on routers.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Active devices on a router, most recently seen first.
    async fn active_devices(&self, router: RouterId) -> Result<Vec<DeviceRecord>, CoreError>;

    /// Upsert devices by MAC, then deactivate any not seen since `stale_before`.
    /// Returns the number of devices written.
    async fn record_devices(
        &self,
        router: RouterId,
        devices: Vec<ConnectedDevice>,
        stale_before: DateTime<Utc>,
    ) -> Result<usize, CoreError>;
}
