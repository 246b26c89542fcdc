// ── In-memory store ──
//
// DashMap-backed implementation of every store trait. Uniqueness
// (tenant + IP per router, external port per router among active rules)
// is enforced through index maps claimed with the entry API.

use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use routerkit_api::{ConnectedDevice, DriverRule, MacAddress, RouterId, RouterProfile, TenantId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{DeviceStore, RouterStore, RuleStore};
use crate::error::CoreError;
use crate::model::{CustomerId, DeviceRecord, NewPortRule, PortForwardingRule, RuleId};

/// Persisted runtime state of one router (the profile itself comes from config).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterState {
    pub id: RouterId,
    pub is_online: bool,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Serializable image of a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub routers: Vec<RouterState>,
    #[serde(default)]
    pub rules: Vec<PortForwardingRule>,
    #[serde(default)]
    pub devices: Vec<DeviceRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    routers: DashMap<RouterId, RouterProfile>,
    endpoints: DashMap<(TenantId, IpAddr), RouterId>,
    rules: DashMap<RuleId, PortForwardingRule>,
    active_ports: DashMap<(RouterId, u16), RuleId>,
    devices: DashMap<(RouterId, MacAddress), DeviceRecord>,
    /// Last rule id handed out.
    next_rule: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_rule_id(&self) -> RuleId {
        RuleId(self.next_rule.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Insert a rule under the active-port index; inactive rules skip it.
    fn store_rule(&self, rule: PortForwardingRule) -> Result<PortForwardingRule, CoreError> {
        if rule.is_active {
            match self.active_ports.entry((rule.router_id, rule.external_port)) {
                Entry::Occupied(_) => {
                    return Err(CoreError::PortInUse {
                        router: rule.router_id,
                        port: rule.external_port,
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(rule.id);
                }
            }
        }
        self.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    fn set_active(&self, id: RuleId, active: bool) -> Result<bool, CoreError> {
        let mut rule = self.rules.get_mut(&id).ok_or(CoreError::RuleNotFound { id })?;
        if rule.is_active == active {
            return Ok(true);
        }
        let key = (rule.router_id, rule.external_port);
        if active {
            match self.active_ports.entry(key) {
                Entry::Occupied(_) => return Ok(false),
                Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }
        } else {
            self.active_ports.remove_if(&key, |_, holder| *holder == id);
        }
        rule.is_active = active;
        Ok(true)
    }

    // ── Snapshot ────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Snapshot {
        let mut routers: Vec<RouterState> = self
            .routers
            .iter()
            .map(|r| RouterState {
                id: r.id,
                is_online: r.is_online,
                last_checked: r.last_checked,
            })
            .collect();
        routers.sort_by_key(|r| r.id);

        let mut rules: Vec<PortForwardingRule> = self.rules.iter().map(|r| r.value().clone()).collect();
        rules.sort_by_key(|r| r.id);

        let devices = self.devices.iter().map(|d| d.value().clone()).collect();
        Snapshot {
            routers,
            rules,
            devices,
        }
    }

    /// Apply a snapshot. Router state only applies to routers already
    /// inserted; rules keep their ids.
    pub fn restore(&self, snapshot: Snapshot) -> Result<(), CoreError> {
        for state in snapshot.routers {
            if let Some(mut profile) = self.routers.get_mut(&state.id) {
                profile.is_online = state.is_online;
                profile.last_checked = state.last_checked;
            }
        }
        for rule in snapshot.rules {
            let issued = rule.id.0;
            self.store_rule(rule)?;
            self.next_rule.fetch_max(issued, Ordering::SeqCst);
        }
        for record in snapshot.devices {
            self.devices
                .insert((record.router_id, record.device.mac_address.clone()), record);
        }
        Ok(())
    }

    pub async fn save_to(&self, path: &Path) -> Result<(), CoreError> {
        let json = serde_json::to_vec_pretty(&self.snapshot()).map_err(|e| CoreError::store(e.to_string()))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::store(format!("{}: {e}", parent.display())))?;
        }
        tokio::fs::write(path, json)
            .await
            .map_err(|e| CoreError::store(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "state snapshot written");
        Ok(())
    }

    /// Restore from `path`; a missing file leaves the store untouched.
    pub async fn load_from(&self, path: &Path) -> Result<(), CoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CoreError::store(format!("{}: {e}", path.display()))),
        };
        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|e| CoreError::store(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), rules = snapshot.rules.len(), "state snapshot loaded");
        self.restore(snapshot)
    }
}

#[async_trait]
impl RouterStore for MemoryStore {
    async fn list_routers(&self) -> Result<Vec<RouterProfile>, CoreError> {
        let mut routers: Vec<RouterProfile> = self.routers.iter().map(|r| r.value().clone()).collect();
        routers.sort_by_key(|r| r.id);
        Ok(routers)
    }

    async fn get_router(&self, id: RouterId) -> Result<RouterProfile, CoreError> {
        self.routers
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| CoreError::RouterNotFound {
                identifier: id.to_string(),
            })
    }

    async fn insert_router(&self, profile: RouterProfile) -> Result<(), CoreError> {
        let key = (profile.tenant_id, profile.ip_address);
        match self.endpoints.entry(key) {
            Entry::Occupied(existing) if *existing.get() != profile.id => Err(CoreError::DuplicateEndpoint {
                tenant: profile.tenant_id,
                ip: profile.ip_address,
            }),
            Entry::Occupied(_) => {
                self.routers.insert(profile.id, profile);
                Ok(())
            }
            Entry::Vacant(slot) => {
                slot.insert(profile.id);
                if let Some(previous) = self.routers.insert(profile.id, profile) {
                    self.endpoints.remove(&(previous.tenant_id, previous.ip_address));
                }
                Ok(())
            }
        }
    }

    async fn record_check(&self, id: RouterId, is_online: bool, checked_at: DateTime<Utc>) -> Result<(), CoreError> {
        let mut profile = self.routers.get_mut(&id).ok_or_else(|| CoreError::RouterNotFound {
            identifier: id.to_string(),
        })?;
        profile.is_online = is_online;
        profile.last_checked = Some(checked_at);
        Ok(())
    }

    async fn delete_router(&self, id: RouterId) -> Result<(), CoreError> {
        let active_rules = self.active_ports.iter().filter(|e| e.key().0 == id).count();
        if active_rules > 0 {
            return Err(CoreError::ProfileInUse {
                router: id,
                active_rules,
            });
        }
        let (_, profile) = self.routers.remove(&id).ok_or_else(|| CoreError::RouterNotFound {
            identifier: id.to_string(),
        })?;
        self.endpoints.remove(&(profile.tenant_id, profile.ip_address));
        self.devices.retain(|(router, _), _| *router != id);
        Ok(())
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn active_rules(&self, router: RouterId) -> Result<Vec<PortForwardingRule>, CoreError> {
        let mut rules: Vec<PortForwardingRule> = self
            .rules
            .iter()
            .filter(|r| r.router_id == router && r.is_active)
            .map(|r| r.value().clone())
            .collect();
        rules.sort_by_key(|r| r.external_port);
        Ok(rules)
    }

    async fn customer_rules(&self, router: RouterId, customer: CustomerId) -> Result<Vec<PortForwardingRule>, CoreError> {
        let mut rules: Vec<PortForwardingRule> = self
            .rules
            .iter()
            .filter(|r| r.router_id == router && r.customer_id == Some(customer) && r.is_active)
            .map(|r| r.value().clone())
            .collect();
        rules.sort_by_key(|r| r.id);
        Ok(rules)
    }

    async fn all_rules(&self) -> Result<Vec<PortForwardingRule>, CoreError> {
        let mut rules: Vec<PortForwardingRule> = self.rules.iter().map(|r| r.value().clone()).collect();
        rules.sort_by_key(|r| r.id);
        Ok(rules)
    }

    async fn insert_rule(&self, rule: NewPortRule) -> Result<PortForwardingRule, CoreError> {
        self.store_rule(PortForwardingRule {
            id: self.allocate_rule_id(),
            router_id: rule.router_id,
            customer_id: rule.customer_id,
            external_port: rule.external_port,
            internal_ip: rule.internal_ip,
            internal_port: rule.internal_port,
            protocol: rule.protocol,
            is_active: true,
            description: rule.description,
            created_at: Utc::now(),
        })
    }

    async fn deactivate_rule(&self, id: RuleId) -> Result<(), CoreError> {
        self.set_active(id, false).map(|_| ())
    }

    async fn upsert_observed_rule(&self, router: RouterId, observed: &DriverRule) -> Result<(), CoreError> {
        let Some(internal_ip) = observed.internal_ip else {
            debug!(router = %router, port = observed.external_port, "skipping rule without internal address");
            return Ok(());
        };

        let existing = self
            .rules
            .iter()
            .find(|r| {
                r.router_id == router
                    && r.external_port == observed.external_port
                    && r.internal_ip == internal_ip
                    && r.internal_port == observed.internal_port
                    && r.protocol == observed.protocol
            })
            .map(|r| r.id);

        match existing {
            Some(id) => {
                if !self.set_active(id, observed.enabled)? {
                    debug!(router = %router, port = observed.external_port, "port held by another rule, left inactive");
                }
                if let Some(mut rule) = self.rules.get_mut(&id) {
                    if rule.description.is_empty() {
                        rule.description.clone_from(&observed.name);
                    }
                }
                Ok(())
            }
            None => {
                let port_free = !self.active_ports.contains_key(&(router, observed.external_port));
                self.store_rule(PortForwardingRule {
                    id: self.allocate_rule_id(),
                    router_id: router,
                    customer_id: None,
                    external_port: observed.external_port,
                    internal_ip,
                    internal_port: observed.internal_port,
                    protocol: observed.protocol,
                    is_active: observed.enabled && port_free,
                    description: observed.name.clone(),
                    created_at: Utc::now(),
                })
                .map(|_| ())
            }
        }
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn active_devices(&self, router: RouterId) -> Result<Vec<DeviceRecord>, CoreError> {
        let mut devices: Vec<DeviceRecord> = self
            .devices
            .iter()
            .filter(|d| d.router_id == router && d.is_active)
            .map(|d| d.value().clone())
            .collect();
        devices.sort_by(|a, b| b.device.last_seen.cmp(&a.device.last_seen));
        Ok(devices)
    }

    async fn record_devices(
        &self,
        router: RouterId,
        devices: Vec<ConnectedDevice>,
        stale_before: DateTime<Utc>,
    ) -> Result<usize, CoreError> {
        let mut written = 0;
        for device in devices {
            let key = (router, device.mac_address.clone());
            match self.devices.entry(key) {
                Entry::Occupied(mut slot) => {
                    let record = slot.get_mut();
                    let previous = std::mem::replace(&mut record.device, device);
                    if record.device.ip_address.is_none() {
                        record.device.ip_address = previous.ip_address;
                    }
                    if record.device.hostname.is_none() {
                        record.device.hostname = previous.hostname;
                    }
                    record.kind = crate::model::DeviceKind::detect(record.device.hostname.as_deref());
                    record.is_active = true;
                }
                Entry::Vacant(slot) => {
                    slot.insert(DeviceRecord::new(router, device));
                }
            }
            written += 1;
        }

        for mut record in self.devices.iter_mut() {
            if record.router_id == router && record.device.last_seen < stale_before {
                record.is_active = false;
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;
    use routerkit_api::{DeviceSource, Protocol, RouterType};

    use super::*;

    fn profile(id: u64, ip: &str) -> RouterProfile {
        RouterProfile::new(RouterId(id), RouterType::Mikrotik, ip.parse().unwrap())
    }

    fn new_rule(router: u64, port: u16) -> NewPortRule {
        NewPortRule {
            router_id: RouterId(router),
            customer_id: Some(CustomerId(1)),
            external_port: port,
            internal_ip: "192.168.88.10".parse().unwrap(),
            internal_port: 80,
            protocol: Protocol::Tcp,
            description: "web".into(),
        }
    }

    #[tokio::test]
    async fn tenant_ip_pairs_are_unique() {
        let store = MemoryStore::new();
        store.insert_router(profile(1, "10.0.0.1")).await.unwrap();
        let err = store.insert_router(profile(2, "10.0.0.1")).await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateEndpoint { .. }));

        let mut other_tenant = profile(3, "10.0.0.1");
        other_tenant.tenant_id = TenantId(2);
        store.insert_router(other_tenant).await.unwrap();
    }

    #[tokio::test]
    async fn active_external_ports_are_unique_per_router() {
        let store = MemoryStore::new();
        let first = store.insert_rule(new_rule(1, 10000)).await.unwrap();
        assert!(matches!(
            store.insert_rule(new_rule(1, 10000)).await.unwrap_err(),
            CoreError::PortInUse { port: 10000, .. }
        ));
        store.insert_rule(new_rule(2, 10000)).await.unwrap();

        store.deactivate_rule(first.id).await.unwrap();
        store.insert_rule(new_rule(1, 10000)).await.unwrap();
    }

    #[tokio::test]
    async fn router_with_active_rules_cannot_be_deleted() {
        let store = MemoryStore::new();
        store.insert_router(profile(1, "10.0.0.1")).await.unwrap();
        let rule = store.insert_rule(new_rule(1, 10001)).await.unwrap();

        let err = store.delete_router(RouterId(1)).await.unwrap_err();
        assert!(matches!(err, CoreError::ProfileInUse { active_rules: 1, .. }));

        store.deactivate_rule(rule.id).await.unwrap();
        store.delete_router(RouterId(1)).await.unwrap();
        store.insert_router(profile(2, "10.0.0.1")).await.unwrap();
    }

    #[tokio::test]
    async fn stale_devices_are_deactivated() {
        let store = MemoryStore::new();
        let mut old = ConnectedDevice::new("aa:bb:cc:00:00:01", DeviceSource::Dhcp);
        old.last_seen = Utc::now() - Duration::minutes(30);
        let fresh = ConnectedDevice::new("aa:bb:cc:00:00:02", DeviceSource::Wireless);

        let written = store
            .record_devices(RouterId(1), vec![old, fresh], Utc::now() - Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(written, 2);

        let active = store.active_devices(RouterId(1)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].device.mac_address.as_str(), "aa:bb:cc:00:00:02");
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = MemoryStore::new();
        store.insert_router(profile(1, "10.0.0.1")).await.unwrap();
        store.record_check(RouterId(1), true, Utc::now()).await.unwrap();
        store.insert_rule(new_rule(1, 10002)).await.unwrap();
        store.save_to(&path).await.unwrap();

        let restored = MemoryStore::new();
        restored.insert_router(profile(1, "10.0.0.1")).await.unwrap();
        restored.load_from(&path).await.unwrap();

        assert!(restored.get_router(RouterId(1)).await.unwrap().is_online);
        assert_eq!(restored.active_rules(RouterId(1)).await.unwrap().len(), 1);
        let next = restored.insert_rule(new_rule(1, 10003)).await.unwrap();
        assert_eq!(next.id, RuleId(2));
    }

    #[tokio::test]
    async fn missing_snapshot_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        MemoryStore::new().load_from(&dir.path().join("absent.json")).await.unwrap();
    }

    #[tokio::test]
    async fn observed_rules_reconcile_by_tuple() {
        let store = MemoryStore::new();
        let observed = DriverRule {
            id: "*3".into(),
            name: "manual camera".into(),
            external_port: 8554,
            internal_ip: Some("192.168.88.40".parse().unwrap()),
            internal_port: 554,
            protocol: Protocol::Tcp,
            enabled: true,
            managed: false,
        };
        store.upsert_observed_rule(RouterId(1), &observed).await.unwrap();
        store.upsert_observed_rule(RouterId(1), &observed).await.unwrap();

        let rules = store.active_rules(RouterId(1)).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].customer_id, None);
        assert_eq!(rules[0].description, "manual camera");

        let disabled = DriverRule {
            enabled: false,
            ..observed
        };
        store.upsert_observed_rule(RouterId(1), &disabled).await.unwrap();
        assert!(store.active_rules(RouterId(1)).await.unwrap().is_empty());
    }
}
