// ── External port allocator ──
//
// Scan-then-claim under a per-router async mutex. A claim covers the
// window between picking a port and persisting its rule, so two
// concurrent setups on one router never receive the same port.

use std::collections::{BTreeSet, HashSet};
use std::ops::RangeInclusive;
use std::sync::Arc;

use dashmap::DashMap;
use routerkit_api::RouterId;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CoreError;
use crate::store::RuleStore;

pub const DEFAULT_RANGE_START: u16 = 10000;
pub const DEFAULT_RANGE_END: u16 = 20000;

pub struct PortAllocator {
    range: RangeInclusive<u16>,
    claims: DashMap<RouterId, Arc<Mutex<BTreeSet<u16>>>>,
}

impl PortAllocator {
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self {
            range,
            claims: DashMap::new(),
        }
    }

    pub fn range(&self) -> RangeInclusive<u16> {
        self.range.clone()
    }

    fn slot(&self, router: RouterId) -> Arc<Mutex<BTreeSet<u16>>> {
        Arc::clone(self.claims.entry(router).or_default().value())
    }

    /// Claim the lowest port that is neither used by an active rule nor
    /// claimed in flight.
    pub async fn claim(&self, router: RouterId, rules: &dyn RuleStore) -> Result<u16, CoreError> {
        let slot = self.slot(router);
        let mut claimed = slot.lock().await;

        let used = used_ports(router, rules).await?;
        let port = self
            .range()
            .find(|p| !used.contains(p) && !claimed.contains(p))
            .ok_or(CoreError::NoAvailablePorts {
                router,
                range_start: *self.range.start(),
                range_end: *self.range.end(),
            })?;
        claimed.insert(port);
        debug!(router = %router, port, "external port claimed");
        Ok(port)
    }

    pub async fn release(&self, router: RouterId, port: u16) {
        let slot = self.slot(router);
        if slot.lock().await.remove(&port) {
            debug!(router = %router, port, "port claim released");
        }
    }

    /// Up to `limit` free ports, lowest first, without claiming them.
    pub async fn available(&self, router: RouterId, rules: &dyn RuleStore, limit: usize) -> Result<Vec<u16>, CoreError> {
        let slot = self.slot(router);
        let claimed = slot.lock().await;
        let used = used_ports(router, rules).await?;
        Ok(self
            .range()
            .filter(|p| !used.contains(p) && !claimed.contains(p))
            .take(limit)
            .collect())
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_RANGE_START..=DEFAULT_RANGE_END)
    }
}

async fn used_ports(router: RouterId, rules: &dyn RuleStore) -> Result<HashSet<u16>, CoreError> {
    Ok(rules
        .active_rules(router)
        .await?
        .iter()
        .map(|r| r.external_port)
        .collect())
}
