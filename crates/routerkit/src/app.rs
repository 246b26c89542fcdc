//! Per-invocation wiring: config, store, manager and services.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use routerkit_api::{DriverFactory, RouterProfile};
use routerkit_config::Config;
use routerkit_core::{
    CoreError, Customer, CustomerIpResolver, DeviceStore, MemoryStore, PortManagementService,
    RouterManager, RouterMonitor, RouterStore, RuleStore,
};
use tracing::debug;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub struct App {
    pub config: Config,
    pub store: Arc<MemoryStore>,
    pub manager: RouterManager,
    state_path: PathBuf,
}

impl App {
    /// Load config, register every configured router and restore the
    /// state snapshot.
    pub async fn load(global: &GlobalOpts) -> Result<Self, CliError> {
        let mut config = match global.config {
            Some(ref path) => routerkit_config::load_config_from(path)?,
            None => routerkit_config::load_config()?,
        };
        if let Some(timeout) = global.timeout {
            if timeout == 0 {
                return Err(CliError::Validation {
                    field: "timeout".into(),
                    reason: "must be at least 1 second".into(),
                });
            }
            config.defaults.timeout = timeout;
        }

        let store = Arc::new(MemoryStore::new());
        for profile in config.router_profiles()? {
            store.insert_router(profile).await?;
        }
        let state_path = config.state_path();
        store.load_from(&state_path).await?;
        debug!(routers = config.routers.len(), state = %state_path.display(), "routerkit context loaded");

        let manager = RouterManager::new(
            DriverFactory::new(config.transport()),
            Arc::clone(&store) as Arc<dyn RouterStore>,
            Arc::clone(&store) as Arc<dyn RuleStore>,
            Arc::clone(&store) as Arc<dyn DeviceStore>,
        );
        Ok(Self {
            config,
            store,
            manager,
            state_path,
        })
    }

    /// Resolve a router by name or id, with its last recorded state.
    pub async fn router(&self, key: &str) -> Result<RouterProfile, CliError> {
        let entry = self
            .config
            .find_router(key)
            .ok_or_else(|| CliError::router_not_found(key))?;
        Ok(self.store.get_router(routerkit_api::RouterId(entry.id)).await?)
    }

    pub async fn save(&self) -> Result<(), CliError> {
        self.store.save_to(&self.state_path).await?;
        Ok(())
    }

    pub fn monitor(&self, interval: Option<u64>) -> Result<RouterMonitor, CliError> {
        let mut settings = self.config.monitor_settings();
        if let Some(secs) = interval {
            settings.interval = Duration::from_secs(secs);
        }
        RouterMonitor::new(self.manager.clone(), settings).map_err(|e| match e {
            CoreError::Config { message } => CliError::Validation {
                field: "interval".into(),
                reason: message,
            },
            other => other.into(),
        })
    }

    /// Port service resolving customer IPs from devices, or pinned to `ip`.
    pub fn port_service(&self, ip: Option<IpAddr>) -> PortManagementService {
        let settings = self.config.port_settings();
        match ip {
            Some(ip) => PortManagementService::new(self.manager.clone(), settings, Arc::new(PinnedIp(ip))),
            None => PortManagementService::with_device_lookup(self.manager.clone(), settings),
        }
    }
}

/// Resolver for an address given on the command line.
struct PinnedIp(IpAddr);

#[async_trait]
impl CustomerIpResolver for PinnedIp {
    async fn resolve(&self, _customer: &Customer, _router: &RouterProfile) -> Result<Option<IpAddr>, CoreError> {
        Ok(Some(self.0))
    }
}
