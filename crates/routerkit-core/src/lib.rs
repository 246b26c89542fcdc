//! Router management services on top of `routerkit-api` drivers.
//!
//! - **[`RouterManager`]**: on-demand operations against one router
//!   (connection tests, status with a cache window, device and rule sync,
//!   WiFi changes, reboot). Every call builds a fresh driver.
//!
//! - **[`PortManagementService`]**: allocates external ports per customer
//!   from a bounded range and installs or removes the forwarding rule on
//!   the router, persisting only what the router accepted.
//!
//! - **[`RouterMonitor`]**: background sweep probing every router on an
//!   interval with bounded fan-out.
//!
//! - **Stores** ([`store`]): the persistence seams the services use, with
//!   [`MemoryStore`] as the bundled implementation.

pub mod allocator;
pub mod discovery;
pub mod error;
pub mod manager;
pub mod model;
pub mod monitor;
pub mod ports;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use allocator::PortAllocator;
pub use discovery::{DiscoveredHost, DiscoveryOptions, discover_routers, discover_with};
pub use error::CoreError;
pub use manager::RouterManager;
pub use model::{
    Connectivity, ConnectionTest, Customer, CustomerId, DeviceKind, DeviceRecord, HealthReport,
    NewPortRule, PortForwardingRule, RemovalReport, RuleId, SampleProbe, StatusReport, SweepReport,
};
pub use monitor::{MonitorSettings, MonitorStatus, RouterMonitor};
pub use ports::{CustomerIpResolver, DeviceLookupResolver, PortManagementService, PortSettings};
pub use store::{DeviceStore, MemoryStore, RouterStore, RuleStore};
