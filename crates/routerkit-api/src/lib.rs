// routerkit-api: Async vendor drivers for ISP customer routers (Huawei, MikroTik, Tenda)

mod digest;
mod xml;

pub mod driver;
pub mod error;
pub mod factory;
pub mod huawei;
pub mod legacy;
pub mod mikrotik;
pub mod model;
pub mod stub;
pub mod tenda;
pub mod transport;

pub use driver::{MANAGED_RULE_PREFIX, RouterDriver, managed_rule_name};
pub use error::Error;
pub use factory::{DriverConstructor, DriverFactory};
pub use huawei::HuaweiDriver;
pub use legacy::{HuaweiClient, LegacyRouterClient, TendaClient, get_router_client};
pub use mikrotik::{MikroTikDriver, RouterOsApi, RouterOsConnector, TcpConnector};
pub use model::{
    ConnectedDevice, DeviceSource, DriverRule, MacAddress, Protocol, RouterId, RouterProfile,
    RouterStatus, RouterType, SecurityType, TenantId,
};
pub use stub::UnsupportedDriver;
pub use tenda::TendaDriver;
pub use transport::{TlsMode, TransportConfig};
