// ── Network discovery ──
//
// TCP-connect sweep for management interfaces on a subnet.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use ipnet::IpNet;
use serde::Serialize;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Web, alternate web, SSH and telnet management ports.
pub const DISCOVERY_PORTS: [u16; 6] = [80, 443, 8080, 8443, 22, 23];

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Tried in order; the first open one is reported.
    pub ports: Vec<u16>,
    /// Per connection attempt.
    pub timeout: Duration,
    /// Hosts probed at once.
    pub concurrency: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            ports: DISCOVERY_PORTS.to_vec(),
            timeout: Duration::from_secs(1),
            concurrency: 64,
        }
    }
}

/// A host that accepted a connection on a management port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiscoveredHost {
    pub ip: IpAddr,
    pub open_port: u16,
}

/// Probe every host in `network` with the default ports and timeout.
pub async fn discover_routers(network: IpNet) -> Vec<DiscoveredHost> {
    discover_with(network, &DiscoveryOptions::default()).await
}

/// Hosts in `network` with an open port, sorted by address.
pub async fn discover_with(network: IpNet, options: &DiscoveryOptions) -> Vec<DiscoveredHost> {
    info!(%network, ports = ?options.ports, "scanning for routers");

    let mut found: Vec<DiscoveredHost> = stream::iter(network.hosts())
        .map(|ip| probe_host(ip, options))
        .buffer_unordered(options.concurrency.max(1))
        .filter_map(|hit| async move { hit })
        .collect()
        .await;
    found.sort_by_key(|h| h.ip);

    info!(%network, found = found.len(), "router scan complete");
    found
}

async fn probe_host(ip: IpAddr, options: &DiscoveryOptions) -> Option<DiscoveredHost> {
    for &port in &options.ports {
        let addr = SocketAddr::new(ip, port);
        if let Ok(Ok(_stream)) = tokio::time::timeout(options.timeout, TcpStream::connect(addr)).await {
            debug!(%ip, port, "management port open");
            return Some(DiscoveredHost { ip, open_port: port });
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    fn options(ports: Vec<u16>) -> DiscoveryOptions {
        DiscoveryOptions {
            ports,
            timeout: Duration::from_millis(500),
            concurrency: 4,
        }
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn reports_first_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = closed_port().await;

        let found = discover_with("127.0.0.1/32".parse().unwrap(), &options(vec![closed, open])).await;

        assert_eq!(
            found,
            vec![DiscoveredHost {
                ip: "127.0.0.1".parse().unwrap(),
                open_port: open,
            }]
        );
    }

    #[tokio::test]
    async fn closed_hosts_are_omitted() {
        let closed = closed_port().await;
        let found = discover_with("127.0.0.1/32".parse().unwrap(), &options(vec![closed])).await;
        assert!(found.is_empty());
    }
}
