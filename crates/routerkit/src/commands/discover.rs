//! Subnet scan for router management ports.

use std::time::Duration;

use tabled::Tabled;

use routerkit_core::{DiscoveredHost, DiscoveryOptions};

use crate::cli::{DiscoverArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

/// Largest subnet scanned without complaint (a /16).
const MAX_HOSTS: u32 = 1 << 16;

#[derive(Tabled)]
struct HostRow {
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "Open port")]
    port: u16,
}

pub async fn handle(args: DiscoverArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let host_bits = u32::from(args.network.max_prefix_len() - args.network.prefix_len());
    if host_bits > 16 {
        return Err(CliError::Validation {
            field: "network".into(),
            reason: format!("{} spans more than {MAX_HOSTS} addresses", args.network),
        });
    }
    if args.timeout_ms == 0 {
        return Err(CliError::Validation {
            field: "timeout-ms".into(),
            reason: "must be positive".into(),
        });
    }

    let mut options = DiscoveryOptions {
        timeout: Duration::from_millis(args.timeout_ms),
        ..DiscoveryOptions::default()
    };
    if !args.ports.is_empty() {
        options.ports = args.ports;
    }

    let hosts = routerkit_core::discover_with(args.network, &options).await;
    if hosts.is_empty() && !global.quiet {
        eprintln!("No hosts in {} answered on {:?}", args.network, options.ports);
    }

    let out = output::render_list(&global.output, &hosts, host_row, |h| h.ip.to_string());
    output::print_output(&out, global.quiet);
    Ok(())
}

fn host_row(h: &DiscoveredHost) -> HostRow {
    HostRow {
        ip: h.ip.to_string(),
        port: h.open_port,
    }
}
