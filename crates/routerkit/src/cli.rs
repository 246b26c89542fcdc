//! Clap derive structures for the `routerkit` CLI.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ipnet::IpNet;
use routerkit_api::SecurityType;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// routerkit -- manage ISP customer routers
#[derive(Debug, Parser)]
#[command(
    name = "routerkit",
    version,
    about = "Manage ISP customer routers from the command line",
    long_about = "Probe, configure and port-forward Huawei, MikroTik and Tenda customer routers.\n\n\
        Routers are listed in the config file; rule and device state is kept in a\n\
        local JSON snapshot between runs.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "ROUTERKIT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Per-request timeout in seconds (overrides config)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the monitor in the foreground until Ctrl-C
    Start(StartArgs),

    /// Explain how to stop a running monitor
    Stop,

    /// Show monitor settings and last known router state
    Status,

    /// Probe every configured router once
    #[command(name = "sync-all")]
    SyncAll,

    /// Counters plus a probe of the first router
    Health,

    /// Scan a subnet for router management ports
    Discover(DiscoverArgs),

    /// Probe one router and refresh its connected devices
    Sync(RouterArg),

    /// Test connectivity and login for one router
    Test(RouterArg),

    /// List devices connected to a router
    Devices(DevicesArgs),

    /// Change a router's WiFi settings
    Wifi(WifiArgs),

    /// Reboot a router
    Reboot(RouterArg),

    /// Manage customer port forwarding
    #[command(alias = "pf")]
    Ports(PortsArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Arguments ────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RouterArg {
    /// Router name or id
    pub router: String,
}

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Seconds between sweeps (overrides config, minimum 30)
    #[arg(long)]
    pub interval: Option<u64>,
}

#[derive(Debug, Args)]
pub struct DiscoverArgs {
    /// Network to scan, e.g. 192.168.1.0/24
    pub network: IpNet,

    /// Ports to try, in order (defaults to web, SSH and telnet ports)
    #[arg(long, value_delimiter = ',')]
    pub ports: Vec<u16>,

    /// Connect timeout per attempt, in milliseconds
    #[arg(long, default_value = "1000")]
    pub timeout_ms: u64,
}

#[derive(Debug, Args)]
pub struct DevicesArgs {
    /// Router name or id
    pub router: String,

    /// Read devices from the router before listing
    #[arg(long, short = 'r')]
    pub refresh: bool,
}

#[derive(Debug, Args)]
pub struct WifiArgs {
    /// Router name or id
    pub router: String,

    /// New network name
    #[arg(long)]
    pub ssid: String,

    /// New passphrase (prompted when omitted)
    #[arg(long, env = "ROUTERKIT_WIFI_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Security mode
    #[arg(long, default_value = "wpa2", value_parser = parse_security)]
    pub security: SecurityType,
}

fn parse_security(raw: &str) -> Result<SecurityType, String> {
    raw.parse()
        .map_err(|_| format!("expected one of wpa2, wpa3, wpa, wep, none; got '{raw}'"))
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

// ── Ports ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct PortsArgs {
    #[command(subcommand)]
    pub command: PortsCommand,
}

#[derive(Debug, Subcommand)]
pub enum PortsCommand {
    /// List stored port-forwarding rules
    #[command(alias = "ls")]
    List {
        /// Only rules on this router
        #[arg(long)]
        router: Option<String>,

        /// Include deactivated rules
        #[arg(long, short = 'a')]
        all: bool,
    },

    /// Show free external ports on a router
    Available {
        /// Router name or id
        router: String,

        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Forward a fresh external port to a customer's device
    Setup(CustomerArgs),

    /// Remove every rule a customer holds on a router
    Remove(CustomerArgs),

    /// Read the rules configured on the router itself
    #[command(name = "router-rules")]
    RouterRules(RouterArg),
}

#[derive(Debug, Args)]
pub struct CustomerArgs {
    /// Router name or id
    pub router: String,

    /// Customer account id
    #[arg(long)]
    pub customer_id: u64,

    /// Customer username (matched against device hostnames)
    #[arg(long)]
    pub username: String,

    /// Forward to this address instead of looking the customer's device up
    #[arg(long)]
    pub ip: Option<IpAddr>,
}
