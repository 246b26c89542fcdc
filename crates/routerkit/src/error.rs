//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use routerkit_config::ConfigError;
use routerkit_core::CoreError;
use thiserror::Error;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const UNSUPPORTED: i32 = 5;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const PARTIAL: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Router reachability ──────────────────────────────────────────
    #[error("Could not reach router at {target}: {reason}")]
    #[diagnostic(
        code(routerkit::connection_failed),
        help(
            "Check that the router is powered and reachable from this host.\n\
             Try: routerkit test <router> -v"
        )
    )]
    ConnectionFailed { target: String, reason: String },

    #[error("Router login failed: {message}")]
    #[diagnostic(
        code(routerkit::auth_failed),
        help(
            "Verify the router's username and password.\n\
             Passwords resolve from password_env, then password, then the\n\
             keyring entry routerkit/<name>."
        )
    )]
    AuthFailed { message: String },

    #[error("No password configured for router '{router}'")]
    #[diagnostic(
        code(routerkit::no_credentials),
        help("Set password_env or password in the [[routers]] entry, or store it in the keyring as routerkit/{router}.")
    )]
    NoCredentials { router: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(code(routerkit::not_found), help("Run: routerkit {list_command}"))]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("{message}")]
    #[diagnostic(code(routerkit::conflict))]
    Conflict { message: String },

    #[error("No free external port between {range_start} and {range_end}")]
    #[diagnostic(
        code(routerkit::no_ports),
        help("Remove unused rules or widen [ports] range_start / range_end.")
    )]
    NoAvailablePorts { range_start: u16, range_end: u16 },

    #[error("Could not find a device for customer {customer}")]
    #[diagnostic(
        code(routerkit::no_customer_ip),
        help("Refresh devices with `routerkit devices <router> --refresh`, or pass --ip.")
    )]
    NoCustomerIp { customer: String },

    // ── Router responses ─────────────────────────────────────────────
    #[error("Router error: {message}")]
    #[diagnostic(code(routerkit::router_error))]
    Router { message: String },

    #[error("{message}")]
    #[diagnostic(
        code(routerkit::partial_apply),
        help("Rules left on the router: {leftover}\nRemove them by hand before retrying.")
    )]
    PartialApply { message: String, leftover: String },

    #[error("{message}")]
    #[diagnostic(code(routerkit::unsupported))]
    Unsupported { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(routerkit::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(routerkit::no_config),
        help("Create it with a [[routers]] entry per managed router.")
    )]
    NoConfig { path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(routerkit::config))]
    Config { message: String },

    #[error("State file error: {message}")]
    #[diagnostic(code(routerkit::state), help("Delete the state file to start from an empty snapshot."))]
    State { message: String },

    // ── Interactive ──────────────────────────────────────────────────
    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(routerkit::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::NoCustomerIp { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } | Self::NoAvailablePorts { .. } => exit_code::CONFLICT,
            Self::PartialApply { .. } => exit_code::PARTIAL,
            Self::Unsupported { .. } => exit_code::UNSUPPORTED,
            Self::Validation { .. } | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }

    pub fn router_not_found(identifier: &str) -> Self {
        Self::NotFound {
            resource_type: "router".into(),
            identifier: identifier.into(),
            list_command: "status".into(),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailure { target, reason } => CliError::ConnectionFailed { target, reason },

            CoreError::AuthenticationFailure { message } => CliError::AuthFailed { message },

            CoreError::UnsupportedRouterType { router_type } => CliError::Unsupported {
                message: format!("No driver for router type '{router_type}'"),
            },

            CoreError::Unsupported { message } => CliError::Unsupported { message },

            CoreError::ProtocolParseError { endpoint, message } => CliError::Router {
                message: format!("unexpected reply from {endpoint}: {message}"),
            },

            CoreError::PartialApplyFailure {
                operation,
                message,
                leftover,
            } => CliError::PartialApply {
                message: format!("{operation} partially applied: {message}"),
                leftover: leftover.join(", "),
            },

            CoreError::Driver { message } => CliError::Router { message },

            CoreError::NoAvailablePorts {
                range_start,
                range_end,
                ..
            } => CliError::NoAvailablePorts {
                range_start,
                range_end,
            },

            CoreError::CustomerIpUnavailable { customer } => CliError::NoCustomerIp {
                customer: customer.to_string(),
            },

            CoreError::RouterNotFound { identifier } => CliError::router_not_found(&identifier),

            CoreError::RuleNotFound { id } => CliError::NotFound {
                resource_type: "rule".into(),
                identifier: id.to_string(),
                list_command: "ports list --all".into(),
            },

            e @ (CoreError::DuplicateEndpoint { .. }
            | CoreError::ProfileInUse { .. }
            | CoreError::PortInUse { .. }) => CliError::Conflict { message: e.to_string() },

            CoreError::Store { message } => CliError::State { message },

            CoreError::Config { message } => CliError::Config { message },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::MissingFile { path } => CliError::NoConfig {
                path: path.display().to_string(),
            },
            ConfigError::NoCredentials { router } => CliError::NoCredentials { router },
            ConfigError::Validation { field, reason } => CliError::Config {
                message: format!("invalid {field}: {reason}"),
            },
            e @ ConfigError::Figment(_) => CliError::Config { message: e.to_string() },
        }
    }
}
