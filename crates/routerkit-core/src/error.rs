// ── Core error types ──
//
// Service-level errors from routerkit-core. Callers branch on these, not
// on driver internals: the `From<routerkit_api::Error>` impl folds wire
// failures into the taxonomy the services expose.

use std::net::IpAddr;

use routerkit_api::{RouterId, TenantId};
use thiserror::Error;

use crate::model::{CustomerId, RuleId};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Router reachability ──────────────────────────────────────────
    #[error("Cannot reach router at {target}: {reason}")]
    ConnectionFailure { target: String, reason: String },

    #[error("Router login failed: {message}")]
    AuthenticationFailure { message: String },

    // ── Driver dispatch ──────────────────────────────────────────────
    #[error("Unsupported router type: {router_type}")]
    UnsupportedRouterType { router_type: String },

    #[error("Operation not supported: {message}")]
    Unsupported { message: String },

    // ── Router responses ─────────────────────────────────────────────
    #[error("Unexpected response from {endpoint}: {message}")]
    ProtocolParseError { endpoint: String, message: String },

    #[error("{operation} partially applied: {message} (leftover: {})", leftover.join(", "))]
    PartialApplyFailure {
        operation: String,
        message: String,
        leftover: Vec<String>,
    },

    #[error("Router driver error: {message}")]
    Driver { message: String },

    // ── Port allocation ──────────────────────────────────────────────
    #[error("No available ports in {range_start}-{range_end} on router {router}")]
    NoAvailablePorts {
        router: RouterId,
        range_start: u16,
        range_end: u16,
    },

    #[error("Could not determine an IP address for customer {customer}")]
    CustomerIpUnavailable { customer: CustomerId },

    // ── Store ────────────────────────────────────────────────────────
    #[error("Router not found: {identifier}")]
    RouterNotFound { identifier: String },

    #[error("Port rule not found: {id}")]
    RuleNotFound { id: RuleId },

    #[error("Tenant {tenant} already has a router at {ip}")]
    DuplicateEndpoint { tenant: TenantId, ip: IpAddr },

    #[error("Router {router} still has {active_rules} active port rule(s)")]
    ProfileInUse { router: RouterId, active_rules: usize },

    #[error("External port {port} is already forwarded on router {router}")]
    PortInUse { router: RouterId, port: u16 },

    #[error("Store error: {message}")]
    Store { message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// The router could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::ConnectionFailure { .. })
    }

    /// The router was reached but refused our credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthenticationFailure { .. })
    }

    pub(crate) fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}

// ── Conversion from driver errors ────────────────────────────────────

impl From<routerkit_api::Error> for CoreError {
    fn from(err: routerkit_api::Error) -> Self {
        use routerkit_api::Error as Api;

        match err {
            Api::Connection { target, reason } => CoreError::ConnectionFailure { target, reason },
            Api::Timeout {
                target,
                timeout_secs,
            } => CoreError::ConnectionFailure {
                target,
                reason: format!("timed out after {timeout_secs}s"),
            },
            Api::Transport(ref e) if e.is_connect() || e.is_timeout() => CoreError::ConnectionFailure {
                target: e.url().map(|u| u.authority().to_owned()).unwrap_or_default(),
                reason: e.to_string(),
            },
            Api::Authentication { message } => CoreError::AuthenticationFailure { message },
            Api::UnsupportedRouterType(router_type) => CoreError::UnsupportedRouterType { router_type },
            e @ (Api::UnsupportedOperation { .. } | Api::UnsupportedSecurity { .. }) => {
                CoreError::Unsupported {
                    message: e.to_string(),
                }
            }
            Api::ProtocolParse { endpoint, message } => CoreError::ProtocolParseError { endpoint, message },
            Api::PartialApply {
                operation,
                message,
                leftover,
            } => CoreError::PartialApplyFailure {
                operation,
                message,
                leftover,
            },
            e @ (Api::Rejected { .. }
            | Api::NotFound { .. }
            | Api::Transport(_)
            | Api::InvalidUrl(_)
            | Api::Tls(_)) => CoreError::Driver {
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_a_connection_failure() {
        let err: CoreError = routerkit_api::Error::Timeout {
            target: "10.0.0.1:80".into(),
            timeout_secs: 10,
        }
        .into();
        assert!(err.is_unreachable());
        assert_eq!(err.to_string(), "Cannot reach router at 10.0.0.1:80: timed out after 10s");
    }

    #[test]
    fn unsupported_security_keeps_vendor_message() {
        let err: CoreError = routerkit_api::Error::UnsupportedSecurity {
            vendor: "Tenda",
            security: routerkit_api::SecurityType::Wpa3,
        }
        .into();
        assert!(matches!(err, CoreError::Unsupported { ref message } if message.contains("Tenda")));
    }

    #[test]
    fn partial_apply_lists_leftovers() {
        let err: CoreError = routerkit_api::Error::PartialApply {
            operation: "port forward create".into(),
            message: "filter add refused".into(),
            leftover: vec!["/ip/firewall/nat *1".into()],
        }
        .into();
        assert!(err.to_string().contains("/ip/firewall/nat *1"));
    }
}
