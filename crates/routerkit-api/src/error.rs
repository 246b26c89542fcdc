use std::time::Duration;

use thiserror::Error;

use crate::model::SecurityType;

/// Top-level error type for the `routerkit-api` crate.
///
/// Covers every failure mode across the vendor drivers:
/// reachability, authentication, wire decoding, and router-side rejection.
/// `routerkit-core` maps these into its own service errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Reachability ────────────────────────────────────────────────
    /// TCP connect or socket failure before a reply was received.
    #[error("Cannot reach router at {target}: {reason}")]
    Connection { target: String, reason: String },

    /// No reply within the configured timeout.
    #[error("Router at {target} did not answer within {timeout_secs}s")]
    Timeout { target: String, timeout_secs: u64 },

    // ── Authentication ──────────────────────────────────────────────
    /// Router was reachable but refused every login method we tried.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Dispatch ────────────────────────────────────────────────────
    /// No driver registered for this router type.
    #[error("Unsupported router type: {0}")]
    UnsupportedRouterType(String),

    /// The driver exists but does not implement this operation.
    #[error("{vendor} driver does not support {operation}")]
    UnsupportedOperation {
        vendor: &'static str,
        operation: &'static str,
    },

    /// The vendor has no mapping for the requested WiFi security type.
    #[error("{vendor} routers do not support {security} security")]
    UnsupportedSecurity {
        vendor: &'static str,
        security: SecurityType,
    },

    // ── Router responses ────────────────────────────────────────────
    /// A reply body could not be decoded.
    #[error("Could not parse response from {endpoint}: {message}")]
    ProtocolParse { endpoint: String, message: String },

    /// The router answered but refused the operation.
    #[error("Router rejected {operation}: {message}")]
    Rejected { operation: String, message: String },

    /// The rule to act on does not exist on the router.
    #[error("{what} not found on router")]
    NotFound { what: String },

    /// A multi-step change failed and could not be fully rolled back.
    /// `leftover` lists the router-side identifiers still present.
    #[error("{operation} partially applied ({message}); leftover rules: {leftover:?}")]
    PartialApply {
        operation: String,
        message: String,
        leftover: Vec<String>,
    },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error not covered by `Connection` or `Timeout`.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or HTTP client construction failure.
    #[error("TLS error: {0}")]
    Tls(String),
}

impl Error {
    /// Classify a `reqwest` failure against `target`.
    ///
    /// Connect failures and timeouts become `Connection` / `Timeout` so
    /// callers can tell an unreachable router from a misbehaving one.
    pub fn from_transport(target: &str, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                target: target.to_owned(),
                timeout_secs: timeout.as_secs(),
            }
        } else if err.is_connect() {
            Self::Connection {
                target: target.to_owned(),
                reason: err.to_string(),
            }
        } else {
            Self::Transport(err)
        }
    }

    /// Returns `true` if the router could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Transport(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Returns `true` if the router refused our credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if the targeted rule was absent on the router.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub(crate) fn parse(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProtocolParse {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_and_timeout_are_unreachable() {
        let conn = Error::Connection {
            target: "10.0.0.1".into(),
            reason: "refused".into(),
        };
        let timeout = Error::Timeout {
            target: "10.0.0.1".into(),
            timeout_secs: 10,
        };
        assert!(conn.is_unreachable());
        assert!(timeout.is_unreachable());
        assert!(!conn.is_auth());
    }

    #[test]
    fn rejection_is_neither_unreachable_nor_auth() {
        let err = Error::rejected("reboot", "busy");
        assert!(!err.is_unreachable());
        assert!(!err.is_auth());
        assert_eq!(err.to_string(), "Router rejected reboot: busy");
    }
}
