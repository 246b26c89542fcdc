//! Configuration for routerkit.
//!
//! Layered loading (defaults, TOML file, `ROUTERKIT_` environment),
//! router password resolution (env var, plaintext, keyring), and
//! translation into the driver and service settings of
//! `routerkit-api` / `routerkit-core`.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use routerkit_api::{RouterId, RouterProfile, RouterType, TenantId, TlsMode, TransportConfig};
use routerkit_core::monitor::MIN_INTERVAL;
use routerkit_core::{MonitorSettings, PortSettings};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Keyring service name; entries are keyed by router name.
pub const KEYRING_SERVICE: &str = "routerkit";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no password configured for router '{router}'")]
    NoCredentials { router: String },

    #[error("config file not found: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub ports: PortsConfig,

    /// Managed routers.
    #[serde(default)]
    pub routers: Vec<RouterEntry>,

    /// JSON snapshot of rules, devices and check results kept between
    /// CLI runs. Defaults to the platform data directory.
    pub state_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Verify router TLS certificates against the system store.
    #[serde(default)]
    pub verify_tls: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
            verify_tls: false,
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Seconds between sweeps.
    #[serde(default = "default_interval")]
    pub interval: u64,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Seconds one router probe may take.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            concurrency: default_concurrency(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

fn default_interval() -> u64 {
    300
}
fn default_concurrency() -> usize {
    8
}
fn default_probe_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PortsConfig {
    #[serde(default = "default_range_start")]
    pub range_start: u16,

    #[serde(default = "default_range_end")]
    pub range_end: u16,

    #[serde(default = "default_internal_port")]
    pub internal_port: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            range_start: default_range_start(),
            range_end: default_range_end(),
            internal_port: default_internal_port(),
        }
    }
}

fn default_range_start() -> u16 {
    10000
}
fn default_range_end() -> u16 {
    20000
}
fn default_internal_port() -> u16 {
    80
}

/// One managed router.
#[derive(Debug, Deserialize, Serialize)]
pub struct RouterEntry {
    pub id: u64,

    /// Unique name; also the keyring account.
    pub name: String,

    #[serde(default = "default_tenant")]
    pub tenant: u64,

    #[serde(rename = "type")]
    pub router_type: RouterType,

    /// Vendor model string (e.g. "HG8245H").
    #[serde(default)]
    pub model: String,

    pub ip: IpAddr,

    #[serde(default = "default_username")]
    pub username: String,

    /// Plaintext password. Prefer `password_env` or the keyring.
    pub password: Option<String>,

    /// Environment variable holding the password.
    pub password_env: Option<String>,

    pub web_port: Option<u16>,

    /// RouterOS API port (MikroTik).
    pub api_port: Option<u16>,

    #[serde(default)]
    pub https: bool,
}

fn default_tenant() -> u64 {
    1
}
fn default_username() -> String {
    "admin".into()
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("net", "m-neti", "routerkit")
}

/// Platform config file path (e.g. `~/.config/routerkit/routerkit.toml`).
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || PathBuf::from("routerkit.toml"),
        |dirs| dirs.config_dir().join("routerkit.toml"),
    )
}

/// Platform default for the state snapshot.
pub fn default_state_path() -> PathBuf {
    project_dirs().map_or_else(
        || PathBuf::from("routerkit-state.json"),
        |dirs| dirs.data_dir().join("state.json"),
    )
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load from the platform config path (if present) and the environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_layers(&config_path())
}

/// Load from an explicit file, which must exist, plus the environment.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingFile {
            path: path.to_path_buf(),
        });
    }
    load_layers(path)
}

fn load_layers(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading configuration");
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ROUTERKIT_").split("__"))
        .extract()?;
    config.validate()?;
    Ok(config)
}

// ── Validation ──────────────────────────────────────────────────────

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports.range_start == 0 || self.ports.range_start > self.ports.range_end {
            return Err(invalid(
                "ports",
                format!(
                    "range {}-{} is empty or starts at 0",
                    self.ports.range_start, self.ports.range_end
                ),
            ));
        }
        if self.ports.internal_port == 0 {
            return Err(invalid("ports.internal_port", "must be non-zero"));
        }
        if self.monitor.interval < MIN_INTERVAL.as_secs() {
            return Err(invalid(
                "monitor.interval",
                format!("must be at least {}s, got {}s", MIN_INTERVAL.as_secs(), self.monitor.interval),
            ));
        }
        if self.monitor.concurrency == 0 {
            return Err(invalid("monitor.concurrency", "must be at least 1"));
        }
        if self.defaults.timeout == 0 {
            return Err(invalid("defaults.timeout", "must be at least 1 second"));
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        let mut endpoints = HashSet::new();
        for router in &self.routers {
            if !ids.insert(router.id) {
                return Err(invalid("routers", format!("duplicate id {}", router.id)));
            }
            if !names.insert(router.name.as_str()) {
                return Err(invalid("routers", format!("duplicate name '{}'", router.name)));
            }
            if !endpoints.insert((router.tenant, router.ip)) {
                return Err(invalid(
                    "routers",
                    format!("tenant {} lists {} twice", router.tenant, router.ip),
                ));
            }
        }
        Ok(())
    }

    // ── Translation ─────────────────────────────────────────────────

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: if self.defaults.verify_tls {
                TlsMode::System
            } else {
                TlsMode::DangerAcceptInvalid
            },
            ..TransportConfig::default()
        }
        .with_timeout(Duration::from_secs(self.defaults.timeout))
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            interval: Duration::from_secs(self.monitor.interval),
            concurrency: self.monitor.concurrency,
            probe_timeout: Duration::from_secs(self.monitor.probe_timeout),
        }
    }

    pub fn port_settings(&self) -> PortSettings {
        PortSettings {
            range_start: self.ports.range_start,
            range_end: self.ports.range_end,
            internal_port: self.ports.internal_port,
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_file.clone().unwrap_or_else(default_state_path)
    }

    /// Look a router up by name or numeric id.
    pub fn find_router(&self, key: &str) -> Option<&RouterEntry> {
        self.routers
            .iter()
            .find(|r| r.name == key || key.parse::<u64>().is_ok_and(|id| id == r.id))
    }

    /// Every configured router as a connection profile.
    pub fn router_profiles(&self) -> Result<Vec<RouterProfile>, ConfigError> {
        self.routers.iter().map(RouterEntry::to_profile).collect()
    }
}

// ── Credential resolution ───────────────────────────────────────────

impl RouterEntry {
    /// Resolve the password: `password_env`, then plaintext `password`,
    /// then the keyring entry `routerkit/<name>`.
    pub fn resolve_password(&self) -> Result<SecretString, ConfigError> {
        if let Some(ref env_name) = self.password_env {
            if let Ok(val) = std::env::var(env_name) {
                return Ok(SecretString::from(val));
            }
            debug!(router = %self.name, env = %env_name, "password variable not set");
        }

        if let Some(ref pw) = self.password {
            return Ok(SecretString::from(pw.clone()));
        }

        if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &self.name) {
            if let Ok(pw) = entry.get_password() {
                return Ok(SecretString::from(pw));
            }
        }

        Err(ConfigError::NoCredentials {
            router: self.name.clone(),
        })
    }

    pub fn to_profile(&self) -> Result<RouterProfile, ConfigError> {
        let password = self.resolve_password()?;
        let mut profile = RouterProfile::new(RouterId(self.id), self.router_type, self.ip)
            .with_credentials(self.username.clone(), password);
        profile.tenant_id = TenantId(self.tenant);
        profile.name.clone_from(&self.name);
        profile.model.clone_from(&self.model);
        profile.use_https = self.https;
        if let Some(port) = self.web_port {
            profile.web_port = port;
        } else if self.https {
            profile.web_port = 443;
        }
        if let Some(port) = self.api_port {
            profile.api_port = port;
        }
        Ok(profile)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    const SAMPLE: &str = r#"
state_file = "state.json"

[monitor]
interval = 120

[ports]
range_start = 30000
range_end = 30099

[[routers]]
id = 1
name = "hq"
type = "mikrotik"
ip = "10.10.0.1"
password = "plain"
api_port = 8729

[[routers]]
id = 2
name = "branch"
type = "huawei"
model = "HG8245H"
ip = "10.20.0.1"
password_env = "BRANCH_PW"
password = "fallback"
https = true
"#;

    #[test]
    fn file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("routerkit.toml", SAMPLE)?;
            let config = load_config_from(Path::new("routerkit.toml")).map_err(|e| e.to_string())?;

            assert_eq!(config.monitor.interval, 120);
            assert_eq!(config.monitor.concurrency, 8);
            assert_eq!(config.ports.range_start, 30000);
            assert_eq!(config.ports.internal_port, 80);
            assert_eq!(config.defaults.timeout, 10);
            assert_eq!(config.routers.len(), 2);
            assert_eq!(config.state_path(), PathBuf::from("state.json"));
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("routerkit.toml", SAMPLE)?;
            jail.set_env("ROUTERKIT_MONITOR__INTERVAL", 600);
            jail.set_env("ROUTERKIT_DEFAULTS__TIMEOUT", 3);
            let config = load_config_from(Path::new("routerkit.toml")).map_err(|e| e.to_string())?;

            assert_eq!(config.monitor.interval, 600);
            assert_eq!(config.transport().timeout, Duration::from_secs(3));
            Ok(())
        });
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = load_config_from(Path::new("/nonexistent/routerkit.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile { .. }));
    }

    #[test]
    fn password_env_wins_over_plaintext() {
        Jail::expect_with(|jail| {
            jail.create_file("routerkit.toml", SAMPLE)?;
            jail.set_env("BRANCH_PW", "from-env");
            let config = load_config_from(Path::new("routerkit.toml")).map_err(|e| e.to_string())?;

            let branch = config.find_router("branch").unwrap();
            assert_eq!(branch.resolve_password().unwrap().expose_secret(), "from-env");
            let hq = config.find_router("1").unwrap();
            assert_eq!(hq.resolve_password().unwrap().expose_secret(), "plain");
            Ok(())
        });
    }

    #[test]
    fn entries_translate_to_profiles() {
        Jail::expect_with(|jail| {
            jail.create_file("routerkit.toml", SAMPLE)?;
            let config = load_config_from(Path::new("routerkit.toml")).map_err(|e| e.to_string())?;
            let profiles = config.router_profiles().map_err(|e| e.to_string())?;

            assert_eq!(profiles[0].router_type, RouterType::Mikrotik);
            assert_eq!(profiles[0].api_port, 8729);
            assert_eq!(profiles[0].web_port, 80);
            assert_eq!(profiles[1].name, "branch");
            assert_eq!(profiles[1].model, "HG8245H");
            assert!(profiles[1].use_https);
            assert_eq!(profiles[1].web_port, 443);
            assert_eq!(profiles[1].password.expose_secret(), "fallback");

            let ports = config.port_settings();
            assert_eq!((ports.range_start, ports.range_end), (30000, 30099));
            assert_eq!(config.monitor_settings().interval, Duration::from_secs(120));
            Ok(())
        });
    }

    #[test]
    fn inverted_port_range_is_rejected() {
        let mut config = Config::default();
        config.ports.range_start = 20000;
        config.ports.range_end = 10000;
        assert!(matches!(config.validate(), Err(ConfigError::Validation { ref field, .. }) if field == "ports"));
    }

    #[test]
    fn fast_monitor_interval_is_rejected() {
        let mut config = Config::default();
        config.monitor.interval = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_tenant_endpoint_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "routerkit.toml",
                r#"
[[routers]]
id = 1
name = "a"
type = "tenda"
ip = "10.0.0.1"

[[routers]]
id = 2
name = "b"
type = "tenda"
ip = "10.0.0.1"
"#,
            )?;
            let err = load_config_from(Path::new("routerkit.toml")).unwrap_err();
            assert!(err.to_string().contains("lists 10.0.0.1 twice"), "{err}");
            Ok(())
        });
    }
}
