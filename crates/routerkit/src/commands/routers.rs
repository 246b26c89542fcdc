//! Single-router commands: probe, devices, WiFi, reboot.

use secrecy::SecretString;
use serde::Serialize;
use tabled::Tabled;

use routerkit_core::{ConnectionTest, Connectivity, DeviceRecord, DeviceStore};

use crate::app::App;
use crate::cli::{DevicesArgs, GlobalOpts, WifiArgs};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Rows ────────────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "Hostname")]
    hostname: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Interface")]
    interface: String,
    #[tabled(rename = "Signal")]
    signal: String,
    #[tabled(rename = "Last seen")]
    last_seen: String,
}

impl From<&DeviceRecord> for DeviceRow {
    fn from(r: &DeviceRecord) -> Self {
        let d = &r.device;
        Self {
            mac: d.mac_address.to_string(),
            ip: d.ip_address.map_or_else(|| "-".into(), |ip| ip.to_string()),
            hostname: output::or_dash(d.hostname.as_deref()),
            kind: r.kind.to_string(),
            interface: output::or_dash(d.interface.as_deref()),
            signal: d.signal_strength.map_or_else(|| "-".into(), |s| format!("{s} dBm")),
            last_seen: output::timestamp(Some(d.last_seen)),
        }
    }
}

#[derive(Serialize)]
struct SyncView {
    router: String,
    #[serde(flatten)]
    test: ConnectionTest,
    devices_synced: Option<usize>,
}

fn test_detail(test: &ConnectionTest, color: bool) -> String {
    let state = match test.connectivity {
        Connectivity::Online => output::online_label(true, color),
        Connectivity::LoginFailed => "login failed".into(),
        Connectivity::Unreachable => output::online_label(false, color),
    };
    let mut lines = vec![format!("State:    {state}"), format!("Message:  {}", test.message)];
    if let Some(status) = &test.status {
        let fields = [
            ("Model", &status.model),
            ("Identity", &status.identity),
            ("Serial", &status.serial),
            ("Firmware", &status.firmware_version),
            ("Hardware", &status.hardware_version),
            ("Uptime", &status.uptime),
            ("WAN", &status.wan_status),
            ("WAN IP", &status.wan_ip),
            ("CPU", &status.cpu_load),
            ("Memory", &status.memory_used),
        ];
        for (label, value) in fields {
            if let Some(v) = value {
                lines.push(format!("{:<9} {v}", format!("{label}:")));
            }
        }
        if let Some(n) = status.connected_clients {
            lines.push(format!("Clients:  {n}"));
        }
        if let Some(err) = &status.parse_error {
            lines.push(format!("Partial:  {err}"));
        }
    }
    lines.join("\n")
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn sync(app: &App, router: &str, global: &GlobalOpts) -> Result<(), CliError> {
    let profile = app.router(router).await?;
    let test = app.monitor(None)?.sync_router(profile.id).await?;

    let devices_synced = if test.connectivity == Connectivity::Online {
        match app.manager.sync_connected_devices(&profile).await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(router = %profile.name, error = %e, "device sync failed");
                None
            }
        }
    } else {
        None
    };
    app.save().await?;

    let view = SyncView {
        router: profile.name,
        test,
        devices_synced,
    };
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &view,
        |v| {
            let devices = v
                .devices_synced
                .map_or_else(|| "not synced".to_owned(), |n| n.to_string());
            format!("Router:   {}\n{}\nDevices:  {devices}", v.router, test_detail(&v.test, color))
        },
        |v| v.test.connectivity.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn test(app: &App, router: &str, global: &GlobalOpts) -> Result<(), CliError> {
    let profile = app.router(router).await?;
    let test = app.manager.test_connection(&profile).await?;
    app.save().await?;

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &test,
        |t| test_detail(t, color),
        |t| t.connectivity.to_string(),
    );
    output::print_output(&out, global.quiet);

    match test.connectivity {
        Connectivity::Online => Ok(()),
        Connectivity::LoginFailed => Err(CliError::AuthFailed { message: test.message }),
        Connectivity::Unreachable => Err(CliError::ConnectionFailed {
            target: profile.ip_address.to_string(),
            reason: test.message,
        }),
    }
}

pub async fn devices(app: &App, args: DevicesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let profile = app.router(&args.router).await?;
    if args.refresh {
        let n = app.manager.sync_connected_devices(&profile).await?;
        app.save().await?;
        tracing::debug!(router = %profile.name, devices = n, "devices refreshed");
    }

    let devices = app.store.active_devices(profile.id).await?;
    let out = output::render_list(&global.output, &devices, DeviceRow::from, |r| {
        r.device.mac_address.to_string()
    });
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn wifi(app: &App, args: WifiArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let profile = app.router(&args.router).await?;
    let password = match args.password {
        Some(p) => p,
        None => util::prompt_secret("WiFi passphrase")?,
    };
    let password = SecretString::from(password);

    if !util::confirm(
        "wifi",
        &format!("Change WiFi on '{}' to SSID '{}'? Connected clients will drop.", profile.name, args.ssid),
        global.yes,
    )? {
        return Ok(());
    }

    app.manager
        .update_wifi_settings(&profile, &args.ssid, &password, args.security)
        .await?;
    if !global.quiet {
        eprintln!("WiFi on '{}' set to '{}' ({})", profile.name, args.ssid, args.security);
    }
    Ok(())
}

pub async fn reboot(app: &App, router: &str, global: &GlobalOpts) -> Result<(), CliError> {
    let profile = app.router(router).await?;
    if !util::confirm("reboot", &format!("Reboot '{}'?", profile.name), global.yes)? {
        return Ok(());
    }

    app.manager.reboot_router(&profile).await?;
    app.save().await?;
    if !global.quiet {
        eprintln!("Reboot of '{}' initiated", profile.name);
    }
    Ok(())
}
