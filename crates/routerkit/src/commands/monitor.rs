//! Monitor lifecycle and fleet-wide commands.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;

use routerkit_core::{HealthReport, MonitorSettings, RouterStore, SweepReport};

use crate::app::App;
use crate::cli::{GlobalOpts, StartArgs};
use crate::error::CliError;
use crate::output;

/// How often a foreground monitor flushes state to disk.
const SAVE_EVERY: Duration = Duration::from_secs(60);

// ── Rows ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct RouterSummary {
    id: u64,
    name: String,
    router_type: String,
    ip: String,
    is_online: bool,
    last_checked: Option<DateTime<Utc>>,
}

#[derive(Tabled)]
struct RouterRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    router_type: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Last checked")]
    last_checked: String,
}

#[derive(Serialize)]
struct StatusView {
    monitor: MonitorSettings,
    routers: Vec<RouterSummary>,
}

fn sweep_detail(r: &SweepReport) -> String {
    [
        format!("Probed:       {}", r.probed),
        format!("Online:       {}", r.online),
        format!("Login failed: {}", r.login_failed),
        format!("Unreachable:  {}", r.unreachable),
        format!("Errors:       {}", r.errors),
        format!("Device sync:  {} failed", r.device_sync_failed),
    ]
    .join("\n")
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn start(app: &App, args: StartArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let monitor = app.monitor(args.interval)?;
    monitor.start().await;

    let status = monitor.status().await;
    if !global.quiet {
        eprintln!(
            "Monitoring {} router(s) every {}s. Press Ctrl-C to stop.",
            app.config.routers.len(),
            status.settings.interval.as_secs()
        );
    }

    let mut save = tokio::time::interval(SAVE_EVERY);
    save.tick().await; // consume the immediate first tick
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            _ = save.tick() => {
                if let Err(e) = app.save().await {
                    tracing::warn!(error = %e, "state snapshot not written");
                }
            }
        }
    }

    monitor.stop().await;
    app.save().await?;

    let last = monitor.status().await.last_report;
    if let Some(report) = last {
        let out = output::render_single(&global.output, &report, sweep_detail, |r| r.online.to_string());
        output::print_output(&out, global.quiet);
    }
    Ok(())
}

pub fn stop(global: &GlobalOpts) {
    if !global.quiet {
        eprintln!(
            "The monitor runs in the foreground of `routerkit start`; stop it with Ctrl-C in that terminal."
        );
    }
}

pub async fn status(app: &App, global: &GlobalOpts) -> Result<(), CliError> {
    let routers = app.store.list_routers().await?;
    let view = StatusView {
        monitor: app.config.monitor_settings(),
        routers: routers
            .iter()
            .map(|p| RouterSummary {
                id: p.id.0,
                name: p.name.clone(),
                router_type: p.router_type.to_string(),
                ip: p.ip_address.to_string(),
                is_online: p.is_online,
                last_checked: p.last_checked,
            })
            .collect(),
    };

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &view,
        |v| {
            let rows: Vec<RouterRow> = v
                .routers
                .iter()
                .map(|r| RouterRow {
                    id: r.id,
                    name: r.name.clone(),
                    router_type: r.router_type.clone(),
                    ip: r.ip.clone(),
                    state: if r.last_checked.is_some() {
                        output::online_label(r.is_online, color)
                    } else {
                        "unknown".into()
                    },
                    last_checked: output::timestamp(r.last_checked),
                })
                .collect();
            format!(
                "Monitor: every {}s, {} probes at once, {}s probe timeout\n{}",
                v.monitor.interval.as_secs(),
                v.monitor.concurrency,
                v.monitor.probe_timeout.as_secs(),
                tabled::Table::new(rows).with(tabled::settings::Style::rounded())
            )
        },
        |v| {
            v.routers
                .iter()
                .map(|r| format!("{}\t{}", r.name, if r.is_online { "online" } else { "offline" }))
                .collect::<Vec<_>>()
                .join("\n")
        },
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn sync_all(app: &App, global: &GlobalOpts) -> Result<(), CliError> {
    let monitor = app.monitor(None)?;
    let report = monitor.force_sync().await?;
    app.save().await?;

    let out = output::render_single(&global.output, &report, sweep_detail, |r| r.online.to_string());
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn health(app: &App, global: &GlobalOpts) -> Result<(), CliError> {
    let report = app.manager.health_check().await?;
    app.save().await?;

    let out = output::render_single(&global.output, &report, health_detail, |r| {
        format!("{}/{}", r.online_routers, r.router_count)
    });
    output::print_output(&out, global.quiet);
    Ok(())
}

fn health_detail(r: &HealthReport) -> String {
    let mut lines = vec![
        format!("Routers:      {} ({} online)", r.router_count, r.online_routers),
        format!("Active rules: {}", r.active_port_rules),
    ];
    match &r.sample {
        Some(sample) => {
            let state = sample
                .connectivity
                .map_or_else(|| "error".to_owned(), |c| c.to_string());
            lines.push(format!("Probe:        {} -> {state} ({})", sample.router, sample.message));
        }
        None => lines.push("Probe:        no routers configured".into()),
    }
    lines.join("\n")
}
