//! Port-forwarding commands.

use serde::Serialize;
use tabled::Tabled;

use routerkit_api::{DriverRule, RouterProfile};
use routerkit_core::{Customer, PortForwardingRule, RemovalReport, RouterStore, RuleStore};

use crate::app::App;
use crate::cli::{CustomerArgs, GlobalOpts, PortsCommand};
use crate::error::CliError;
use crate::output;

// ── Rows ────────────────────────────────────────────────────────────

#[derive(Tabled)]
struct RuleRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Router")]
    router: String,
    #[tabled(rename = "Customer")]
    customer: String,
    #[tabled(rename = "External")]
    external: u16,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Proto")]
    protocol: String,
    #[tabled(rename = "Active")]
    active: String,
    #[tabled(rename = "Description")]
    description: String,
}

fn rule_row(rule: &PortForwardingRule, routers: &[RouterProfile]) -> RuleRow {
    let router = routers
        .iter()
        .find(|p| p.id == rule.router_id)
        .map_or_else(|| rule.router_id.to_string(), |p| p.name.clone());
    RuleRow {
        id: rule.id.to_string(),
        router,
        customer: rule.customer_id.map_or_else(|| "-".into(), |c| c.to_string()),
        external: rule.external_port,
        target: format!("{}:{}", rule.internal_ip, rule.internal_port),
        protocol: rule.protocol.to_string(),
        active: output::yes_no(rule.is_active),
        description: output::or_dash(Some(rule.description.as_str())),
    }
}

#[derive(Tabled)]
struct RouterRuleRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "External")]
    external: u16,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Proto")]
    protocol: String,
    #[tabled(rename = "Enabled")]
    enabled: String,
    #[tabled(rename = "Managed")]
    managed: String,
}

impl From<&DriverRule> for RouterRuleRow {
    fn from(r: &DriverRule) -> Self {
        let host = r.internal_ip.map_or_else(|| "?".into(), |ip| ip.to_string());
        Self {
            id: r.id.clone(),
            name: output::or_dash(Some(r.name.as_str())),
            external: r.external_port,
            target: format!("{host}:{}", r.internal_port),
            protocol: r.protocol.to_string(),
            enabled: output::yes_no(r.enabled),
            managed: output::yes_no(r.managed),
        }
    }
}

#[derive(Serialize)]
struct AvailableView {
    router: String,
    range_start: u16,
    range_end: u16,
    ports: Vec<u16>,
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn handle(app: &App, cmd: PortsCommand, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        PortsCommand::List { router, all } => list(app, router.as_deref(), all, global).await,
        PortsCommand::Available { router, limit } => available(app, &router, limit, global).await,
        PortsCommand::Setup(args) => setup(app, args, global).await,
        PortsCommand::Remove(args) => remove(app, args, global).await,
        PortsCommand::RouterRules(args) => router_rules(app, &args.router, global).await,
    }
}

async fn list(app: &App, router: Option<&str>, all: bool, global: &GlobalOpts) -> Result<(), CliError> {
    let mut rules = match router {
        Some(key) => {
            let profile = app.router(key).await?;
            let mut rules = app.store.all_rules().await?;
            rules.retain(|r| r.router_id == profile.id);
            rules
        }
        None => app.store.all_rules().await?,
    };
    if !all {
        rules.retain(|r| r.is_active);
    }
    rules.sort_by_key(|r| (r.router_id, r.external_port));

    let routers = app.store.list_routers().await?;
    let out = output::render_list(&global.output, &rules, |r| rule_row(r, &routers), |r| r.id.to_string());
    output::print_output(&out, global.quiet);
    Ok(())
}

async fn available(app: &App, router: &str, limit: usize, global: &GlobalOpts) -> Result<(), CliError> {
    let profile = app.router(router).await?;
    let service = app.port_service(None);
    let ports = service.get_available_ports(profile.id, limit).await?;

    let view = AvailableView {
        router: profile.name,
        range_start: service.settings().range_start,
        range_end: service.settings().range_end,
        ports,
    };
    let out = output::render_single(
        &global.output,
        &view,
        |v| {
            if v.ports.is_empty() {
                return format!("No free ports on {} in {}-{}", v.router, v.range_start, v.range_end);
            }
            let ports: Vec<String> = v.ports.iter().map(u16::to_string).collect();
            format!("Free on {} ({}-{}): {}", v.router, v.range_start, v.range_end, ports.join(", "))
        },
        |v| v.ports.iter().map(u16::to_string).collect::<Vec<_>>().join("\n"),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

async fn setup(app: &App, args: CustomerArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let profile = app.router(&args.router).await?;
    let customer = Customer::new(args.customer_id, args.username);
    let service = app.port_service(args.ip);

    let rule = service.setup_customer_port_forwarding(&customer, &profile).await?;
    app.save().await?;

    let out = output::render_single(
        &global.output,
        &rule,
        |r| {
            format!(
                "Forwarding {}:{} -> {}:{} for {}",
                profile.ip_address, r.external_port, r.internal_ip, r.internal_port, customer.username
            )
        },
        |r| r.external_port.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

async fn remove(app: &App, args: CustomerArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let profile = app.router(&args.router).await?;
    let customer = Customer::new(args.customer_id, args.username);
    let service = app.port_service(None);

    let rules = service.customer_rules(&customer, profile.id).await?;
    if rules.is_empty() {
        if !global.quiet {
            eprintln!("Customer {} holds no rules on '{}'", customer.id, profile.name);
        }
        return Ok(());
    }
    let ports: Vec<String> = rules.iter().map(|r| r.external_port.to_string()).collect();
    if !super::util::confirm(
        "ports remove",
        &format!("Remove port(s) {} from '{}'?", ports.join(", "), profile.name),
        global.yes,
    )? {
        return Ok(());
    }

    let report = service.remove_customer_port_forwarding(&customer, &profile).await?;
    app.save().await?;

    let out = output::render_single(&global.output, &report, removal_detail, |r| {
        r.removed.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
    });
    output::print_output(&out, global.quiet);

    if report.is_complete() {
        return Ok(());
    }
    let failed_ports: Vec<String> = report
        .failed
        .iter()
        .filter_map(|(id, _)| rules.iter().find(|r| r.id == *id))
        .map(|r| format!("{}/{}", r.external_port, r.protocol))
        .collect();
    Err(CliError::PartialApply {
        message: format!(
            "{} of {} rule(s) could not be removed from '{}'",
            report.failed.len(),
            rules.len(),
            profile.name
        ),
        leftover: failed_ports.join(", "),
    })
}

fn removal_detail(r: &RemovalReport) -> String {
    let mut lines = vec![format!("Removed: {}", r.removed.len())];
    for (id, reason) in &r.failed {
        lines.push(format!("Failed:  rule {id}: {reason}"));
    }
    lines.join("\n")
}

async fn router_rules(app: &App, router: &str, global: &GlobalOpts) -> Result<(), CliError> {
    let profile = app.router(router).await?;
    let rules = app.manager.sync_port_forwarding_rules(&profile).await?;
    app.save().await?;

    let out = output::render_list(&global.output, &rules, RouterRuleRow::from, |r| r.id.clone());
    output::print_output(&out, global.quiet);
    Ok(())
}
