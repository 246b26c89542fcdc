#![allow(clippy::unwrap_used)]

mod common;

use pretty_assertions::assert_eq;
use routerkit_api::{DriverRule, Protocol, RouterType, SecurityType};
use routerkit_core::{
    Connectivity, CoreError, Customer, DeviceKind, DeviceStore, RouterStore, RuleStore,
};
use secrecy::SecretString;

use common::{Reach, device, harness};

// ── Connection tests ────────────────────────────────────────────────

#[tokio::test]
async fn connection_test_is_tri_state_and_persisted() {
    let h = harness(&[Reach::Online, Reach::BadLogin, Reach::Unreachable]).await;

    let online = h.manager.test_connection(h.router(0)).await.unwrap();
    let refused = h.manager.test_connection(h.router(1)).await.unwrap();
    let down = h.manager.test_connection(h.router(2)).await.unwrap();

    assert_eq!(online.connectivity, Connectivity::Online);
    assert_eq!(online.status.unwrap().model.as_deref(), Some("FakeBox 1"));
    assert_eq!(refused.connectivity, Connectivity::LoginFailed);
    assert_eq!(down.connectivity, Connectivity::Unreachable);

    let stored = h.store.get_router(h.router(0).id).await.unwrap();
    assert!(stored.is_online);
    assert_eq!(stored.last_checked, Some(online.checked_at));
    assert!(!h.store.get_router(h.router(1).id).await.unwrap().is_online);
    assert!(h.store.get_router(h.router(2).id).await.unwrap().last_checked.is_some());

    for i in 0..3 {
        assert_eq!(h.state(i).lock().unwrap().disconnects, 1);
    }
}

#[tokio::test]
async fn unregistered_router_type_is_an_error() {
    let h = harness(&[Reach::Online]).await;
    let mut profile = h.router(0).clone();
    profile.router_type = RouterType::Tenda;

    let err = h.manager.test_connection(&profile).await.unwrap_err();
    assert!(matches!(err, CoreError::UnsupportedRouterType { ref router_type } if router_type == "tenda"));
}

#[tokio::test]
async fn recent_status_is_served_from_cache() {
    let h = harness(&[Reach::Online]).await;

    let fresh = h.manager.get_router_status(h.router(0), false).await.unwrap();
    assert!(!fresh.cached);
    assert!(fresh.is_online);

    let cached = h.manager.get_router_status(h.router(0), false).await.unwrap();
    assert!(cached.cached);
    assert!(cached.is_online);
    assert_eq!(cached.last_checked, fresh.last_checked);

    let forced = h.manager.get_router_status(h.router(0), true).await.unwrap();
    assert!(!forced.cached);

    let connects = h
        .state(0)
        .lock()
        .unwrap()
        .calls
        .iter()
        .filter(|c| *c == "connect")
        .count();
    assert_eq!(connects, 2);
}

#[tokio::test]
async fn unsupported_vendor_is_not_a_login_failure() {
    let h = harness(&[Reach::Unsupported]).await;
    let err = h.manager.test_connection(h.router(0)).await.unwrap_err();
    assert!(matches!(err, CoreError::Unsupported { ref message } if message.contains("FakeVendor")));

    let stored = h.store.get_router(h.router(0).id).await.unwrap();
    assert!(stored.last_checked.is_none());
    assert_eq!(h.state(0).lock().unwrap().disconnects, 1);
}

// ── Devices ─────────────────────────────────────────────────────────

#[tokio::test]
async fn device_sync_records_and_classifies() {
    let h = harness(&[Reach::Online]).await;
    h.state(0).lock().unwrap().devices = vec![
        device("AA-BB-CC-00-00-01", "192.168.1.10", "Alices-iPhone"),
        device("aa:bb:cc:00:00:02", "192.168.1.11", "office-desktop"),
    ];

    let written = h.manager.sync_connected_devices(h.router(0)).await.unwrap();
    assert_eq!(written, 2);

    let mut records = h.store.active_devices(h.router(0).id).await.unwrap();
    records.sort_by(|a, b| a.device.mac_address.cmp(&b.device.mac_address));
    assert_eq!(records[0].device.mac_address.as_str(), "aa:bb:cc:00:00:01");
    assert_eq!(records[0].kind, DeviceKind::Phone);
    assert_eq!(records[1].kind, DeviceKind::Computer);
}

#[tokio::test]
async fn device_sync_on_unreachable_router_fails() {
    let h = harness(&[Reach::Unreachable]).await;
    let err = h.manager.sync_connected_devices(h.router(0)).await.unwrap_err();
    assert!(err.is_unreachable());
}

// ── Configuration ───────────────────────────────────────────────────

#[tokio::test]
async fn wifi_change_reaches_driver() {
    let h = harness(&[Reach::Online]).await;
    h.manager
        .update_wifi_settings(
            h.router(0),
            "CloudNet",
            &SecretString::from("hunter22".to_owned()),
            SecurityType::Wpa2,
        )
        .await
        .unwrap();

    let state = h.state(0).lock().unwrap();
    assert!(state.calls.contains(&"wifi CloudNet wpa2".to_owned()));
    assert_eq!(state.disconnects, 1);
}

#[tokio::test]
async fn reboot_marks_router_offline() {
    let h = harness(&[Reach::Online]).await;
    h.manager.test_connection(h.router(0)).await.unwrap();
    assert!(h.store.get_router(h.router(0).id).await.unwrap().is_online);

    h.manager.reboot_router(h.router(0)).await.unwrap();

    assert!(!h.store.get_router(h.router(0).id).await.unwrap().is_online);
    assert!(h.state(0).lock().unwrap().calls.contains(&"reboot".to_owned()));
}

// ── Port forwarding ─────────────────────────────────────────────────

#[tokio::test]
async fn router_rules_are_read_back_into_store() {
    let h = harness(&[Reach::Online]).await;
    h.state(0).lock().unwrap().rules = vec![DriverRule {
        id: "3".into(),
        name: "nas".into(),
        external_port: 8443,
        internal_ip: Some("192.168.1.4".parse().unwrap()),
        internal_port: 443,
        protocol: Protocol::Tcp,
        enabled: true,
        managed: false,
    }];

    let rules = h.manager.sync_port_forwarding_rules(h.router(0)).await.unwrap();
    assert_eq!(rules.len(), 1);
    // Second sync reconciles instead of duplicating.
    h.manager.sync_port_forwarding_rules(h.router(0)).await.unwrap();

    let stored = h.store.all_rules().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].external_port, 8443);
    assert_eq!(stored[0].customer_id, None);
    assert_eq!(stored[0].description, "nas");
    assert!(stored[0].is_active);
}

#[tokio::test]
async fn created_rule_is_deleted_from_router_and_store() {
    let h = harness(&[Reach::Online]).await;
    let customer = Customer::new(4, "dave");

    let rule = h
        .manager
        .create_port_forwarding_rule(
            h.router(0),
            Some(&customer),
            10500,
            "192.168.1.30".parse().unwrap(),
            8080,
            Protocol::Both,
            None,
        )
        .await
        .unwrap();
    assert_eq!(rule.description, "Port 10500 forwarding");
    assert_eq!(h.state(0).lock().unwrap().rules.len(), 1);

    h.manager.delete_port_forwarding_rule(&rule).await.unwrap();

    assert!(h.state(0).lock().unwrap().rules.is_empty());
    assert!(h.store.active_rules(h.router(0).id).await.unwrap().is_empty());
}

#[tokio::test]
async fn rule_missing_on_router_still_deactivates() {
    let h = harness(&[Reach::Online]).await;
    let rule = h
        .manager
        .create_port_forwarding_rule(
            h.router(0),
            None,
            10600,
            "192.168.1.31".parse().unwrap(),
            80,
            Protocol::Tcp,
            Some("camera".into()),
        )
        .await
        .unwrap();
    h.state(0).lock().unwrap().rules.clear();

    h.manager.delete_port_forwarding_rule(&rule).await.unwrap();
    assert!(h.store.active_rules(h.router(0).id).await.unwrap().is_empty());
}

#[tokio::test]
async fn rejected_delete_keeps_rule_active() {
    let h = harness(&[Reach::Online]).await;
    let rule = h
        .manager
        .create_port_forwarding_rule(
            h.router(0),
            None,
            10700,
            "192.168.1.32".parse().unwrap(),
            80,
            Protocol::Tcp,
            None,
        )
        .await
        .unwrap();
    h.state(0).lock().unwrap().stuck_ports = vec![10700];

    let err = h.manager.delete_port_forwarding_rule(&rule).await.unwrap_err();
    assert!(matches!(err, CoreError::Driver { .. }));
    assert_eq!(h.store.active_rules(h.router(0).id).await.unwrap().len(), 1);
}

// ── Health ──────────────────────────────────────────────────────────

#[tokio::test]
async fn health_check_counts_and_samples_first_router() {
    let h = harness(&[Reach::Online, Reach::Unreachable]).await;
    h.manager
        .create_port_forwarding_rule(
            h.router(0),
            None,
            10800,
            "192.168.1.33".parse().unwrap(),
            80,
            Protocol::Tcp,
            None,
        )
        .await
        .unwrap();

    let report = h.manager.health_check().await.unwrap();

    assert_eq!(report.router_count, 2);
    assert_eq!(report.online_routers, 1);
    assert_eq!(report.active_port_rules, 1);
    let sample = report.sample.unwrap();
    assert_eq!(sample.router, "site-1");
    assert_eq!(sample.connectivity, Some(Connectivity::Online));
}
