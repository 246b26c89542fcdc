#![allow(clippy::unwrap_used)]

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use routerkit_api::RouterId;
use routerkit_core::{CoreError, DeviceStore, MonitorSettings, RouterMonitor, RouterStore, SweepReport};

use common::{Reach, device, harness};

fn settings() -> MonitorSettings {
    MonitorSettings {
        interval: Duration::from_secs(60),
        concurrency: 2,
        probe_timeout: Duration::from_secs(5),
    }
}

#[tokio::test(start_paused = true)]
async fn sweep_counts_each_outcome_and_isolates_hangs() {
    let h = harness(&[Reach::Online, Reach::BadLogin, Reach::Unreachable, Reach::Hang]).await;
    let monitor = RouterMonitor::new(h.manager.clone(), settings()).unwrap();

    let report = monitor.force_sync().await.unwrap();

    assert_eq!(
        report,
        SweepReport {
            probed: 4,
            online: 1,
            login_failed: 1,
            unreachable: 2,
            errors: 0,
            device_sync_failed: 0,
        }
    );
    let hung = h.store.get_router(RouterId(4)).await.unwrap();
    assert!(!hung.is_online);
    assert!(hung.last_checked.is_some());
    assert!(h.store.get_router(RouterId(1)).await.unwrap().is_online);

    let status = monitor.status().await;
    assert_eq!(status.last_report, Some(report));
    assert!(!status.running);
}

#[tokio::test(start_paused = true)]
async fn sweep_records_devices_of_online_routers() {
    let h = harness(&[Reach::Online, Reach::Unreachable]).await;
    h.state(0).lock().unwrap().devices = vec![
        device("aa:bb:cc:00:00:01", "192.168.1.10", "Alices-iPhone"),
        device("aa:bb:cc:00:00:02", "192.168.1.11", "office-desktop"),
    ];
    let monitor = RouterMonitor::new(h.manager.clone(), settings()).unwrap();

    let report = monitor.force_sync().await.unwrap();

    assert_eq!(report.online, 1);
    assert_eq!(report.device_sync_failed, 0);
    assert_eq!(h.store.active_devices(RouterId(1)).await.unwrap().len(), 2);
    assert!(h.state(0).lock().unwrap().calls.contains(&"devices".to_owned()));
    assert!(!h.state(1).lock().unwrap().calls.contains(&"devices".to_owned()));
}

#[tokio::test(start_paused = true)]
async fn failed_device_sync_is_counted_apart_from_reachability() {
    let h = harness(&[Reach::Online]).await;
    h.state(0).lock().unwrap().devices_fail = true;
    let monitor = RouterMonitor::new(h.manager.clone(), settings()).unwrap();

    let report = monitor.force_sync().await.unwrap();

    assert_eq!(report.online, 1);
    assert_eq!(report.device_sync_failed, 1);
    assert_eq!(report.errors, 0);
    assert!(h.store.get_router(RouterId(1)).await.unwrap().is_online);
}

#[tokio::test(start_paused = true)]
async fn unsupported_vendor_counts_as_error_not_login_failure() {
    let h = harness(&[Reach::Unsupported]).await;
    let monitor = RouterMonitor::new(h.manager.clone(), settings()).unwrap();

    let report = monitor.force_sync().await.unwrap();

    assert_eq!(report.login_failed, 0);
    assert_eq!(report.errors, 1);
}

#[tokio::test(start_paused = true)]
async fn start_sweeps_immediately_and_stop_joins() {
    let h = harness(&[Reach::Online]).await;
    let monitor = RouterMonitor::new(h.manager.clone(), settings()).unwrap();

    assert!(monitor.start().await);
    assert!(!monitor.start().await);

    let mut waited = 0;
    while monitor.status().await.last_report.is_none() {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
        assert!(waited < 1000, "first sweep never ran");
    }

    let status = monitor.status().await;
    assert!(status.running);
    assert!(status.started_at.is_some());
    assert_eq!(status.last_report.unwrap().online, 1);

    assert!(monitor.stop().await);
    assert!(!monitor.stop().await);
    assert!(!monitor.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn sweeps_repeat_on_interval() {
    let h = harness(&[Reach::Online]).await;
    let monitor = RouterMonitor::new(h.manager.clone(), settings()).unwrap();
    monitor.start().await;

    tokio::time::sleep(Duration::from_secs(125)).await;
    monitor.stop().await;

    let connects = h
        .state(0)
        .lock()
        .unwrap()
        .calls
        .iter()
        .filter(|c| *c == "connect")
        .count();
    assert_eq!(connects, 3);
}

#[tokio::test(start_paused = true)]
async fn interval_change_restarts_running_monitor() {
    let h = harness(&[Reach::Online]).await;
    let monitor = RouterMonitor::new(h.manager.clone(), settings()).unwrap();
    monitor.start().await;

    monitor.set_interval(Duration::from_secs(120)).await.unwrap();

    let status = monitor.status().await;
    assert!(status.running);
    assert_eq!(status.settings.interval, Duration::from_secs(120));
    monitor.stop().await;
}

#[tokio::test]
async fn interval_below_minimum_is_rejected() {
    let h = harness(&[]).await;
    let too_fast = MonitorSettings {
        interval: Duration::from_secs(10),
        ..settings()
    };
    assert!(matches!(
        RouterMonitor::new(h.manager.clone(), too_fast),
        Err(CoreError::Config { .. })
    ));

    let monitor = RouterMonitor::new(h.manager.clone(), settings()).unwrap();
    let err = monitor.set_interval(Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, CoreError::Config { .. }));
    assert_eq!(monitor.status().await.settings.interval, Duration::from_secs(60));
}

#[tokio::test]
async fn single_router_sync() {
    let h = harness(&[Reach::BadLogin]).await;
    let monitor = RouterMonitor::new(h.manager.clone(), settings()).unwrap();

    let test = monitor.sync_router(RouterId(1)).await.unwrap();
    assert_eq!(test.connectivity, routerkit_core::Connectivity::LoginFailed);

    let err = monitor.sync_router(RouterId(99)).await.unwrap_err();
    assert!(matches!(err, CoreError::RouterNotFound { .. }));
}

#[tokio::test(start_paused = true)]
async fn single_router_sync_times_out_as_unreachable() {
    let h = harness(&[Reach::Hang]).await;
    let monitor = RouterMonitor::new(h.manager.clone(), settings()).unwrap();

    let err = monitor.sync_router(RouterId(1)).await.unwrap_err();
    assert!(err.is_unreachable());
    assert!(h.store.get_router(RouterId(1)).await.unwrap().last_checked.is_some());
}
