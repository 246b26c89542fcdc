// ── Router monitor ──
//
// Background sweep that probes every configured router and records
// reachability. Each probe builds its own driver and runs under its own
// timeout; one router failing never stops the sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use routerkit_api::{RouterId, RouterProfile};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::manager::RouterManager;
use crate::model::{Connectivity, ConnectionTest, SweepReport};

pub const MIN_INTERVAL: Duration = Duration::from_secs(30);

/// Sweep cadence and fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSettings {
    pub interval: Duration,
    /// Probes in flight at once.
    pub concurrency: usize,
    pub probe_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            concurrency: 8,
            probe_timeout: Duration::from_secs(30),
        }
    }
}

impl MonitorSettings {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.interval < MIN_INTERVAL {
            return Err(CoreError::Config {
                message: format!(
                    "monitor interval must be at least {}s, got {}s",
                    MIN_INTERVAL.as_secs(),
                    self.interval.as_secs()
                ),
            });
        }
        if self.concurrency == 0 {
            return Err(CoreError::Config {
                message: "monitor concurrency must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Snapshot returned by [`RouterMonitor::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub settings: MonitorSettings,
    pub last_sweep_at: Option<DateTime<Utc>>,
    pub last_report: Option<SweepReport>,
}

#[derive(Clone)]
pub struct RouterMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    manager: RouterManager,
    settings: Mutex<MonitorSettings>,
    running: Mutex<Option<Running>>,
    last_sweep: Mutex<Option<(DateTime<Utc>, SweepReport)>>,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    started_at: DateTime<Utc>,
}

enum ProbeOutcome {
    Tested {
        connectivity: Connectivity,
        devices_synced: bool,
    },
    TimedOut,
    Failed,
}

impl RouterMonitor {
    pub fn new(manager: RouterManager, settings: MonitorSettings) -> Result<Self, CoreError> {
        settings.validate()?;
        Ok(Self {
            inner: Arc::new(MonitorInner {
                manager,
                settings: Mutex::new(settings),
                running: Mutex::new(None),
                last_sweep: Mutex::new(None),
            }),
        })
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Spawn the sweep loop. The first sweep runs immediately. Returns
    /// `false` when already running.
    pub async fn start(&self) -> bool {
        let mut running = self.inner.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let settings = *self.inner.settings.lock().await;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sweep_task(self.clone(), settings.interval, cancel.clone()));
        *running = Some(Running {
            cancel,
            handle,
            started_at: Utc::now(),
        });
        info!(interval_secs = settings.interval.as_secs(), concurrency = settings.concurrency, "router monitor started");
        true
    }

    /// Cancel the loop and wait for an in-flight sweep to finish.
    /// Returns `false` when it was not running.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.inner.running.lock().await.take() else {
            return false;
        };
        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            warn!(error = %e, "monitor task ended abnormally");
        }
        info!("router monitor stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.inner
            .running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    pub async fn status(&self) -> MonitorStatus {
        let (running, started_at) = {
            let guard = self.inner.running.lock().await;
            match guard.as_ref() {
                Some(r) if !r.handle.is_finished() => (true, Some(r.started_at)),
                _ => (false, None),
            }
        };
        let settings = *self.inner.settings.lock().await;
        let last = *self.inner.last_sweep.lock().await;
        MonitorStatus {
            running,
            started_at,
            settings,
            last_sweep_at: last.map(|(at, _)| at),
            last_report: last.map(|(_, report)| report),
        }
    }

    /// Change the sweep interval, restarting the loop when it is running.
    pub async fn set_interval(&self, interval: Duration) -> Result<(), CoreError> {
        {
            let mut settings = self.inner.settings.lock().await;
            let updated = MonitorSettings { interval, ..*settings };
            updated.validate()?;
            *settings = updated;
        }
        if self.stop().await {
            self.start().await;
        }
        Ok(())
    }

    // ── Sweeps ─────────────────────────────────────────────────────

    /// Probe every router once, outside the schedule.
    pub async fn force_sync(&self) -> Result<SweepReport, CoreError> {
        let settings = *self.inner.settings.lock().await;
        let routers = self.inner.manager.routers().list_routers().await?;

        let outcomes: Vec<ProbeOutcome> = stream::iter(routers)
            .map(|profile| {
                let monitor = self.clone();
                async move { monitor.probe(&profile, settings.probe_timeout).await }
            })
            .buffer_unordered(settings.concurrency)
            .collect()
            .await;

        let mut report = SweepReport {
            probed: outcomes.len(),
            ..SweepReport::default()
        };
        for outcome in outcomes {
            match outcome {
                ProbeOutcome::Tested {
                    connectivity: Connectivity::Online,
                    devices_synced,
                } => {
                    report.online += 1;
                    if !devices_synced {
                        report.device_sync_failed += 1;
                    }
                }
                ProbeOutcome::Tested {
                    connectivity: Connectivity::LoginFailed,
                    ..
                } => report.login_failed += 1,
                ProbeOutcome::Tested {
                    connectivity: Connectivity::Unreachable,
                    ..
                }
                | ProbeOutcome::TimedOut => report.unreachable += 1,
                ProbeOutcome::Failed => report.errors += 1,
            }
        }

        *self.inner.last_sweep.lock().await = Some((Utc::now(), report));
        info!(
            probed = report.probed,
            online = report.online,
            login_failed = report.login_failed,
            unreachable = report.unreachable,
            errors = report.errors,
            device_sync_failed = report.device_sync_failed,
            "router sweep complete"
        );
        Ok(report)
    }

    /// Probe one router. Safe to call while a sweep is running.
    pub async fn sync_router(&self, id: RouterId) -> Result<ConnectionTest, CoreError> {
        let profile = self.inner.manager.routers().get_router(id).await?;
        let timeout = self.inner.settings.lock().await.probe_timeout;

        if let Ok(result) = tokio::time::timeout(timeout, self.inner.manager.test_connection(&profile)).await {
            result
        } else {
            self.mark_offline(&profile).await;
            Err(CoreError::ConnectionFailure {
                target: profile.ip_address.to_string(),
                reason: format!("probe timed out after {}s", timeout.as_secs()),
            })
        }
    }

    /// Test one router and, when it is online, refresh its device list.
    /// Both steps share `timeout`.
    async fn probe(&self, profile: &RouterProfile, timeout: Duration) -> ProbeOutcome {
        let manager = &self.inner.manager;
        let work = async {
            let test = manager.test_connection(profile).await?;
            if test.connectivity != Connectivity::Online {
                return Ok((test.connectivity, true));
            }
            let synced = match manager.sync_connected_devices(profile).await {
                Ok(_) => true,
                Err(e) => {
                    warn!(router = %profile.ip_address, error = %e, "device sync failed during sweep");
                    false
                }
            };
            Ok::<_, CoreError>((test.connectivity, synced))
        };

        match tokio::time::timeout(timeout, work).await {
            Ok(Ok((connectivity, devices_synced))) => {
                debug!(router = %profile.ip_address, %connectivity, devices_synced, "router probed");
                ProbeOutcome::Tested {
                    connectivity,
                    devices_synced,
                }
            }
            Ok(Err(e)) => {
                warn!(router = %profile.ip_address, error = %e, "router probe failed");
                ProbeOutcome::Failed
            }
            Err(_) => {
                warn!(router = %profile.ip_address, timeout_secs = timeout.as_secs(), "router probe timed out");
                self.mark_offline(profile).await;
                ProbeOutcome::TimedOut
            }
        }
    }

    async fn mark_offline(&self, profile: &RouterProfile) {
        if let Err(e) = self
            .inner
            .manager
            .routers()
            .record_check(profile.id, false, Utc::now())
            .await
        {
            debug!(router = %profile.ip_address, error = %e, "offline state not recorded");
        }
    }
}

async fn sweep_task(monitor: RouterMonitor, period: Duration, cancel: CancellationToken) {
    // The first tick fires immediately, so the sweep starts on launch.
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = monitor.force_sync().await {
                    warn!(error = %e, "router sweep failed");
                }
            }
        }
    }
}
