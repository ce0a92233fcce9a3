//! Dashboard launch arbitration for one cast device.
//!
//! A single task owns the latest snapshot and the debounce deadline. It reacts
//! to three event sources: status notifications, the debounce deadline, and a
//! periodic re-assertion tick.

pub mod arbitration;

use crate::cast::CastControl;
use crate::status::DeviceStatusSnapshot;
use arbitration::{Arbitration, LaunchIntent};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(10);
pub const DEFAULT_REASSERT_INTERVAL: Duration = Duration::from_secs(60);
/// Display name the DashCast receiver app reports while it is running.
pub const DEFAULT_DASHBOARD_APP_NAME: &str = "DashCast";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherSettings {
    pub dashboard_url: String,
    pub dashboard_app_name: String,
    pub debounce: Duration,
    pub reassert_interval: Duration,
}

impl LauncherSettings {
    pub fn new(dashboard_url: impl Into<String>) -> Self {
        Self {
            dashboard_url: dashboard_url.into(),
            dashboard_app_name: DEFAULT_DASHBOARD_APP_NAME.to_string(),
            debounce: DEFAULT_DEBOUNCE,
            reassert_interval: DEFAULT_REASSERT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherState {
    Idle,
    PendingDebounce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaunchReason {
    Debounced,
    Reassert,
}

impl LaunchReason {
    fn as_str(self) -> &'static str {
        match self {
            LaunchReason::Debounced => "debounced",
            LaunchReason::Reassert => "reassert",
        }
    }
}

pub struct DashboardLauncher<D> {
    device: D,
    settings: LauncherSettings,
    latest: Option<DeviceStatusSnapshot>,
    recheck_at: Option<Instant>,
}

impl<D: CastControl> DashboardLauncher<D> {
    pub fn new(device: D, settings: LauncherSettings) -> Self {
        Self {
            device,
            settings,
            latest: None,
            recheck_at: None,
        }
    }

    pub fn state(&self) -> LauncherState {
        if self.recheck_at.is_some() {
            LauncherState::PendingDebounce
        } else {
            LauncherState::Idle
        }
    }

    /// Store a new snapshot and schedule a re-check if it looks launchable.
    ///
    /// At most one re-check is pending at a time; notifications arriving while
    /// one is pending are folded into it.
    pub fn handle_status(&mut self, snapshot: DeviceStatusSnapshot, now: Instant) -> LauncherState {
        debug!(device = %self.device.name(), %snapshot, "status notification");
        self.latest = Some(snapshot);

        if self.arbitrate("notification").is_launch() {
            if self.recheck_at.is_none() {
                self.recheck_at = Some(now + self.settings.debounce);
                info!(
                    device = %self.device.name(),
                    "might launch dashboard in {}s",
                    self.settings.debounce.as_secs()
                );
            } else {
                debug!(device = %self.device.name(), "re-check already pending");
            }
        }
        self.state()
    }

    /// Re-evaluate against the snapshot current *now* and return to idle.
    pub fn handle_recheck(&mut self) -> LaunchIntent {
        self.recheck_at = None;
        self.arbitrate("recheck")
    }

    fn arbitrate(&self, checkpoint: &'static str) -> LaunchIntent {
        let result = Arbitration::evaluate(self.latest.as_ref(), &self.settings.dashboard_app_name);
        let intent = result.intent();
        debug!(
            device = %self.device.name(),
            checkpoint,
            device_active = result.device_active,
            dashboard_active = result.dashboard_active,
            other_app_active = result.other_app_active,
            should_launch = intent.is_launch(),
            "arbitration"
        );
        intent
    }

    /// Fire-and-forget launch. Failures are logged and otherwise ignored; the
    /// next re-check or re-assertion tries again.
    fn issue_launch(&self, reason: LaunchReason) {
        let device = self.device.clone();
        let url = self.settings.dashboard_url.clone();
        info!(
            device = %device.name(),
            reason = reason.as_str(),
            %url,
            "launching dashboard"
        );

        tokio::spawn(async move {
            match device.load_dashboard(&url).await {
                Ok(ack) => info!(
                    device = %device.name(),
                    session = %ack.session_id,
                    started_app = ack.launched,
                    "dashboard load sent"
                ),
                Err(err) => warn!(device = %device.name(), "dashboard launch failed: {err:#}"),
            }
        });
    }

    /// Run for the lifetime of the process.
    ///
    /// The first re-assertion fires immediately. If the status feed closes the
    /// launcher keeps re-asserting on its own.
    pub async fn run(mut self, mut status_rx: UnboundedReceiver<DeviceStatusSnapshot>) {
        let mut reassert = tokio::time::interval(self.settings.reassert_interval);
        reassert.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut status_open = true;

        loop {
            tokio::select! {
                received = status_rx.recv(), if status_open => match received {
                    Some(snapshot) => {
                        self.handle_status(snapshot, Instant::now());
                    }
                    None => {
                        warn!(
                            device = %self.device.name(),
                            "status feed closed; continuing with periodic re-assertion only"
                        );
                        status_open = false;
                    }
                },
                () = sleep_until_deadline(self.recheck_at) => {
                    if self.handle_recheck().is_launch() {
                        self.issue_launch(LaunchReason::Debounced);
                    }
                }
                _ = reassert.tick() => {
                    self.issue_launch(LaunchReason::Reassert);
                }
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cast::LaunchAck;
    use anyhow::{bail, Result};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    #[derive(Clone, Default)]
    struct RecordingDevice {
        launches: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl RecordingDevice {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn launch_count(&self) -> usize {
            self.launches.lock().unwrap().len()
        }
    }

    impl CastControl for RecordingDevice {
        fn name(&self) -> &str {
            "test-device"
        }

        async fn current_status(&self) -> Result<DeviceStatusSnapshot> {
            Ok(DeviceStatusSnapshot::default())
        }

        async fn load_dashboard(&self, url: &str) -> Result<LaunchAck> {
            self.launches.lock().unwrap().push(url.to_string());
            if self.fail {
                bail!("device unreachable");
            }
            Ok(LaunchAck {
                session_id: "session-1".to_string(),
                launched: false,
            })
        }
    }

    fn settings() -> LauncherSettings {
        LauncherSettings {
            dashboard_url: "https://example.com/dash".to_string(),
            dashboard_app_name: "Dashboard".to_string(),
            debounce: Duration::from_secs(10),
            reassert_interval: Duration::from_secs(60),
        }
    }

    fn showing(name: &str) -> DeviceStatusSnapshot {
        DeviceStatusSnapshot {
            app_id: Some("1".to_string()),
            app_display_name: Some(name.to_string()),
            is_active_input: true,
            is_stand_by: false,
            ignore_input_signal: false,
        }
    }

    fn standby() -> DeviceStatusSnapshot {
        DeviceStatusSnapshot {
            app_id: Some("1".to_string()),
            app_display_name: None,
            is_active_input: false,
            is_stand_by: true,
            ignore_input_signal: false,
        }
    }

    #[test]
    fn starts_idle_without_snapshot() {
        let launcher = DashboardLauncher::new(RecordingDevice::default(), settings());
        assert_eq!(launcher.state(), LauncherState::Idle);
        assert!(launcher.latest.is_none());
    }

    #[test]
    fn launchable_notification_schedules_recheck() {
        let mut launcher = DashboardLauncher::new(RecordingDevice::default(), settings());
        let now = Instant::now();
        let state = launcher.handle_status(showing("Backdrop"), now);
        assert_eq!(state, LauncherState::PendingDebounce);
        assert_eq!(launcher.recheck_at, Some(now + Duration::from_secs(10)));
    }

    #[test]
    fn unlaunchable_notification_stays_idle() {
        let mut launcher = DashboardLauncher::new(RecordingDevice::default(), settings());
        let now = Instant::now();
        for snapshot in [showing("Dashboard"), showing("Netflix"), standby()] {
            assert_eq!(launcher.handle_status(snapshot, now), LauncherState::Idle);
        }
    }

    #[test]
    fn burst_of_notifications_keeps_single_deadline() {
        let mut launcher = DashboardLauncher::new(RecordingDevice::default(), settings());
        let start = Instant::now();
        launcher.handle_status(showing("Backdrop"), start);
        for secs in 1..8 {
            launcher.handle_status(showing("Backdrop"), start + Duration::from_secs(secs));
        }
        assert_eq!(launcher.recheck_at, Some(start + Duration::from_secs(10)));
    }

    #[test]
    fn recheck_uses_latest_snapshot_and_returns_to_idle() {
        let mut launcher = DashboardLauncher::new(RecordingDevice::default(), settings());
        let now = Instant::now();
        launcher.handle_status(showing("Backdrop"), now);
        // Another app starts while the re-check is pending.
        launcher.handle_status(showing("Netflix"), now);
        assert_eq!(launcher.state(), LauncherState::PendingDebounce);

        assert_eq!(launcher.handle_recheck(), LaunchIntent::ShouldNotLaunch);
        assert_eq!(launcher.state(), LauncherState::Idle);
    }

    #[test]
    fn recheck_confirms_still_launchable() {
        let mut launcher = DashboardLauncher::new(RecordingDevice::default(), settings());
        launcher.handle_status(showing("Backdrop"), Instant::now());
        assert_eq!(launcher.handle_recheck(), LaunchIntent::ShouldLaunch);
        assert_eq!(launcher.state(), LauncherState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn reasserts_on_start_and_every_period() {
        let device = RecordingDevice::default();
        let (_tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(DashboardLauncher::new(device.clone(), settings()).run(rx));

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(device.launch_count(), 3);
        assert!(device
            .launches
            .lock()
            .unwrap()
            .iter()
            .all(|url| url == "https://example.com/dash"));
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_launch_fires_once_after_burst() {
        let device = RecordingDevice::default();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(DashboardLauncher::new(device.clone(), settings()).run(rx));

        for _ in 0..5 {
            tx.send(showing("Backdrop")).unwrap();
        }

        tokio::time::sleep(Duration::from_secs(9)).await;
        // Only the start-up re-assertion so far.
        assert_eq!(device.launch_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(device.launch_count(), 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(device.launch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_state_does_not_launch() {
        let device = RecordingDevice::default();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(DashboardLauncher::new(device.clone(), settings()).run(rx));

        tx.send(showing("Backdrop")).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send(showing("Netflix")).unwrap();

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(device.launch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_launches_do_not_stop_the_loop() {
        let device = RecordingDevice::failing();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(DashboardLauncher::new(device.clone(), settings()).run(rx));

        tx.send(showing("Backdrop")).unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        // start-up, debounced, and the 60s re-assertion
        assert_eq!(device.launch_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_reasserting_after_status_feed_closes() {
        let device = RecordingDevice::default();
        let (tx, rx) = mpsc::unbounded_channel::<DeviceStatusSnapshot>();
        tokio::spawn(DashboardLauncher::new(device.clone(), settings()).run(rx));
        drop(tx);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(device.launch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_launches_against_showing_dashboard_are_harmless() {
        let device = RecordingDevice::default();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(DashboardLauncher::new(device.clone(), settings()).run(rx));

        tx.send(showing("Dashboard")).unwrap();
        tokio::time::sleep(Duration::from_secs(121)).await;
        // Only periodic re-assertions; the showing dashboard never schedules a re-check.
        assert_eq!(device.launch_count(), 3);
    }
}
