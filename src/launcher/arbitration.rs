//! Launch arbitration predicates.
//!
//! All functions here are total: an absent snapshot or missing fields make the
//! predicates evaluate to `false` rather than fail.

use crate::status::DeviceStatusSnapshot;

/// Display name of the receiver's default idle background.
pub const IDLE_SCREEN_NAME: &str = "Backdrop";

/// Outcome of evaluating a snapshot against the arbitration rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchIntent {
    ShouldLaunch,
    ShouldNotLaunch,
}

impl LaunchIntent {
    pub fn evaluate(snapshot: Option<&DeviceStatusSnapshot>, dashboard_name: &str) -> Self {
        if should_launch(snapshot, dashboard_name) {
            LaunchIntent::ShouldLaunch
        } else {
            LaunchIntent::ShouldNotLaunch
        }
    }

    pub fn is_launch(self) -> bool {
        self == LaunchIntent::ShouldLaunch
    }
}

/// All predicate results for one snapshot, kept together for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arbitration {
    pub device_active: bool,
    pub dashboard_active: bool,
    pub other_app_active: bool,
}

impl Arbitration {
    pub fn evaluate(snapshot: Option<&DeviceStatusSnapshot>, dashboard_name: &str) -> Self {
        Self {
            device_active: is_device_active(snapshot),
            dashboard_active: is_dashboard_active(snapshot, dashboard_name),
            other_app_active: is_other_app_active(snapshot, dashboard_name),
        }
    }

    pub fn intent(&self) -> LaunchIntent {
        if self.device_active && !self.dashboard_active && !self.other_app_active {
            LaunchIntent::ShouldLaunch
        } else {
            LaunchIntent::ShouldNotLaunch
        }
    }
}

/// An app is running and the device is (probably) showing it.
///
/// `ignore_input_signal` suppresses both the input-active and the standby check.
pub fn is_device_active(snapshot: Option<&DeviceStatusSnapshot>) -> bool {
    let Some(s) = snapshot else {
        return false;
    };
    if s.app_id.is_none() {
        return false;
    }
    if s.ignore_input_signal {
        return true;
    }
    s.is_active_input && !s.is_stand_by
}

pub fn is_dashboard_active(snapshot: Option<&DeviceStatusSnapshot>, dashboard_name: &str) -> bool {
    is_device_active(snapshot)
        && snapshot
            .and_then(|s| s.app_display_name.as_deref())
            .is_some_and(|name| name == dashboard_name)
}

/// Some app other than the dashboard or the idle screen is visible.
pub fn is_other_app_active(snapshot: Option<&DeviceStatusSnapshot>, dashboard_name: &str) -> bool {
    is_device_active(snapshot)
        && snapshot
            .and_then(|s| s.app_display_name.as_deref())
            .is_some_and(|name| name != dashboard_name && name != IDLE_SCREEN_NAME)
}

pub fn should_launch(snapshot: Option<&DeviceStatusSnapshot>, dashboard_name: &str) -> bool {
    is_device_active(snapshot)
        && !is_dashboard_active(snapshot, dashboard_name)
        && !is_other_app_active(snapshot, dashboard_name)
}
