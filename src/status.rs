use serde_json::Value;
use std::fmt;

/// One point-in-time read of a cast device's receiver state.
///
/// Snapshots are never patched: every status update from the device
/// replaces the previous snapshot wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStatusSnapshot {
    pub app_id: Option<String>,
    pub app_display_name: Option<String>,
    pub is_active_input: bool,
    pub is_stand_by: bool,
    /// Operator override for devices that cannot report input/standby state.
    pub ignore_input_signal: bool,
}

impl DeviceStatusSnapshot {
    /// Build a snapshot from a `RECEIVER_STATUS` payload.
    ///
    /// Accepts either the whole message or just its `status` object. Receivers
    /// that omit the CEC fields are treated as inactive input and in standby.
    pub fn from_receiver_status(payload: &Value, ignore_input_signal: bool) -> Self {
        let status = payload.get("status").unwrap_or(payload);

        let app = status
            .get("applications")
            .and_then(Value::as_array)
            .and_then(|apps| apps.first());

        let app_id = app
            .and_then(|a| a.get("appId"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let app_display_name = app
            .and_then(|a| a.get("displayName"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Self {
            app_id,
            app_display_name,
            is_active_input: status
                .get("isActiveInput")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            is_stand_by: status
                .get("isStandBy")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            ignore_input_signal,
        }
    }
}

impl fmt::Display for DeviceStatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "app={} ({}) active_input={} standby={}",
            self.app_display_name.as_deref().unwrap_or("-"),
            self.app_id.as_deref().unwrap_or("-"),
            self.is_active_input,
            self.is_stand_by,
        )?;
        if self.ignore_input_signal {
            write!(f, " [ignoring input signal]")?;
        }
        Ok(())
    }
}
