use crate::launcher::{
    LauncherSettings, DEFAULT_DASHBOARD_APP_NAME, DEFAULT_DEBOUNCE, DEFAULT_REASSERT_INTERVAL,
};
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_DASHBOARD_URL: &str = "https://home-assistant.io";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardConfig {
    /// Page the dashboard app should display
    #[serde(default = "default_dashboard_url")]
    pub url: String,
    /// Display name the dashboard receiver app reports
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DeviceConfig {
    /// Friendly name or id of the device to manage (first device found if unset)
    #[serde(default)]
    pub name: Option<String>,
    /// Treat the device as active regardless of its input/standby reports
    #[serde(default)]
    pub ignore_input_signal: bool,
    /// Short names for devices, e.g. `tv = "Living Room TV"`
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    /// Delay before re-checking a launchable status ("10s", "1m", ...)
    #[serde(default = "default_debounce")]
    pub debounce: String,
    /// Period of the unconditional launch re-assertion
    #[serde(default = "default_reassert_interval")]
    pub reassert_interval: String,
}

fn default_dashboard_url() -> String {
    DEFAULT_DASHBOARD_URL.to_string()
}

fn default_app_name() -> String {
    DEFAULT_DASHBOARD_APP_NAME.to_string()
}

fn default_debounce() -> String {
    format!("{}s", DEFAULT_DEBOUNCE.as_secs())
}

fn default_reassert_interval() -> String {
    format!("{}s", DEFAULT_REASSERT_INTERVAL.as_secs())
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            url: default_dashboard_url(),
            app_name: default_app_name(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce: default_debounce(),
            reassert_interval: default_reassert_interval(),
        }
    }
}

/// A device query after alias lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResolution {
    pub input: String,
    pub resolved: String,
    pub used_alias: bool,
}

impl Config {
    /// Return the path to the default configuration file.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("io", "dashcast", "dashcast")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Load config from `path`, or from the default location.
    ///
    /// A missing default file means built-in defaults; an explicitly given
    /// file must exist. A file that fails to parse is reported and ignored.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path.is_some();
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);

        if !path.is_file() {
            if explicit {
                bail!("Config file {} does not exist", path.display());
            }
            return Ok(Config::default());
        }

        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        match toml::from_str::<Config>(&data) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    "failed to parse config, using defaults: {e}"
                );
                Ok(Config::default())
            }
        }
    }

    /// Save config to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let data = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(())
    }

    /// Map an alias to a device name. Unknown names pass through unchanged.
    pub fn resolve_device_alias(&self, input: &str) -> Result<DeviceResolution> {
        let name = input.trim();

        if let Some(target) = lookup_alias(&self.device.aliases, name) {
            let resolved = target.trim();
            if resolved.is_empty() {
                bail!(
                    "Alias '{}' exists in config but resolves to an empty device name",
                    name
                );
            }
            return Ok(DeviceResolution {
                input: name.to_string(),
                resolved: resolved.to_string(),
                used_alias: true,
            });
        }

        Ok(DeviceResolution {
            input: name.to_string(),
            resolved: name.to_string(),
            used_alias: false,
        })
    }

    pub fn launcher_settings(&self) -> Result<LauncherSettings> {
        let mut settings = LauncherSettings::new(self.dashboard.url.clone());
        settings.dashboard_app_name = self.dashboard.app_name.clone();
        settings.debounce = parse_interval(&self.timing.debounce)
            .with_context(|| "invalid [timing] debounce")?;
        settings.reassert_interval = parse_interval(&self.timing.reassert_interval)
            .with_context(|| "invalid [timing] reassert_interval")?;
        Ok(settings)
    }
}

fn lookup_alias<'a>(aliases: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    if let Some(value) = aliases.get(key) {
        return Some(value.as_str());
    }

    let needle = key.to_ascii_lowercase();
    aliases
        .iter()
        .find_map(|(alias, value)| (alias.to_ascii_lowercase() == needle).then_some(value.as_str()))
}

/// Longest accepted debounce or re-assertion interval.
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Parse interval strings like "500ms", "10s", "1m", "2h". A plain number is
/// seconds. Values must lie in `(0, MAX_INTERVAL]`.
pub fn parse_interval(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    let parsed = if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    };

    let duration = parsed.ok_or_else(|| anyhow!("'{s}' is not an interval (try \"10s\" or \"1m\")"))?;
    if duration.is_zero() {
        bail!("interval must be greater than zero");
    }
    if duration > MAX_INTERVAL {
        bail!(
            "interval '{s}' is longer than {}h",
            MAX_INTERVAL.as_secs() / 3600
        );
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_interval_units() {
        assert_eq!(parse_interval("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_interval("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_interval(" 2H ").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_interval("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_interval("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn parse_interval_rejects_garbage_and_zero() {
        assert!(parse_interval("soon").is_err());
        assert!(parse_interval("").is_err());
        assert!(parse_interval("0s").is_err());
    }

    #[test]
    fn parse_interval_rejects_overflow_and_overlong() {
        assert!(parse_interval("400000000000000000m").is_err());
        assert!(parse_interval("18446744073709551615h").is_err());
        assert!(parse_interval("18446744073709551615").is_err());
        assert!(parse_interval("25h").is_err());
        assert!(parse_interval("86401s").is_err());
        assert_eq!(parse_interval("24h").unwrap(), MAX_INTERVAL);
        assert_eq!(parse_interval("1440m").unwrap(), MAX_INTERVAL);
    }

    #[test]
    fn huge_timing_values_are_rejected_by_settings() {
        let mut config = Config::default();
        config.timing.debounce = "18446744073709551615".to_string();
        assert!(config.launcher_settings().is_err());

        let mut config = Config::default();
        config.timing.reassert_interval = "400000000000000000m".to_string();
        assert!(config.launcher_settings().is_err());
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.dashboard.url, DEFAULT_DASHBOARD_URL);
        assert_eq!(config.dashboard.app_name, "DashCast");
        assert!(!config.device.ignore_input_signal);

        let settings = config.launcher_settings().unwrap();
        assert_eq!(settings.debounce, Duration::from_secs(10));
        assert_eq!(settings.reassert_interval, Duration::from_secs(60));
    }

    #[test]
    fn partial_sections_fill_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [dashboard]
            url = "http://192.168.1.132:8080"

            [device]
            name = "Kitchen Display"
            ignore_input_signal = true

            [timing]
            reassert_interval = "5m"
            "#,
        )
        .unwrap();

        assert_eq!(config.dashboard.app_name, "DashCast");
        assert_eq!(config.device.name.as_deref(), Some("Kitchen Display"));
        assert!(config.device.ignore_input_signal);

        let settings = config.launcher_settings().unwrap();
        assert_eq!(settings.dashboard_url, "http://192.168.1.132:8080");
        assert_eq!(settings.debounce, Duration::from_secs(10));
        assert_eq!(settings.reassert_interval, Duration::from_secs(300));
    }

    #[test]
    fn invalid_timing_is_an_error() {
        let mut config = Config::default();
        config.timing.debounce = "whenever".to_string();
        assert!(config.launcher_settings().is_err());
    }

    #[test]
    fn alias_lookup_is_case_insensitive() {
        let mut config = Config::default();
        config
            .device
            .aliases
            .insert("Kitchen".to_string(), "Kitchen Display".to_string());

        let resolved = config.resolve_device_alias("kitchen").unwrap();
        assert_eq!(resolved.resolved, "Kitchen Display");
        assert!(resolved.used_alias);

        let passthrough = config.resolve_device_alias("Den TV").unwrap();
        assert_eq!(passthrough.resolved, "Den TV");
        assert!(!passthrough.used_alias);
    }

    #[test]
    fn empty_alias_target_fails() {
        let mut config = Config::default();
        config.device.aliases.insert("tv".to_string(), "  ".to_string());
        assert!(config.resolve_device_alias("tv").is_err());
    }

    #[test]
    fn save_then_load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.device.name = Some("Office".to_string());
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[dashboard\nurl = ").unwrap();
        assert_eq!(Config::load(Some(&path)).unwrap(), Config::default());
    }
}
