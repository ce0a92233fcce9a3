//! Cast device discovery over mDNS (via `avahi-browse`) and device selection.

use std::collections::BTreeMap;
use std::process::Command;
use thiserror::Error;
use tracing::debug;

const CAST_SERVICE: &str = "_googlecast._tcp";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CastDevice {
    pub name: String,
    pub id: Option<String>,
    pub ip: Option<String>,
    pub port: Option<u16>,
}

impl CastDevice {
    pub fn label(&self) -> String {
        let id = self.id.as_deref().unwrap_or("unknown-id");
        match (&self.ip, self.port) {
            (Some(ip), Some(port)) => format!("{} [id={id}] ({ip}:{port})", self.name),
            (Some(ip), None) => format!("{} [id={id}] ({ip})", self.name),
            _ => format!("{} [id={id}] (unresolved)", self.name),
        }
    }
}

/// Startup failures while finding the device to manage.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("avahi-browse is not installed (needed for cast device discovery)")]
    MissingBrowser,
    #[error("avahi-browse failed: {0}")]
    Browse(String),
    #[error("No cast devices found")]
    NoDevices,
    #[error("Cast device '{query}' not found. Available: {available}")]
    NotFound { query: String, available: String },
    #[error("Cast device name '{query}' is ambiguous. Matches: {candidates}. Use a unique device id instead.")]
    Ambiguous { query: String, candidates: String },
    #[error("Cast device '{name}' did not expose an IP address in discovery")]
    Unresolved { name: String },
}

/// Browse the local network for cast devices.
pub fn discover_devices() -> Result<Vec<CastDevice>, DiscoveryError> {
    let output = Command::new("avahi-browse")
        .args(["-rtp", CAST_SERVICE])
        .output()
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => DiscoveryError::MissingBrowser,
            _ => DiscoveryError::Browse(err.to_string()),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let daemon_hint = if stderr.to_lowercase().contains("daemon not running") {
            " (start it with `systemctl enable --now avahi-daemon`)"
        } else {
            ""
        };
        return Err(DiscoveryError::Browse(format!(
            "exit status {}{}{}",
            output.status.code().unwrap_or(-1),
            if stderr.is_empty() {
                String::new()
            } else {
                format!(": {stderr}")
            },
            daemon_hint
        )));
    }

    let devices = parse_avahi_output(&String::from_utf8_lossy(&output.stdout));
    debug!(count = devices.len(), "cast discovery finished");
    Ok(devices)
}

/// Parse `avahi-browse -rtp` output.
///
/// Resolved (`=`) lines win over browse-only (`+`) lines for the same device;
/// devices sharing a name but carrying distinct ids are kept apart.
pub fn parse_avahi_output(text: &str) -> Vec<CastDevice> {
    let mut resolved: BTreeMap<String, CastDevice> = BTreeMap::new();
    let mut unresolved: BTreeMap<String, CastDevice> = BTreeMap::new();

    for line in text.lines() {
        if !line.starts_with('=') && !line.starts_with('+') {
            continue;
        }

        let parts: Vec<&str> = line.split(';').collect();
        if parts.len() < 4 || parts[2] != "IPv4" {
            continue;
        }

        let name = unescape_avahi(parts[3].trim());
        if name.is_empty() {
            continue;
        }

        let txt_id = parts.iter().find_map(|part| parse_device_id(part));

        if line.starts_with('=') {
            let ip = parts
                .get(7)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            let port = parts.get(8).and_then(|v| v.trim().parse::<u16>().ok());
            let key = txt_id
                .as_ref()
                .map(|v| format!("id:{v}"))
                .or_else(|| {
                    ip.as_ref()
                        .map(|value| format!("name-ip:{}:{value}", name.to_ascii_lowercase()))
                })
                .unwrap_or_else(|| format!("name:{}", name.to_ascii_lowercase()));

            let entry = resolved.entry(key).or_insert_with(|| CastDevice {
                name: name.clone(),
                id: txt_id.clone(),
                ip: ip.clone(),
                port,
            });
            if entry.id.is_none() {
                entry.id = txt_id;
            }
            if ip.is_some() {
                entry.ip = ip;
            }
            if port.is_some() {
                entry.port = port;
            }
            unresolved.remove(&name.to_ascii_lowercase());
            continue;
        }

        if resolved
            .values()
            .any(|device| device.name.eq_ignore_ascii_case(&name))
        {
            continue;
        }

        unresolved
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| CastDevice {
                name,
                id: txt_id,
                ip: None,
                port: None,
            });
    }

    let mut devices: Vec<CastDevice> = resolved.into_values().collect();
    devices.extend(unresolved.into_values());
    devices.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| a.id.cmp(&b.id))
            .then_with(|| a.ip.cmp(&b.ip))
    });
    devices
}

/// Pick the device to manage.
///
/// An absent or blank query takes the first discovered device. Otherwise the
/// query is matched against the device id, the exact friendly name, and then
/// the friendly name ignoring case.
pub fn select_device(devices: &[CastDevice], query: Option<&str>) -> Result<CastDevice, DiscoveryError> {
    let Some(first) = devices.first() else {
        return Err(DiscoveryError::NoDevices);
    };

    let normalized = query.map(str::trim).unwrap_or("");
    if normalized.is_empty() {
        return Ok(first.clone());
    }

    let id_matches: Vec<&CastDevice> = devices
        .iter()
        .filter(|d| d.id.as_deref() == Some(normalized))
        .collect();
    if let [only] = id_matches.as_slice() {
        return Ok((*only).clone());
    }

    for exact in [true, false] {
        let matches: Vec<&CastDevice> = devices
            .iter()
            .filter(|d| {
                if exact {
                    d.name == normalized
                } else {
                    d.name.eq_ignore_ascii_case(normalized)
                }
            })
            .collect();
        match matches.as_slice() {
            [] => continue,
            [only] => return Ok((*only).clone()),
            many => {
                return Err(DiscoveryError::Ambiguous {
                    query: normalized.to_string(),
                    candidates: many
                        .iter()
                        .map(|d| d.label())
                        .collect::<Vec<_>>()
                        .join(", "),
                })
            }
        }
    }

    Err(DiscoveryError::NotFound {
        query: normalized.to_string(),
        available: available_device_list(devices),
    })
}

fn available_device_list(devices: &[CastDevice]) -> String {
    devices
        .iter()
        .map(|d| match &d.id {
            Some(id) => format!("{} [id={id}]", d.name),
            None => d.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Undo avahi's `\DDD` decimal escapes (spaces arrive as `\032`).
fn unescape_avahi(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escape = bytes
            .get(i + 1..i + 4)
            .filter(|digits| bytes[i] == b'\\' && digits.iter().all(u8::is_ascii_digit));
        if let Some(digits) = escape {
            let code = digits
                .iter()
                .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'));
            if let Ok(byte) = u8::try_from(code) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_device_id(txt: &str) -> Option<String> {
    for record in parse_txt_records(txt) {
        let Some((key, value)) = record.split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("id") {
            let parsed = value.trim();
            if !parsed.is_empty() {
                return Some(parsed.to_string());
            }
        }
    }
    None
}

fn parse_txt_records(txt: &str) -> Vec<String> {
    let mut records = Vec::new();
    let mut in_quote = false;
    let mut current = String::new();

    for ch in txt.chars() {
        match ch {
            '"' if in_quote => {
                in_quote = false;
                if !current.is_empty() {
                    records.push(std::mem::take(&mut current));
                }
            }
            '"' => {
                in_quote = true;
                current.clear();
            }
            _ if in_quote => current.push(ch),
            _ => {}
        }
    }

    if records.is_empty() {
        records.extend(
            txt.split_whitespace()
                .map(|token| token.trim_matches('"').to_string())
                .filter(|token| !token.is_empty()),
        );
    }

    records
}
