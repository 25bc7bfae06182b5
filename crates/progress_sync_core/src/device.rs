//! crates/progress_sync_core/src/device.rs
//!
//! Stable per-device identity. The identifier is generated once, persisted
//! through the `LocalStore` port, and handed to the sync engine at construction.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{DeviceInfo, DeviceType};
use crate::ports::LocalStore;

/// LocalStore key holding the generated device id.
pub const DEVICE_ID_KEY: &str = "device_id";

static TABLET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"iPad|Tablet").unwrap());
static MOBILE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Mobile|Android|iPhone").unwrap());
static IOS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"iPhone|iPad|iPod").unwrap());

// Edge and Chrome both advertise "Chrome", and Chrome advertises "Safari".
const BROWSERS: &[(&str, &str)] = &[
    ("Edg/", "Edge"),
    ("Edge", "Edge"),
    ("Chrome", "Chrome"),
    ("Firefox", "Firefox"),
    ("Safari", "Safari"),
];

#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    info: DeviceInfo,
}

impl DeviceIdentity {
    /// Loads the persisted device id or generates and persists a new one, then
    /// derives descriptive metadata from the user agent.
    pub fn load_or_create(storage: &dyn LocalStore, user_agent: &str, now: DateTime<Utc>) -> Self {
        let id = match storage.get(DEVICE_ID_KEY) {
            Some(id) if !id.is_empty() => id,
            _ => {
                let id = format!("device_{}", Uuid::new_v4().simple());
                if let Err(e) = storage.set(DEVICE_ID_KEY, &id) {
                    warn!(error = %e, "Failed to persist device id; using it for this process only.");
                }
                debug!(device_id = %id, "Generated new device id.");
                id
            }
        };
        Self::from_parts(id, user_agent, now)
    }

    /// Builds an identity for a known id without touching storage.
    pub fn from_parts(id: String, user_agent: &str, now: DateTime<Utc>) -> Self {
        let device_type = detect_device_type(user_agent);
        let browser = detect_browser(user_agent).to_string();
        let os = detect_os(user_agent).to_string();
        Self {
            info: DeviceInfo {
                name: format!("{} - {}", device_type.as_str(), browser),
                id,
                device_type,
                browser,
                os,
                last_seen: now,
                is_active: true,
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    /// The device's metadata, stamped as seen at `now`.
    pub fn current_device(&self, now: DateTime<Utc>) -> DeviceInfo {
        DeviceInfo {
            last_seen: now,
            is_active: true,
            ..self.info.clone()
        }
    }
}

pub fn detect_device_type(user_agent: &str) -> DeviceType {
    if TABLET_RE.is_match(user_agent) {
        DeviceType::Tablet
    } else if MOBILE_RE.is_match(user_agent) {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    }
}

pub fn detect_browser(user_agent: &str) -> &'static str {
    BROWSERS
        .iter()
        .find(|(needle, _)| user_agent.contains(needle))
        .map(|(_, name)| *name)
        .unwrap_or("Unknown")
}

pub fn detect_os(user_agent: &str) -> &'static str {
    if user_agent.contains("Windows") {
        "Windows"
    } else if user_agent.contains("Android") {
        "Android"
    } else if IOS_RE.is_match(user_agent) {
        "iOS"
    } else if user_agent.contains("Mac") {
        "macOS"
    } else if user_agent.contains("Linux") {
        "Linux"
    } else {
        "Unknown"
    }
}

/// Flags devices not seen within `max_idle` as inactive. Returns whether any
/// device changed.
pub fn mark_inactive(devices: &mut [DeviceInfo], now: DateTime<Utc>, max_idle: Duration) -> bool {
    let mut changed = false;
    for device in devices.iter_mut() {
        if device.is_active && now - device.last_seen > max_idle {
            device.is_active = false;
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLocalStore;

    const CHROME_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
    const EDGE_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36 Edg/120.0";
    const SAFARI_IPAD: &str = "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const CHROME_ANDROID: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Mobile Safari/537.36";

    #[test]
    fn parses_common_user_agents() {
        assert_eq!(detect_device_type(CHROME_WINDOWS), DeviceType::Desktop);
        assert_eq!(detect_browser(CHROME_WINDOWS), "Chrome");
        assert_eq!(detect_os(CHROME_WINDOWS), "Windows");

        assert_eq!(detect_browser(EDGE_WINDOWS), "Edge");

        assert_eq!(detect_device_type(SAFARI_IPAD), DeviceType::Tablet);
        assert_eq!(detect_browser(SAFARI_IPAD), "Safari");
        assert_eq!(detect_os(SAFARI_IPAD), "iOS");

        assert_eq!(detect_device_type(CHROME_ANDROID), DeviceType::Mobile);
        assert_eq!(detect_os(CHROME_ANDROID), "Android");
    }

    #[test]
    fn device_id_is_stable_across_loads() {
        let storage = MemoryLocalStore::default();
        let first = DeviceIdentity::load_or_create(&storage, CHROME_WINDOWS, Utc::now());
        let second = DeviceIdentity::load_or_create(&storage, CHROME_WINDOWS, Utc::now());
        assert!(first.id().starts_with("device_"));
        assert_eq!(first.id(), second.id());
        assert_eq!(first.current_device(Utc::now()).name, "desktop - Chrome");
    }

    #[test]
    fn stale_devices_are_marked_inactive() {
        let now = Utc::now();
        let identity = DeviceIdentity::from_parts("d1".into(), CHROME_WINDOWS, now);
        let mut devices = vec![
            identity.current_device(now - Duration::hours(30)),
            identity.current_device(now - Duration::hours(2)),
        ];
        assert!(mark_inactive(&mut devices, now, Duration::hours(24)));
        assert!(!devices[0].is_active);
        assert!(devices[1].is_active);
        assert!(!mark_inactive(&mut devices, now, Duration::hours(24)));
    }
}
