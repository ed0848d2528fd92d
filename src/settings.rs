// src/settings.rs
//
// Persistent operator settings (settings.json).
// Missing or unreadable files are replaced with defaults; missing keys are
// filled in from defaults and written back.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::MonitorError;

/// What to do when the port of the open session disappears from the system.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnplugPolicy {
    /// Close the session and tell the operator
    #[default]
    Close,
    /// Only tell the operator; the session stays open until it faults or is closed
    Warn,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppSettings {
    #[serde(default = "default_baud_rate")]
    pub default_baud_rate: u32,
    #[serde(default = "default_available_baud_rates")]
    pub available_baud_rates: Vec<u32>,
    #[serde(default)]
    pub default_serial_port: String,
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_port_poll_interval_ms")]
    pub port_poll_interval_ms: u64,
    #[serde(default)]
    pub unplug_policy: UnplugPolicy,
}

fn default_baud_rate() -> u32 {
    1_000_000
}
fn default_available_baud_rates() -> Vec<u32> {
    vec![9600, 19200, 38400, 57600, 115200, 1_000_000, 2_000_000]
}
fn default_log_retention_days() -> u32 {
    3
}
fn default_read_timeout_ms() -> u64 {
    100
}
fn default_port_poll_interval_ms() -> u64 {
    1000
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            default_baud_rate: default_baud_rate(),
            available_baud_rates: default_available_baud_rates(),
            default_serial_port: String::new(),
            log_retention_days: default_log_retention_days(),
            read_timeout_ms: default_read_timeout_ms(),
            port_poll_interval_ms: default_port_poll_interval_ms(),
            unplug_policy: UnplugPolicy::default(),
        }
    }
}

impl AppSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn port_poll_interval(&self) -> Duration {
        Duration::from_millis(self.port_poll_interval_ms.max(10))
    }

    /// The remembered port, if one has been chosen before.
    pub fn remembered_port(&self) -> Option<&str> {
        Some(self.default_serial_port.as_str()).filter(|p| !p.is_empty())
    }
}

/// Default location: `<config dir>/serialtap/settings.json`.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("serialtap")
        .join("settings.json")
}

/// Default log directory: `<local data dir>/serialtap/logs`.
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("serialtap")
        .join("logs")
}

/// Settings bound to the file they were loaded from.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    settings: AppSettings,
}

impl SettingsStore {
    /// Load settings from `path`, creating the file with defaults when it is
    /// missing or unparseable.
    pub fn load(path: &Path) -> Result<Self, MonitorError> {
        let settings = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<serde_json::Value>(&content) {
                Ok(raw) => {
                    let parsed: Result<AppSettings, MonitorError> =
                        serde_json::from_value(raw.clone()).map_err(|e| {
                            MonitorError::Settings(format!("Failed to parse settings: {}", e))
                        });
                    match parsed {
                        Ok(settings) => {
                            if missing_keys(&raw, &settings) {
                                tlog!("[settings] Filling missing keys in {}", path.display());
                                write_settings(path, &settings)?;
                            }
                            settings
                        }
                        Err(e) => {
                            tlog!("[settings] {}; using defaults", e);
                            reset_to_defaults(path)?
                        }
                    }
                }
                Err(e) => {
                    tlog!("[settings] {} is not valid JSON ({}); using defaults", path.display(), e);
                    reset_to_defaults(path)?
                }
            },
            Err(_) => {
                tlog!("[settings] {} not found; creating defaults", path.display());
                reset_to_defaults(path)?
            }
        };

        Ok(SettingsStore {
            path: path.to_path_buf(),
            settings,
        })
    }

    /// In-memory store that is never written. Used when no settings file is wanted.
    pub fn ephemeral(settings: AppSettings) -> Self {
        SettingsStore {
            path: PathBuf::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `update` and persist the result.
    pub fn save_setting(&mut self, update: impl FnOnce(&mut AppSettings)) -> Result<(), MonitorError> {
        update(&mut self.settings);
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        write_settings(&self.path, &self.settings)
    }
}

fn reset_to_defaults(path: &Path) -> Result<AppSettings, MonitorError> {
    let settings = AppSettings::default();
    write_settings(path, &settings)?;
    Ok(settings)
}

/// True when the stored JSON lacks any field the current settings carry.
fn missing_keys(raw: &serde_json::Value, settings: &AppSettings) -> bool {
    let (Some(stored), Ok(serde_json::Value::Object(full))) =
        (raw.as_object(), serde_json::to_value(settings))
    else {
        return false;
    };
    full.keys().any(|k| !stored.contains_key(k))
}

fn write_settings(path: &Path, settings: &AppSettings) -> Result<(), MonitorError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .map_err(|e| MonitorError::Settings(format!("Failed to create settings dir: {}", e)))?;
    }

    let content = serde_json::to_string_pretty(settings)
        .map_err(|e| MonitorError::Settings(format!("Failed to serialize settings: {}", e)))?;

    std::fs::write(path, content)
        .map_err(|e| MonitorError::Settings(format!("Failed to write settings: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = AppSettings::default();
        assert_eq!(settings.default_baud_rate, 1_000_000);
        assert!(settings.available_baud_rates.contains(&2_000_000));
        assert_eq!(settings.log_retention_days, 3);
        assert_eq!(settings.unplug_policy, UnplugPolicy::Close);
        assert!(settings.remembered_port().is_none());
    }

    #[test]
    fn test_missing_file_creates_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let store = SettingsStore::load(&path).unwrap();
        assert_eq!(store.settings(), &AppSettings::default());
        assert!(path.exists());
    }

    #[test]
    fn test_invalid_json_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = SettingsStore::load(&path).unwrap();
        assert_eq!(store.settings(), &AppSettings::default());
        let rewritten: AppSettings =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rewritten, AppSettings::default());
    }

    #[test]
    fn test_missing_keys_are_filled_and_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "default_serial_port": "COM7", "unplug_policy": "warn" }"#).unwrap();

        let store = SettingsStore::load(&path).unwrap();
        assert_eq!(store.settings().remembered_port(), Some("COM7"));
        assert_eq!(store.settings().unplug_policy, UnplugPolicy::Warn);
        assert_eq!(store.settings().default_baud_rate, 1_000_000);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["log_retention_days"], 3);
        assert_eq!(raw["default_serial_port"], "COM7");
    }

    #[test]
    fn test_save_setting_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut store = SettingsStore::load(&path).unwrap();

        store
            .save_setting(|s| s.default_serial_port = "/dev/ttyACM0".to_string())
            .unwrap();

        let reloaded = SettingsStore::load(&path).unwrap();
        assert_eq!(reloaded.settings().remembered_port(), Some("/dev/ttyACM0"));
    }

    #[test]
    fn test_ephemeral_store_does_not_write() {
        let mut store = SettingsStore::ephemeral(AppSettings::default());
        store.save_setting(|s| s.default_baud_rate = 9600).unwrap();
        assert_eq!(store.settings().default_baud_rate, 9600);
    }
}
