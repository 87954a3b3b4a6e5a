//! Operator configuration: an immutable snapshot hot-reloaded from a JSON
//! file by comparing its modification time once per poll iteration.
//!
//! Reload is all-or-nothing: a file that fails to parse leaves the previous
//! snapshot in effect, and a file that disappears falls back to the built-in
//! defaults without erroring.

use crate::lang::LanguageCode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;

pub const DEFAULT_CONFIG_PATH: &str = "red-alert-listener.conf.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Which protection time across the alert set sizes the alarm. The shipped
/// client flip-flopped between the two over its history; `Minimum` (shortest
/// time to shelter, i.e. most urgent) is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmDurationPolicy {
    #[default]
    Minimum,
    Maximum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Configuration {
    pub make_sound: bool,
    pub alert_all: bool,
    pub display_response: bool,
    pub display_untranslated_districts: bool,
    pub show_test_alerts: bool,
    /// Outbound request timeout in milliseconds.
    pub timeout: u64,
    pub language_code: LanguageCode,
    pub log_level: LogLevel,
    pub alarm_duration_policy: AlarmDurationPolicy,
    pub districts_of_interest: HashSet<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            make_sound: false,
            alert_all: false,
            display_response: true,
            display_untranslated_districts: true,
            show_test_alerts: false,
            timeout: 10_000,
            language_code: LanguageCode::He,
            log_level: LogLevel::Info,
            alarm_duration_policy: AlarmDurationPolicy::default(),
            districts_of_interest: HashSet::new(),
        }
    }
}

impl Configuration {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

/// Outcome of one reload check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reload {
    Unchanged,
    Updated { language_changed: bool },
}

struct WatchState {
    /// Modification time of the file the current snapshot came from;
    /// `None` when the file was absent and defaults are in effect.
    last_modified: Option<SystemTime>,
    /// Forces the next `poll()` to re-read regardless of mtime.
    force: bool,
}

/// Shared configuration store: read by every component, replaced wholesale
/// by the reload check. Readers clone the `Arc` and never block writers.
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Arc<Configuration>>,
    state: Mutex<WatchState>,
}

impl ConfigStore {
    /// Load the initial snapshot. A missing file is fine (defaults); an
    /// unreadable or malformed file at startup is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (configuration, last_modified) = match mtime(&path) {
            Some(modified) => (read_configuration(&path)?, Some(modified)),
            None => {
                warn!(
                    "couldn't find \"{}\", using default configuration",
                    path.display()
                );
                (Configuration::default(), None)
            }
        };
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(configuration)),
            state: Mutex::new(WatchState {
                last_modified,
                force: false,
            }),
        })
    }

    /// Current snapshot; cheap, never blocks on a reload in progress.
    pub fn get(&self) -> Arc<Configuration> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Make the next `poll()` re-read the file even if its mtime is stale.
    pub fn mark_dirty(&self) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).force = true;
    }

    /// The once-per-iteration reload check.
    pub fn poll(&self) -> Reload {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let force = std::mem::take(&mut state.force);
        match mtime(&self.path) {
            Some(modified) if force || Some(modified) > state.last_modified => {
                info!("(re)loading configuration from \"{}\"", self.path.display());
                match read_configuration(&self.path) {
                    Ok(configuration) => {
                        state.last_modified = Some(modified);
                        self.replace(configuration)
                    }
                    Err(e) => {
                        // All-or-nothing: keep the previous snapshot.
                        warn!("configuration reload failed, keeping previous: {e:#}");
                        state.last_modified = Some(modified);
                        Reload::Unchanged
                    }
                }
            }
            None if state.last_modified.is_some() => {
                warn!(
                    "couldn't find \"{}\", using default configuration",
                    self.path.display()
                );
                state.last_modified = None;
                self.replace(Configuration::default())
            }
            _ => Reload::Unchanged,
        }
    }

    fn replace(&self, configuration: Configuration) -> Reload {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let language_changed = current.language_code != configuration.language_code;
        *current = Arc::new(configuration);
        Reload::Updated { language_changed }
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn read_configuration(path: &Path) -> Result<Configuration> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let cfg: Configuration = serde_json::from_str("{}").unwrap();
        assert!(!cfg.make_sound);
        assert!(cfg.display_response);
        assert_eq!(cfg.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.language_code, LanguageCode::He);
        assert_eq!(cfg.alarm_duration_policy, AlarmDurationPolicy::Minimum);
        assert!(cfg.districts_of_interest.is_empty());
    }

    #[test]
    fn camel_case_fields_parse() {
        let cfg: Configuration = serde_json::from_str(
            r#"{
                "makeSound": true,
                "alertAll": true,
                "showTestAlerts": true,
                "timeout": 5000,
                "languageCode": "EN",
                "logLevel": "DEBUG",
                "alarmDurationPolicy": "maximum",
                "districtsOfInterest": ["Area A", "Area B"]
            }"#,
        )
        .unwrap();
        assert!(cfg.make_sound && cfg.alert_all && cfg.show_test_alerts);
        assert_eq!(cfg.timeout(), Duration::from_secs(5));
        assert_eq!(cfg.language_code, LanguageCode::En);
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert_eq!(cfg.alarm_duration_policy, AlarmDurationPolicy::Maximum);
        assert_eq!(cfg.districts_of_interest.len(), 2);
    }

    #[test]
    fn malformed_reload_keeps_previous_snapshot() {
        let dir = std::env::temp_dir().join("red-alert-listener-cfg-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("keeps-previous.conf.json");
        std::fs::write(&path, r#"{"makeSound": true}"#).unwrap();

        let store = ConfigStore::load(&path).unwrap();
        assert!(store.get().make_sound);

        std::fs::write(&path, "{not json").unwrap();
        store.mark_dirty();
        assert_eq!(store.poll(), Reload::Unchanged);
        assert!(store.get().make_sound, "previous snapshot must survive");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join("red-alert-listener-cfg-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("falls-back.conf.json");
        std::fs::write(&path, r#"{"makeSound": true, "languageCode": "EN"}"#).unwrap();

        let store = ConfigStore::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let reload = store.poll();
        assert_eq!(
            reload,
            Reload::Updated {
                language_changed: true
            }
        );
        assert!(!store.get().make_sound);
    }

    #[test]
    fn language_change_is_reported() {
        let dir = std::env::temp_dir().join("red-alert-listener-cfg-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("language-change.conf.json");
        std::fs::write(&path, r#"{"languageCode": "HE"}"#).unwrap();

        let store = ConfigStore::load(&path).unwrap();
        std::fs::write(&path, r#"{"languageCode": "EN"}"#).unwrap();
        store.mark_dirty();
        assert_eq!(
            store.poll(),
            Reload::Updated {
                language_changed: true
            }
        );

        std::fs::remove_file(&path).ok();
    }
}
