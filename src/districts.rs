//! District translation cache: raw Hebrew area key → translated label,
//! area name and protection time, refreshed wholesale from Home Front
//! Command's district directory.
//!
//! The map is replaced atomically on refresh so readers never observe a
//! half-built snapshot, and every snapshot is built under a single language.

use crate::fetch::{self, fetch_with_retry};
use crate::lang::LanguageCode;
use anyhow::{Context, Result};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Deserializer};
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

const DISTRICTS_URL: &str = "https://www.oref.org.il/Shared/Ajax/GetDistricts.aspx";

/// On-demand refreshes (triggered by an unresolvable key mid-event) are
/// allowed at most once per rolling hour; a genuinely unknown key must not
/// hammer the directory on every poll of a busy alert.
const ON_DEMAND_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Protection times the directory actually hands out. Anything else is
/// accepted but logged, since it usually means the upstream data changed.
const COMMON_PROTECTION_TIMES: [u64; 7] = [0, 15, 30, 45, 60, 90, 180];

pub fn protection_time(seconds: u64) -> Duration {
    if !COMMON_PROTECTION_TIMES.contains(&seconds) {
        debug!("got uncommon protection time of {seconds} seconds");
    }
    Duration::from_secs(seconds)
}

fn deserialize_protection_time<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(protection_time)
}

/// One row of the remote district directory.
#[derive(Debug, Clone, Deserialize)]
pub struct District {
    pub label: String,
    #[allow(dead_code)]
    pub value: String,
    #[allow(dead_code)]
    pub id: i64,
    #[serde(rename = "areaid")]
    #[allow(dead_code)]
    pub area_id: i64,
    #[serde(rename = "areaname")]
    pub area_name: String,
    #[serde(rename = "label_he")]
    pub hebrew_label: String,
    #[serde(rename = "migun_time", deserialize_with = "deserialize_protection_time")]
    pub protection_time: Duration,
}

/// A resolved district. Two values with the same translated label are the
/// same district for dedup and interest-filter purposes, so equality and
/// hashing go by `translation` alone.
#[derive(Debug, Clone)]
pub struct AreaTranslationProtectionTime {
    pub area_name: String,
    pub translation: String,
    pub protection_time: Duration,
}

impl PartialEq for AreaTranslationProtectionTime {
    fn eq(&self, other: &Self) -> bool {
        self.translation == other.translation
    }
}

impl Eq for AreaTranslationProtectionTime {}

impl Hash for AreaTranslationProtectionTime {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.translation.hash(state);
    }
}

impl std::fmt::Display for AreaTranslationProtectionTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} seconds",
            self.translation,
            self.protection_time.as_secs()
        )
    }
}

/// Total result of a lookup: either a translation or an explicit "we don't
/// know this key" value. Never an `Option`, never a panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(AreaTranslationProtectionTime),
    Missing { raw_key: String },
}

type Snapshot = Arc<HashMap<String, AreaTranslationProtectionTime>>;

pub struct DistrictCache {
    map: RwLock<Snapshot>,
    /// Serializes refreshes; readers never take it.
    refresh_lock: tokio::sync::Mutex<()>,
    last_refresh: Mutex<Option<Instant>>,
    last_on_demand: Mutex<Option<Instant>>,
}

impl DistrictCache {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(Arc::new(HashMap::new())),
            refresh_lock: tokio::sync::Mutex::new(()),
            last_refresh: Mutex::new(None),
            last_on_demand: Mutex::new(None),
        }
    }

    /// Pure lookup against the current snapshot.
    pub fn resolve(&self, raw_key: &str) -> Resolution {
        match self.snapshot().get(raw_key) {
            Some(district) => Resolution::Resolved(district.clone()),
            None => Resolution::Missing {
                raw_key: raw_key.to_string(),
            },
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.map.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn last_refresh(&self) -> Option<Instant> {
        *self.last_refresh.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fetch the directory for `language` and swap the whole map in one go.
    /// Retries indefinitely; returns `false` only on shutdown.
    pub async fn refresh(
        &self,
        http: &HttpClient,
        language: LanguageCode,
        timeout: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let _guard = self.refresh_lock.lock().await;
        info!("getting remote districts (language {})...", language.tag());
        let url = format!("{DISTRICTS_URL}?lang={}", language.tag());
        let Some(districts) =
            fetch_with_retry(http, &url, timeout, shutdown, decode_districts).await
        else {
            return false;
        };
        info!("got {} districts", districts.len());
        *self.map.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(districts);
        *self.last_refresh.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        true
    }

    /// Rate-limited variant used when an event contains an unknown key.
    /// Returns `true` when a refresh actually happened (so the caller should
    /// retry its lookup exactly once).
    pub async fn refresh_on_miss(
        &self,
        http: &HttpClient,
        language: LanguageCode,
        timeout: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        {
            let last = self
                .last_on_demand
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(at) = *last {
                if at.elapsed() < ON_DEMAND_REFRESH_INTERVAL {
                    debug!("skipping on-demand district refresh (rate limited)");
                    return false;
                }
            }
        }
        warn!("at least one district couldn't be translated, refreshing districts from server...");
        if !self.refresh(http, language, timeout, shutdown).await {
            return false;
        }
        *self
            .last_on_demand
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        true
    }

    /// Districts of interest the current snapshot doesn't know about, for
    /// the startup/reload warning.
    pub fn unknown_districts_of_interest(&self, interest: &HashSet<String>) -> Vec<String> {
        let snapshot = self.snapshot();
        let known: HashSet<&str> = snapshot
            .values()
            .map(|d| d.translation.as_str())
            .collect();
        let mut unknown: Vec<String> = interest
            .iter()
            .filter(|name| !known.contains(name.as_str()))
            .cloned()
            .collect();
        unknown.sort();
        unknown
    }

    #[cfg(test)]
    pub fn install(&self, districts: HashMap<String, AreaTranslationProtectionTime>) {
        *self.map.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(districts);
    }
}

fn decode_districts(body: &[u8]) -> Result<HashMap<String, AreaTranslationProtectionTime>> {
    let text = std::str::from_utf8(fetch::strip_bom(body)).context("district body is not UTF-8")?;
    let rows: Vec<District> =
        serde_json::from_str(fetch::strip_assignment_prefix(text)).context("district JSON")?;
    let mut map = HashMap::with_capacity(rows.len());
    for row in rows {
        let previous = map.insert(
            row.hebrew_label,
            AreaTranslationProtectionTime {
                area_name: row.area_name,
                translation: row.label,
                protection_time: row.protection_time,
            },
        );
        if let Some(previous) = previous {
            trace!("duplicate district key, keeping later row over {previous}");
        }
    }
    Ok(map)
}
