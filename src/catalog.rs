//! Alert catalog: per-(category, Hebrew title) translation records fetched
//! from the alert-translation endpoint. One payload carries every language,
//! so lookups pick the configured language at read time.

use crate::fetch::{self, fetch_with_retry};
use crate::lang::LanguageCode;
use anyhow::{Context, Result};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

const CATALOG_URL: &str = "https://www.oref.org.il/alerts/alertsTranslation.json";

/// One remote record. Description strings carry a `" {0} {1},"` message
/// template prefix (placeholder for area/time) that is stripped on decode.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertTranslation {
    #[serde(deserialize_with = "deserialize_description")]
    heb: String,
    #[serde(deserialize_with = "deserialize_description")]
    eng: String,
    #[serde(deserialize_with = "deserialize_description")]
    rus: String,
    #[serde(deserialize_with = "deserialize_description")]
    arb: String,
    cat_id: u32,
    #[allow(dead_code)]
    matrix_cat_id: u32,
    heb_title: String,
    eng_title: String,
    rus_title: String,
    arb_title: String,
}

fn strip_description_template(value: &str) -> &str {
    match value.rfind("{0} {1},") {
        Some(at) => value[at + "{0} {1},".len()..].trim(),
        None => value.trim(),
    }
}

fn deserialize_description<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    String::deserialize(deserializer).map(|s| strip_description_template(&s).to_string())
}

/// Title and description texts for every supported language.
#[derive(Debug, Clone)]
struct AlertEntry {
    titles: [String; 4],
    descriptions: [String; 4],
}

fn language_index(language: LanguageCode) -> usize {
    match language {
        LanguageCode::He => 0,
        LanguageCode::En => 1,
        LanguageCode::Ru => 2,
        LanguageCode::Ar => 3,
    }
}

/// Lookup outcome; an unknown category (pure numeric code with no textual
/// variant) is distinct from an unknown title under a known category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleLookup {
    Translated { title: String, description: String },
    UnknownTitle,
    UnknownCategory,
}

type Catalog = Arc<HashMap<u32, HashMap<String, AlertEntry>>>;

pub struct AlertCatalog {
    map: RwLock<Catalog>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl AlertCatalog {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(Arc::new(HashMap::new())),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Look up the translated title/description for `(category, source
    /// title)` in `language`. Pure; never triggers a fetch.
    pub fn title_for(
        &self,
        category: u32,
        source_title: &str,
        language: LanguageCode,
    ) -> TitleLookup {
        let map = Arc::clone(&self.map.read().unwrap_or_else(|e| e.into_inner()));
        let Some(titles) = map.get(&category) else {
            return TitleLookup::UnknownCategory;
        };
        match titles.get(source_title) {
            Some(entry) => {
                let i = language_index(language);
                TitleLookup::Translated {
                    title: entry.titles[i].clone(),
                    description: entry.descriptions[i].clone(),
                }
            }
            None => TitleLookup::UnknownTitle,
        }
    }

    /// The caller-facing fallback when a title stays unresolved after a
    /// refresh: the untranslated source title, annotated.
    pub fn fallback_title(source_title: &str) -> String {
        format!("{source_title} (translation doesn't exist)")
    }

    /// Replace the whole catalog atomically. Same indefinite-retry
    /// discipline as the district cache; returns `false` only on shutdown.
    pub async fn refresh(
        &self,
        http: &HttpClient,
        timeout: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let _guard = self.refresh_lock.lock().await;
        info!("getting alert translation catalog...");
        let Some(catalog) =
            fetch_with_retry(http, CATALOG_URL, timeout, shutdown, decode_catalog).await
        else {
            return false;
        };
        info!("got translations for {} categories", catalog.len());
        *self.map.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(catalog);
        true
    }

    #[cfg(test)]
    fn install(&self, raw: &str) {
        *self.map.write().unwrap_or_else(|e| e.into_inner()) =
            Arc::new(decode_catalog(raw.as_bytes()).unwrap());
    }
}

fn decode_catalog(body: &[u8]) -> Result<HashMap<u32, HashMap<String, AlertEntry>>> {
    let text = std::str::from_utf8(fetch::strip_bom(body)).context("catalog body is not UTF-8")?;
    let rows: Vec<AlertTranslation> = serde_json::from_str(text).context("catalog JSON")?;
    let mut map: HashMap<u32, HashMap<String, AlertEntry>> = HashMap::new();
    for row in rows {
        // catId 0 marks records that aren't real alert categories.
        if row.cat_id == 0 {
            continue;
        }
        map.entry(row.cat_id).or_default().insert(
            row.heb_title.clone(),
            AlertEntry {
                titles: [row.heb_title, row.eng_title, row.rus_title, row.arb_title],
                descriptions: [row.heb, row.eng, row.rus, row.arb],
            },
        );
    }
    Ok(map)
}
