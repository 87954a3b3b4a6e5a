//! The conditional-fetch poll loop against the alert feed.
//!
//! The upstream has no push mechanism, so this is a tight loop: fetch,
//! gate on `Content-Length` + `Last-Modified`, classify, translate,
//! deduplicate, compose, repeat. Everything network-independent lives in
//! free functions so the gating and classification logic stays testable.
pub mod poller_tests;

use crate::audio::AlarmSink;
use crate::catalog::{AlertCatalog, TitleLookup};
use crate::compose::{self, CycleContext};
use crate::config::{ConfigStore, Reload};
use crate::dedup::DedupTracker;
use crate::districts::{DistrictCache, Resolution};
use crate::fetch::RETRY_BACKOFF;
use crate::lang::{self, LanguageCode};
use crate::logging::LogHandle;
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use flate2::read::GzDecoder;
use reqwest::Client as HttpClient;
use reqwest::header::{ACCEPT, CONTENT_ENCODING, LAST_MODIFIED, REFERER};
use serde::Deserialize;
use std::io::Read;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, warn};

const ALERTS_URL: &str = "https://www.oref.org.il/WarningMessages/alert/alerts.json";

/// The JSON shape of an empty event; a response at or under this size means
/// "no active alert".
const EMPTY_EVENT: &str = r#"{"cat":"1","data":[],"desc":"","id":0,"title":""}"#;
pub const MIN_EVENT_CONTENT_LENGTH: u64 = EMPTY_EVENT.len() as u64;

/// One polled payload. Never mutated after parse.
#[derive(Debug, Clone, Deserialize)]
pub struct RedAlertEvent {
    #[serde(rename = "cat", deserialize_with = "deserialize_category")]
    pub category: u32,
    pub data: Vec<String>,
    #[serde(rename = "desc")]
    pub description: String,
    pub id: u64,
    pub title: String,
}

/// The feed flip-flops between `"cat":"1"` and `"cat":1`.
fn deserialize_category<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Outcome of the cheap header check that decides whether the body is worth
/// parsing at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Below-threshold payload: no active event, dedup state is dropped.
    Quiet,
    /// Payload already processed (or unusable headers): touch nothing.
    Stale,
    /// Genuinely new payload stamped with this `Last-Modified`.
    Process(DateTime<FixedOffset>),
}

/// A payload is processed iff its length exceeds the minimal well-formed
/// size AND its timestamp strictly advances past everything seen so far.
pub fn gate(
    content_length: Option<u64>,
    last_modified: Option<DateTime<FixedOffset>>,
    newest_processed: Option<DateTime<FixedOffset>>,
) -> Gate {
    match content_length {
        Some(length) if length > MIN_EVENT_CONTENT_LENGTH => match last_modified {
            Some(stamp) if newest_processed.is_none_or(|newest| stamp > newest) => {
                Gate::Process(stamp)
            }
            _ => Gate::Stale,
        },
        _ => Gate::Quiet,
    }
}

/// A payload whose every key is a drill marker is a self-test: translated
/// and optionally printed, never deduplicated, sounded, or filtered.
pub fn is_test_event(event: &RedAlertEvent) -> bool {
    event.data.iter().all(|key| lang::is_test_key(key))
}

/// Inflate (when transport-compressed), strip the BOM, parse.
pub fn decode_event(body: &[u8], gzipped: bool) -> Result<RedAlertEvent> {
    let inflated;
    let body = if gzipped {
        inflated = {
            let mut out = Vec::new();
            GzDecoder::new(body)
                .read_to_end(&mut out)
                .context("inflating alert payload")?;
            out
        };
        &inflated[..]
    } else {
        body
    };
    serde_json::from_slice(crate::fetch::strip_bom(body)).context("alert JSON")
}

/// Connection-reuse teardown from the server side is routine with a feed
/// polled this often; it is retried immediately and quietly.
fn is_connection_teardown(error: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(e) = source {
        let text = e.to_string();
        if text.contains("IncompleteMessage") || text.contains("connection closed before message completed")
        {
            return true;
        }
        source = e.source();
    }
    false
}

pub struct Poller {
    pub http: HttpClient,
    pub config: Arc<ConfigStore>,
    pub districts: Arc<DistrictCache>,
    pub catalog: Arc<AlertCatalog>,
    pub alarm: Arc<dyn AlarmSink>,
    pub log: LogHandle,
    pub shutdown: watch::Receiver<bool>,
}

impl Poller {
    pub async fn run(mut self) {
        let mut dedup = DedupTracker::new();
        let mut newest_processed: Option<DateTime<FixedOffset>> = None;

        eprintln!("Listening...");
        while !*self.shutdown.borrow() {
            self.reload_configuration().await;
            let cfg = self.config.get();

            let response = match self
                .http
                .get(ALERTS_URL)
                .header(ACCEPT, "application/json")
                .header("X-Requested-With", "XMLHttpRequest")
                .header(
                    REFERER,
                    format!(
                        "https://www.oref.org.il/12481-{}/Pakar.aspx",
                        cfg.language_code.tag()
                    ),
                )
                .timeout(cfg.timeout())
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) if is_connection_teardown(&e) => {
                    debug!("server tore down the connection, retrying: {e}");
                    continue;
                }
                Err(e) => {
                    debug!("got exception: {e}");
                    self.backoff().await;
                    continue;
                }
            };

            if !response.status().is_success() {
                error!("connection response status code: {}", response.status());
                self.backoff().await;
                continue;
            }

            let content_length = response.content_length();
            let last_modified = response
                .headers()
                .get(LAST_MODIFIED)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| DateTime::parse_from_rfc2822(s).ok());

            match gate(content_length, last_modified, newest_processed) {
                Gate::Quiet => dedup.clear(),
                Gate::Stale => {}
                Gate::Process(stamp) => {
                    // The gate only ever moves forward, even when the body
                    // turns out to be malformed.
                    newest_processed = Some(stamp);
                    let gzipped = response
                        .headers()
                        .get(CONTENT_ENCODING)
                        .and_then(|v| v.to_str().ok())
                        .is_some_and(|v| v.contains("gzip"));
                    let body = match response.bytes().await {
                        Ok(body) => body,
                        Err(e) => {
                            debug!("got exception reading body: {e}");
                            self.backoff().await;
                            continue;
                        }
                    };
                    match decode_event(&body, gzipped) {
                        Ok(event) => {
                            self.process_event(
                                &mut dedup,
                                event,
                                content_length.unwrap_or_default(),
                                stamp,
                            )
                            .await
                        }
                        // Transport succeeded, so no backoff: next poll may
                        // already carry a well-formed payload.
                        Err(e) => error!("JSON parsing error: {e:#}"),
                    }
                }
            }
        }
    }

    async fn process_event(
        &mut self,
        dedup: &mut DedupTracker,
        event: RedAlertEvent,
        content_length: u64,
        stamp: DateTime<FixedOffset>,
    ) {
        let cfg = self.config.get();
        debug!("original event data: {event:?}");

        if is_test_event(&event) {
            if cfg.show_test_alerts {
                let (title, description) =
                    self.peek_title(event.category, &event.title, cfg.language_code);
                let markers: Vec<String> = event
                    .data
                    .iter()
                    .map(|key| {
                        cfg.language_code
                            .test_translation(key)
                            .map(str::to_string)
                            .unwrap_or_else(|| key.clone())
                    })
                    .collect();
                let ctx = CycleContext {
                    category: event.category,
                    title: &title,
                    description: description.as_deref(),
                    content_length,
                    last_modified: stamp,
                    language: cfg.language_code,
                };
                println!("{}", compose::test_alert_text(&ctx, &markers));
            }
            return;
        }

        let unseen = dedup.filter_unseen(event.category, &event.title, &event.data);
        if unseen.is_empty() {
            return;
        }

        let (resolved, untranslated) = self.resolve_districts(&cfg, &unseen).await;
        let (title, description) = self
            .resolve_title(event.category, &event.title, cfg.language_code, &cfg)
            .await;

        let ctx = CycleContext {
            category: event.category,
            title: &title,
            description: description.as_deref(),
            content_length,
            last_modified: stamp,
            language: cfg.language_code,
        };
        let notification = compose::compose(&cfg, &ctx, &resolved, &untranslated);
        if !notification.text.is_empty() {
            println!("{}", notification.text);
        }
        if let Some(cue) = notification.alarm {
            self.alarm.play(cue);
        }

        dedup.record(event.category, &event.title, &event.data);

        let unknown = self
            .districts
            .unknown_districts_of_interest(&cfg.districts_of_interest);
        if !unknown.is_empty() {
            warn!("those districts don't exist: {unknown:?}");
        }
    }

    /// Resolve raw keys through the district cache; unknown keys trigger one
    /// rate-limited refresh and a single retry before being reported raw.
    async fn resolve_districts(
        &mut self,
        cfg: &crate::config::Configuration,
        raw_keys: &[String],
    ) -> (
        Vec<crate::districts::AreaTranslationProtectionTime>,
        Vec<String>,
    ) {
        let mut resolved = Vec::with_capacity(raw_keys.len());
        let mut missing = Vec::new();
        for key in raw_keys {
            match self.districts.resolve(key) {
                Resolution::Resolved(district) => resolved.push(district),
                Resolution::Missing { raw_key } => missing.push(raw_key),
            }
        }
        if missing.is_empty() {
            return (resolved, missing);
        }

        let refreshed = self
            .districts
            .refresh_on_miss(
                &self.http,
                cfg.language_code,
                cfg.timeout(),
                &mut self.shutdown,
            )
            .await;
        if refreshed {
            let mut still_missing = Vec::new();
            for key in missing {
                match self.districts.resolve(&key) {
                    Resolution::Resolved(district) => resolved.push(district),
                    Resolution::Missing { raw_key } => still_missing.push(raw_key),
                }
            }
            if !still_missing.is_empty() {
                warn!("districts still untranslated after refreshment: {still_missing:?}");
            }
            missing = still_missing;
        }
        (resolved, missing)
    }

    /// Catalog lookup without any side effect, for test payloads.
    fn peek_title(
        &self,
        category: u32,
        source_title: &str,
        language: LanguageCode,
    ) -> (String, Option<String>) {
        match self.catalog.title_for(category, source_title, language) {
            TitleLookup::Translated { title, description } => (title, Some(description)),
            _ => (source_title.to_string(), None),
        }
    }

    /// Catalog lookup with the refresh-and-retry-once discipline: a miss
    /// here means a previously-unseen alert wording, so one synchronous
    /// refresh is worth the latency. Unresolved titles fall back to the
    /// annotated source title.
    async fn resolve_title(
        &mut self,
        category: u32,
        source_title: &str,
        language: LanguageCode,
        cfg: &crate::config::Configuration,
    ) -> (String, Option<String>) {
        match self.catalog.title_for(category, source_title, language) {
            TitleLookup::Translated { title, description } => return (title, Some(description)),
            lookup => debug!("title lookup miss ({lookup:?}), refreshing alert catalog"),
        }
        self.catalog
            .refresh(&self.http, cfg.timeout(), &mut self.shutdown)
            .await;
        match self.catalog.title_for(category, source_title, language) {
            TitleLookup::Translated { title, description } => (title, Some(description)),
            _ => (AlertCatalog::fallback_title(source_title), None),
        }
    }

    /// Apply the once-per-iteration configuration check; a language change
    /// rebuilds the district cache before the next event is resolved.
    async fn reload_configuration(&mut self) {
        if let Reload::Updated { language_changed } = self.config.poll() {
            let cfg = self.config.get();
            self.log.set(cfg.log_level.to_filter());
            if language_changed {
                self.districts
                    .refresh(
                        &self.http,
                        cfg.language_code,
                        cfg.timeout(),
                        &mut self.shutdown,
                    )
                    .await;
            }
            let unknown = self
                .districts
                .unknown_districts_of_interest(&cfg.districts_of_interest);
            if !unknown.is_empty() {
                warn!("those districts don't exist: {unknown:?}");
            }
        }
    }

    async fn backoff(&mut self) {
        tokio::select! {
            _ = tokio::time::sleep(RETRY_BACKOFF) => {}
            _ = self.shutdown.changed() => {}
        }
    }
}
