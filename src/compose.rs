//! Notification composition: turns the newly-seen districts of one poll
//! cycle into grouped operator-facing text plus an alarm-duration decision.
//! No I/O happens here; the poller prints the text and drives the sink.

use crate::audio::AlarmCue;
use crate::config::{AlarmDurationPolicy, Configuration};
use crate::districts::AreaTranslationProtectionTime;
use crate::lang::LanguageCode;
use chrono::{DateTime, FixedOffset, Local};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::time::Duration;

/// Rocket/missile fire is the one category whose per-district protection
/// time is meaningful; only it gets protection-time sub-grouping.
const ROCKET_FIRE_CATEGORY: u32 = 1;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Per-cycle facts that frame the district lists.
pub struct CycleContext<'a> {
    pub category: u32,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub content_length: u64,
    pub last_modified: DateTime<FixedOffset>,
    pub language: LanguageCode,
}

#[derive(Debug, Default)]
pub struct Notification {
    /// Operator-facing text; empty when there is nothing to show.
    pub text: String,
    pub alarm: Option<AlarmCue>,
}

pub fn compose(
    cfg: &Configuration,
    ctx: &CycleContext<'_>,
    resolved: &[AreaTranslationProtectionTime],
    untranslated: &[String],
) -> Notification {
    let alert_set: Vec<&AreaTranslationProtectionTime> = if cfg.alert_all {
        resolved.iter().collect()
    } else {
        resolved
            .iter()
            .filter(|d| cfg.districts_of_interest.contains(&d.translation))
            .collect()
    };

    let alarm = if cfg.make_sound && !alert_set.is_empty() {
        Some(alarm_cue(cfg.alarm_duration_policy, &alert_set))
    } else {
        None
    };

    let mut text = String::new();
    if cfg.display_response && !resolved.is_empty() {
        write_header(&mut text, ctx);
        write_districts(&mut text, ctx, resolved);
    }
    if !alert_set.is_empty() {
        let mut names: Vec<String> = alert_set.iter().map(|d| d.to_string()).collect();
        names.sort();
        let _ = writeln!(text, "ALERT ALERT ALERT: [{}]", names.join(", "));
    }
    if cfg.display_untranslated_districts && !untranslated.is_empty() {
        let mut raw: Vec<&str> = untranslated.iter().map(String::as_str).collect();
        raw.sort_unstable();
        let _ = writeln!(text, "Untranslated districts: [{}]", raw.join(", "));
    }

    Notification { text, alarm }
}

/// Output block for a drill/self-test payload: translated markers only,
/// never sounded or filtered.
pub fn test_alert_text(ctx: &CycleContext<'_>, markers: &[String]) -> String {
    let mut text = String::from("Test Alert\n");
    write_header(&mut text, ctx);
    let _ = writeln!(text, "Test districts: [{}]", markers.join(", "));
    text
}

fn alarm_cue(
    policy: AlarmDurationPolicy,
    alert_set: &[&AreaTranslationProtectionTime],
) -> AlarmCue {
    let times = alert_set.iter().map(|d| d.protection_time);
    let sized = match policy {
        AlarmDurationPolicy::Minimum => times.min(),
        AlarmDurationPolicy::Maximum => times.max(),
    }
    .unwrap_or(Duration::ZERO);
    if sized.as_secs() == 0 {
        AlarmCue::Once
    } else {
        AlarmCue::For(sized)
    }
}

fn write_header(out: &mut String, ctx: &CycleContext<'_>) {
    let _ = writeln!(out, "Translated title: {}", ctx.title);
    if let Some(description) = ctx.description {
        let _ = writeln!(out, "Description: {description}");
    }
    let _ = writeln!(out, "Content Length: {} bytes", ctx.content_length);
    let _ = writeln!(
        out,
        "Last Modified Date: {}",
        ctx.last_modified.with_timezone(&Local).format(DATE_FORMAT)
    );
    let _ = writeln!(out, "Current Date: {}", Local::now().format(DATE_FORMAT));
}

fn write_districts(
    out: &mut String,
    ctx: &CycleContext<'_>,
    resolved: &[AreaTranslationProtectionTime],
) {
    let _ = writeln!(out, "Translated districts:");
    if ctx.category == ROCKET_FIRE_CATEGORY {
        // area → protection-time seconds → member names, all ordered.
        let mut areas: BTreeMap<&str, BTreeMap<u64, BTreeSet<&str>>> = BTreeMap::new();
        for district in resolved {
            areas
                .entry(&district.area_name)
                .or_default()
                .entry(district.protection_time.as_secs())
                .or_default()
                .insert(&district.translation);
        }
        for (area, buckets) in areas {
            let _ = writeln!(out, "\t{area}:");
            for (secs, names) in buckets {
                let phrase = ctx.language.time_phrase(Duration::from_secs(secs));
                let names: Vec<&str> = names.into_iter().collect();
                let _ = writeln!(out, "\t\t{phrase}: {}", names.join(", "));
            }
        }
    } else {
        // Other categories carry no meaningful protection time.
        let mut areas: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for district in resolved {
            areas
                .entry(&district.area_name)
                .or_default()
                .insert(&district.translation);
        }
        for (area, names) in areas {
            let names: Vec<&str> = names.into_iter().collect();
            let _ = writeln!(out, "\t{area}: {}", names.join(", "));
        }
    }
}
