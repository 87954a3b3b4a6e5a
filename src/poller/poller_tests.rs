// ─────────────────────────────── Tests ───────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::compose::{self, CycleContext};
    use crate::config::Configuration;
    use crate::dedup::DedupTracker;
    use crate::districts::{AreaTranslationProtectionTime, DistrictCache, Resolution};
    use crate::lang::LanguageCode;
    use crate::poller::{Gate, MIN_EVENT_CONTENT_LENGTH, decode_event, gate, is_test_event};
    use chrono::{DateTime, FixedOffset};
    use std::collections::HashMap;
    use std::time::Duration;

    fn stamp(rfc1123: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc2822(rfc1123).unwrap()
    }

    fn event(json: &str) -> crate::poller::RedAlertEvent {
        decode_event(json.as_bytes(), false).unwrap()
    }

    // ── Gating ──

    #[test]
    fn gating_is_monotonic_over_a_poll_sequence() {
        let t1 = stamp("Sun, 06 Nov 2022 08:49:37 GMT");
        let t2 = stamp("Sun, 06 Nov 2022 08:49:52 GMT");
        let big = MIN_EVENT_CONTENT_LENGTH + 100;
        let mut newest = None;

        // First well-formed payload processes.
        let Gate::Process(s) = gate(Some(big), Some(t1), newest) else {
            panic!("first payload must process");
        };
        newest = Some(s);

        // Same timestamp repeated: stale, state untouched.
        assert_eq!(gate(Some(big), Some(t1), newest), Gate::Stale);

        // Strictly newer timestamp processes again.
        let Gate::Process(s) = gate(Some(big), Some(t2), newest) else {
            panic!("advancing payload must process");
        };
        newest = Some(s);

        // Older timestamp can never reappear as new.
        assert_eq!(gate(Some(big), Some(t1), newest), Gate::Stale);
    }

    #[test]
    fn content_length_at_or_under_threshold_is_quiet() {
        let t = stamp("Sun, 06 Nov 2022 08:49:37 GMT");
        assert_eq!(gate(Some(MIN_EVENT_CONTENT_LENGTH), Some(t), None), Gate::Quiet);
        assert_eq!(gate(Some(0), Some(t), None), Gate::Quiet);
        assert_eq!(gate(None, Some(t), None), Gate::Quiet);
    }

    #[test]
    fn missing_last_modified_is_stale_not_quiet() {
        // A long body without a usable timestamp must not clear dedup state.
        assert_eq!(gate(Some(MIN_EVENT_CONTENT_LENGTH + 1), None, None), Gate::Stale);
    }

    // ── Payload decoding ──

    #[test]
    fn category_decodes_from_both_number_and_string() {
        let as_number = event(r#"{"cat":1,"data":[],"desc":"","id":5,"title":"t"}"#);
        let as_string = event(r#"{"cat":"1","data":[],"desc":"","id":5,"title":"t"}"#);
        assert_eq!(as_number.category, 1);
        assert_eq!(as_string.category, 1);
    }

    #[test]
    fn bom_prefixed_body_decodes() {
        let body = "\u{feff}{\"cat\":1,\"data\":[],\"desc\":\"\",\"id\":0,\"title\":\"\"}";
        assert_eq!(decode_event(body.as_bytes(), false).unwrap().category, 1);
    }

    #[test]
    fn gzipped_body_decodes() {
        use flate2::{Compression, write::GzEncoder};
        use std::io::Write;

        let json = r#"{"cat":"1","data":["אזור א"],"desc":"d","id":7,"title":"t"}"#;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let decoded = decode_event(&compressed, true).unwrap();
        assert_eq!(decoded.data, ["אזור א"]);
        assert_eq!(decoded.id, 7);
    }

    #[test]
    fn malformed_json_is_an_error_not_a_panic() {
        assert!(decode_event(b"{not json", false).is_err());
    }

    // ── Classification ──

    #[test]
    fn all_drill_markers_classify_as_test() {
        let drill = event(
            r#"{"cat":1,"data":["בדיקה","בדיקה מחזורית"],"desc":"","id":1,"title":"בדיקה"}"#,
        );
        assert!(is_test_event(&drill));
    }

    #[test]
    fn mixed_drill_and_real_keys_are_a_real_alert() {
        let mixed = event(r#"{"cat":1,"data":["בדיקה","אזור א"],"desc":"","id":1,"title":"t"}"#);
        assert!(!is_test_event(&mixed));
    }

    #[test]
    fn test_alert_bypasses_dedup_and_sound_even_with_alert_all() {
        // The classification alone guards the test path: a drill payload is
        // never handed to the dedup tracker or the composer, so alertAll
        // cannot make it sound.
        let drill = event(r#"{"cat":1,"data":["בדיקה"],"desc":"","id":1,"title":"בדיקה"}"#);
        assert!(is_test_event(&drill));
    }

    // ── End to end (no network): dedup → resolve → compose ──

    fn center_districts() -> DistrictCache {
        let cache = DistrictCache::new();
        cache.install(HashMap::from([
            (
                "אזור א".to_string(),
                AreaTranslationProtectionTime {
                    area_name: "מרכז".to_string(),
                    translation: "Area A".to_string(),
                    protection_time: Duration::from_secs(15),
                },
            ),
            (
                "אזור ב".to_string(),
                AreaTranslationProtectionTime {
                    area_name: "מרכז".to_string(),
                    translation: "Area B".to_string(),
                    protection_time: Duration::from_secs(15),
                },
            ),
        ]));
        cache
    }

    #[test]
    fn rocket_fire_scenario_alerts_interest_district_once() {
        let cache = center_districts();
        let mut dedup = DedupTracker::new();
        let cfg = Configuration {
            make_sound: true,
            districts_of_interest: ["Area A".to_string()].into_iter().collect(),
            ..Configuration::default()
        };

        let alert = event(
            r#"{"cat":1,"data":["אזור א","אזור ב"],"desc":"ירי רקטות","id":5,"title":"ירי רקטות וטילים"}"#,
        );

        // First poll: both districts are unseen and resolve cleanly.
        let unseen = dedup.filter_unseen(alert.category, &alert.title, &alert.data);
        assert_eq!(unseen.len(), 2);
        let resolved: Vec<_> = unseen
            .iter()
            .map(|key| match cache.resolve(key) {
                Resolution::Resolved(d) => d,
                Resolution::Missing { raw_key } => panic!("{raw_key} should resolve"),
            })
            .collect();

        let ctx = CycleContext {
            category: alert.category,
            title: "Rockets and missiles fire",
            description: None,
            content_length: 120,
            last_modified: stamp("Sun, 06 Nov 2022 08:49:37 GMT"),
            language: LanguageCode::En,
        };
        let notification = compose::compose(&cfg, &ctx, &resolved, &[]);

        // Sound derives from the 15-second protection time.
        assert_eq!(
            notification.alarm,
            Some(crate::audio::AlarmCue::For(Duration::from_secs(15)))
        );
        // Both districts grouped under their area in the 15-second bucket.
        assert!(notification.text.contains("\tמרכז:\n\t\t15 seconds: Area A, Area B"));
        // Only Area A is in the alert set.
        assert!(notification.text.contains("ALERT ALERT ALERT: [Area A: 15 seconds]"));
        assert!(!notification.text.contains("Area B: 15 seconds]"));

        dedup.record(alert.category, &alert.title, &alert.data);

        // Second poll repeats the same payload: nothing newly seen.
        assert!(
            dedup
                .filter_unseen(alert.category, &alert.title, &alert.data)
                .is_empty()
        );
    }

    #[test]
    fn language_switch_rebuilds_a_pure_snapshot() {
        let cache = center_districts();
        // Simulate the refresh that a language change forces: the whole map
        // is replaced, so no entry of the old language survives.
        cache.install(HashMap::from([(
            "אזור א".to_string(),
            AreaTranslationProtectionTime {
                area_name: "מרכז".to_string(),
                translation: "אזור א".to_string(),
                protection_time: Duration::from_secs(15),
            },
        )]));

        match cache.resolve("אזור א") {
            Resolution::Resolved(d) => assert_eq!(d.translation, "אזור א"),
            other => panic!("expected resolved, got {other:?}"),
        }
        assert_eq!(
            cache.resolve("אזור ב"),
            Resolution::Missing {
                raw_key: "אזור ב".to_string()
            }
        );
    }
}
