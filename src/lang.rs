//! Language codes and the per-language lookup tables that back them.
//!
//! The tables mirror the ones shipped in Home Front Command's own client
//! script (WarningMessages.js): the drill/self-test district markers, the
//! word for "seconds" and the phrases used for the common protection times.
//! Adding a language is a data change here, nothing else.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LanguageCode {
    #[default]
    #[serde(alias = "he")]
    He,
    #[serde(alias = "en")]
    En,
    #[serde(alias = "ar")]
    Ar,
    #[serde(alias = "ru")]
    Ru,
}

/// Everything that varies per language, as plain data.
struct LanguageTable {
    /// Canonical Hebrew drill key → how this language displays it.
    test_districts: &'static [(&'static str, &'static str)],
    seconds_word: &'static str,
    /// Protection-time seconds → idiomatic phrase. Values without an entry
    /// fall back to "<n> <seconds_word>".
    time_phrases: &'static [(u64, &'static str)],
}

static HE: LanguageTable = LanguageTable {
    test_districts: &[("בדיקה", "בדיקה"), ("בדיקה מחזורית", "בדיקה מחזורית")],
    seconds_word: "שניות",
    time_phrases: &[(0, "מיידי"), (60, "דקה"), (90, "דקה וחצי"), (180, "3 דקות")],
};

static EN: LanguageTable = LanguageTable {
    test_districts: &[("בדיקה", "Test"), ("בדיקה מחזורית", "Periodic Test")],
    seconds_word: "seconds",
    time_phrases: &[
        (0, "Immediately"),
        (60, "1 minute"),
        (90, "1.5 minutes"),
        (180, "3 minutes"),
    ],
};

static AR: LanguageTable = LanguageTable {
    test_districts: &[("בדיקה", "فحص"), ("בדיקה מחזורית", "فحص الدوري")],
    seconds_word: "ثواني",
    time_phrases: &[
        (0, "بشكل فوري"),
        (60, "دقيقة"),
        (90, "دقيقة ونصف"),
        (180, "3 دقائق"),
    ],
};

static RU: LanguageTable = LanguageTable {
    test_districts: &[("בדיקה", "Проверка"), ("בדיקה מחזורית", "Периодическая Проверка")],
    seconds_word: "секунды",
    time_phrases: &[
        (0, "Hемедленно"),
        (60, "1 минут"),
        (90, "1,5 минуты"),
        (180, "3 минуты"),
    ],
};

/// True when `raw_key` is one of the canonical (Hebrew) drill markers the
/// feed uses for self-test payloads, regardless of the configured language.
pub fn is_test_key(raw_key: &str) -> bool {
    HE.test_districts.iter().any(|&(key, _)| key == raw_key)
}

impl LanguageCode {
    fn table(self) -> &'static LanguageTable {
        match self {
            Self::He => &HE,
            Self::En => &EN,
            Self::Ar => &AR,
            Self::Ru => &RU,
        }
    }

    /// Lowercase tag used in the remote endpoints' query strings.
    pub fn tag(self) -> &'static str {
        match self {
            Self::He => "he",
            Self::En => "en",
            Self::Ar => "ar",
            Self::Ru => "ru",
        }
    }

    /// This language's display form of a drill marker, or `None` when the
    /// key is not a drill marker at all.
    pub fn test_translation(self, raw_key: &str) -> Option<&'static str> {
        self.table()
            .test_districts
            .iter()
            .find(|&&(key, _)| key == raw_key)
            .map(|&(_, translation)| translation)
    }

    /// Human phrase for a protection time ("Immediately", "15 seconds", ...).
    pub fn time_phrase(self, protection_time: Duration) -> String {
        let secs = protection_time.as_secs();
        let table = self.table();
        table
            .time_phrases
            .iter()
            .find(|&&(s, _)| s == secs)
            .map(|&(_, phrase)| phrase.to_string())
            .unwrap_or_else(|| format!("{secs} {}", table.seconds_word))
    }
}
