//! Per-(category, title) deduplication of announced districts.
//!
//! The feed re-sends the full current key list on every poll while an event
//! is ongoing, so without unseen-filtering every poll would re-announce and
//! re-sound districts that were already alerted. The whole tracker is
//! cleared when the feed goes quiet (below-threshold payload), never per
//! alert and never by time.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct DedupTracker {
    seen: HashMap<u32, HashMap<String, HashSet<String>>>,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys from `raw_keys` not yet recorded for `(category, title)`,
    /// in their original order.
    pub fn filter_unseen<'a>(
        &self,
        category: u32,
        title: &str,
        raw_keys: impl IntoIterator<Item = &'a String>,
    ) -> Vec<String> {
        let seen = self
            .seen
            .get(&category)
            .and_then(|titles| titles.get(title));
        raw_keys
            .into_iter()
            .filter(|key| seen.is_none_or(|set| !set.contains(key.as_str())))
            .cloned()
            .collect()
    }

    /// Union `raw_keys` into the stored set for `(category, title)`.
    pub fn record<'a>(
        &mut self,
        category: u32,
        title: &str,
        raw_keys: impl IntoIterator<Item = &'a String>,
    ) {
        let set = self
            .seen
            .entry(category)
            .or_default()
            .entry(title.to_string())
            .or_default();
        set.extend(raw_keys.into_iter().cloned());
    }

    /// Forget everything; called when the feed signals "no active event".
    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn repeated_keys_are_announced_exactly_once() {
        let mut tracker = DedupTracker::new();
        let title = "ירי רקטות וטילים";

        let first = keys(&["א", "ב"]);
        let unseen = tracker.filter_unseen(1, title, &first);
        assert_eq!(unseen, first);
        tracker.record(1, title, &first);

        // Same payload repeated: nothing new.
        assert!(tracker.filter_unseen(1, title, &first).is_empty());

        // Event widens: only the new key comes back.
        let widened = keys(&["א", "ב", "ג"]);
        assert_eq!(tracker.filter_unseen(1, title, &widened), keys(&["ג"]));
        tracker.record(1, title, &widened);
        assert!(tracker.filter_unseen(1, title, &widened).is_empty());
    }

    #[test]
    fn categories_and_titles_are_tracked_independently() {
        let mut tracker = DedupTracker::new();
        let data = keys(&["א"]);
        tracker.record(1, "ירי רקטות וטילים", &data);

        assert!(tracker.filter_unseen(1, "ירי רקטות וטילים", &data).is_empty());
        assert_eq!(tracker.filter_unseen(3, "רעידת אדמה", &data), data);
        assert_eq!(tracker.filter_unseen(1, "חדירת כלי טיס עוין", &data), data);
    }

    #[test]
    fn clear_on_quiet_makes_keys_new_again() {
        let mut tracker = DedupTracker::new();
        let data = keys(&["א", "ב"]);
        tracker.record(1, "ירי רקטות וטילים", &data);
        assert!(tracker.filter_unseen(1, "ירי רקטות וטילים", &data).is_empty());

        tracker.clear();
        assert_eq!(tracker.filter_unseen(1, "ירי רקטות וטילים", &data), data);
    }
}
