use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::ports::{DetectorPort, TermBucket};

/// Fires once `add_data` has delivered at least `num_events` matching
/// events inside its own rolling window. Not a general detector library — concrete detectors remain
/// a Non-goal — but enough to exercise `QueryPipeline` →
/// `AlertFlow` end-to-end and give the CLI something to run out of the box.
pub struct FrequencyDetector {
    timestamp_field: String,
    num_events: usize,
    window: Duration,
    events: VecDeque<DateTime<Utc>>,
    matches: VecDeque<serde_json::Value>,
}

impl FrequencyDetector {
    pub fn new(timestamp_field: impl Into<String>, num_events: usize, window: Duration) -> Self {
        Self {
            timestamp_field: timestamp_field.into(),
            num_events,
            window,
            events: VecDeque::new(),
            matches: VecDeque::new(),
        }
    }

    fn event_ts(&self, event: &serde_json::Value) -> Option<DateTime<Utc>> {
        event
            .get(&self.timestamp_field)
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl DetectorPort for FrequencyDetector {
    fn add_data(&mut self, events: Vec<serde_json::Value>) {
        for event in events {
            let Some(ts) = self.event_ts(&event) else {
                continue;
            };
            self.events.push_back(ts);
            if self.events.len() >= self.num_events {
                let window_start = ts - self.window;
                let in_window = self.events.iter().filter(|t| **t >= window_start).count();
                if in_window >= self.num_events {
                    self.matches.push_back(event);
                    self.events.clear();
                    continue;
                }
            }
        }
    }

    fn add_count_data(&mut self, _counts: BTreeMap<DateTime<Utc>, u64>) {
        // Frequency detector only operates on raw hits in this workspace;
        // count-mode support is left to a real detector implementation.
    }

    fn add_terms_data(&mut self, _buckets: BTreeMap<DateTime<Utc>, Vec<TermBucket>>) {}

    fn garbage_collect(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        while let Some(front) = self.events.front() {
            if *front < cutoff {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    fn drain_matches(&mut self) -> Vec<serde_json::Value> {
        self.matches.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ts: &str) -> serde_json::Value {
        serde_json::json!({"@timestamp": ts})
    }

    #[test]
    fn fires_once_threshold_reached_within_window() {
        let mut det = FrequencyDetector::new("@timestamp", 3, Duration::minutes(5));
        det.add_data(vec![event("2026-01-01T00:00:00Z")]);
        assert!(det.drain_matches().is_empty());
        det.add_data(vec![event("2026-01-01T00:01:00Z")]);
        assert!(det.drain_matches().is_empty());
        det.add_data(vec![event("2026-01-01T00:02:00Z")]);
        let matches = det.drain_matches();
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn does_not_fire_outside_window() {
        let mut det = FrequencyDetector::new("@timestamp", 2, Duration::minutes(1));
        det.add_data(vec![event("2026-01-01T00:00:00Z")]);
        det.add_data(vec![event("2026-01-01T00:10:00Z")]);
        assert!(det.drain_matches().is_empty());
    }

    #[test]
    fn garbage_collect_evicts_stale_events() {
        let mut det = FrequencyDetector::new("@timestamp", 5, Duration::minutes(1));
        det.add_data(vec![event("2026-01-01T00:00:00Z")]);
        det.garbage_collect(
            DateTime::parse_from_rfc3339("2026-01-01T00:05:00Z")
                .unwrap()
                .with_timezone(&Utc),
        );
        assert!(det.events.is_empty());
    }
}
