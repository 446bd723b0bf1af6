//! Data model: per-rule runtime state and the persisted record kinds
//! (alerts, silences, status).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One open aggregation window per rule.
#[derive(Debug, Clone)]
pub struct PendingAggregate {
    /// `_id` of the first persisted match in the group.
    pub id: String,
    /// When the window closes and the combined alert fires.
    pub fire_at: DateTime<Utc>,
    /// Matches buffered in memory because persistence failed (best-effort
    /// recovery path).
    pub matches: Vec<serde_json::Value>,
}

/// Mutable per-rule execution state.
///
/// Carried across hot-reloads of the owning rule's configuration
///; discarded on rule-file deletion.
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    /// Exclusive lower bound for the next query window.
    pub checkpoint: Option<DateTime<Utc>>,
    /// The checkpoint at the start of the current tick (diagnostic only).
    pub original_checkpoint: Option<DateTime<Utc>>,
    /// `document id -> timestamp`, used to dedup hits across overlapping
    /// windows. Entries older than `buffer_time` are evicted every tick.
    pub processed_ids: BTreeMap<String, DateTime<Utc>>,
    /// At most one open aggregation window.
    pub pending_aggregate: Option<PendingAggregate>,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evict `processed_ids` entries older than `now - buffer_time`.
    pub fn evict_processed_ids(&mut self, now: DateTime<Utc>, buffer_time: chrono::Duration) {
        let cutoff = now - buffer_time;
        self.processed_ids.retain(|_, ts| *ts >= cutoff);
    }
}

/// A persisted alert delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub rule_name: String,
    pub match_body: serde_json::Value,
    pub alert_info: serde_json::Value,
    pub alert_sent: bool,
    pub alert_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_exception: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate_id: Option<String>,
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// A persisted suppression window.
///
/// `rule_name` already carries the `.query_key_value` suffix when the rule
/// has a `query_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilenceRecord {
    pub rule_name: String,
    pub until: DateTime<Utc>,
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// A per-tick execution summary, persisted for checkpoint recovery and
/// operator visibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub rule_name: String,
    pub starttime: DateTime<Utc>,
    pub endtime: DateTime<Utc>,
    pub hits: u64,
    pub matches: u64,
    pub time_taken: f64,
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn evict_drops_only_stale_ids() {
        let mut state = RuntimeState::new();
        state.processed_ids.insert("old".into(), ts(0));
        state.processed_ids.insert("fresh".into(), ts(1000));
        state.evict_processed_ids(ts(1000), chrono::Duration::seconds(500));
        assert!(!state.processed_ids.contains_key("old"));
        assert!(state.processed_ids.contains_key("fresh"));
    }

    #[test]
    fn alert_record_roundtrips_through_json() {
        let rec = AlertRecord {
            rule_name: "r".into(),
            match_body: serde_json::json!({"@timestamp": "2026-01-01T00:00:00Z"}),
            alert_info: serde_json::json!({}),
            alert_sent: false,
            alert_time: ts(0),
            alert_exception: None,
            aggregate_id: None,
            timestamp: ts(0),
        };
        let json = serde_json::to_string(&rec).unwrap();
        assert!(!json.contains("alert_exception"));
        assert!(!json.contains("aggregate_id"));
        let back: AlertRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rule_name, "r");
    }
}
