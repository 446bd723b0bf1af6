//! DetectorPort: the capability surface every concrete detector satisfies
//!. Concrete detectors (frequency, spike, blacklist, ...)
//! are out of scope; the core only drains their FIFO matches.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::query_client::TermBucket;

pub trait DetectorPort: Send {
    fn add_data(&mut self, events: Vec<serde_json::Value>);
    fn add_count_data(&mut self, counts: BTreeMap<DateTime<Utc>, u64>);
    fn add_terms_data(&mut self, buckets: BTreeMap<DateTime<Utc>, Vec<TermBucket>>);
    fn garbage_collect(&mut self, now: DateTime<Utc>);
    /// Drain matches in FIFO order (the order they'll be delivered in).
    fn drain_matches(&mut self) -> Vec<serde_json::Value>;
}
