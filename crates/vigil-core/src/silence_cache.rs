//! In-memory + persisted suppression map.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::model::SilenceRecord;
use crate::ports::{StateStore, StoreResult};

/// Process-wide silence cache. Reads and writes must be serialized if ticks
/// are parallelized — callers hold it behind
/// whatever synchronization their concurrency model requires; this type
/// itself takes `&mut self` throughout and does none of its own locking.
#[derive(Debug, Default)]
pub struct SilenceCache {
    entries: HashMap<String, DateTime<Utc>>,
}

impl SilenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compose the silence key for a rule/match: `rule_name`, or
    /// `rule_name.match[query_key]` when `query_key` is set and present in
    /// the match.
    pub fn compose_key(rule_name: &str, query_key: Option<&str>, match_body: &serde_json::Value) -> String {
        match query_key.and_then(|k| match_body.get(k)).and_then(value_as_key_str) {
            Some(v) => format!("{rule_name}.{v}"),
            None => rule_name.to_string(),
        }
    }

    /// `true` while `until > now`. Consults the in-memory cache first; on a
    /// miss, falls back to the newest persisted `SilenceRecord` and
    /// populates the cache.
    pub async fn is_silenced(&mut self, key: &str, now: DateTime<Utc>, store: &dyn StateStore) -> StoreResult<bool> {
        if let Some(until) = self.entries.get(key).copied() {
            if until > now {
                return Ok(true);
            }
            self.entries.remove(key);
            return Ok(false);
        }

        match store.get_newest_silence(key).await? {
            Some(record) if record.until > now => {
                self.entries.insert(key.to_string(), record.until);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Update the cache and persist a `SilenceRecord` for `key` until
    /// `until`. If persistence fails, the cache entry is kept anyway
    /// (Open Question resolution, DESIGN.md #2: the silence still takes
    /// effect for the remainder of this process's lifetime, logged via
    /// `put_error`, but is not durable across a restart).
    pub async fn set_realert(
        &mut self,
        key: &str,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
        store: &dyn StateStore,
    ) -> StoreResult<()> {
        self.entries.insert(key.to_string(), until);
        let record = SilenceRecord {
            rule_name: key.to_string(),
            until,
            timestamp: now,
        };
        if let Err(e) = store.put_silence(&record).await {
            let _ = store
                .put_error(
                    &format!("failed to persist silence for {key}: {e}"),
                    &[],
                    None,
                )
                .await;
            return Err(e);
        }
        Ok(())
    }
}

fn value_as_key_str(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakeStateStore;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn compose_key_unkeyed() {
        let body = serde_json::json!({"user": "alice"});
        assert_eq!(SilenceCache::compose_key("r", None, &body), "r");
    }

    #[test]
    fn compose_key_with_query_key_present() {
        let body = serde_json::json!({"user": "alice"});
        assert_eq!(SilenceCache::compose_key("r", Some("user"), &body), "r.alice");
    }

    #[test]
    fn compose_key_falls_back_when_query_key_absent() {
        let body = serde_json::json!({"other": "x"});
        assert_eq!(SilenceCache::compose_key("r", Some("user"), &body), "r");
    }

    #[tokio::test]
    async fn silence_blocks_until_expiry() {
        let store = FakeStateStore::new();
        let mut cache = SilenceCache::new();
        cache.set_realert("r", ts(100), ts(0), &store).await.unwrap();

        assert!(cache.is_silenced("r", ts(50), &store).await.unwrap());
        assert!(!cache.is_silenced("r", ts(150), &store).await.unwrap());
    }

    #[tokio::test]
    async fn expired_entry_is_evicted_from_cache() {
        let store = FakeStateStore::new();
        let mut cache = SilenceCache::new();
        cache.set_realert("r", ts(100), ts(0), &store).await.unwrap();
        assert!(!cache.is_silenced("r", ts(200), &store).await.unwrap());
        assert!(cache.entries.is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_persisted_silence_on_cache_miss() {
        let store = FakeStateStore::new();
        store
            .put_silence(&SilenceRecord {
                rule_name: "r".into(),
                until: ts(500),
                timestamp: ts(0),
            })
            .await
            .unwrap();

        let mut cache = SilenceCache::new();
        assert!(cache.is_silenced("r", ts(10), &store).await.unwrap());
    }
}
