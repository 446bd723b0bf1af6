//! Silence check, realert, aggregation, enhancement chain, sink fan-out,
//! result persistence, retry.

use chrono::{DateTime, Utc};

use vigil_config::RuleConfig;

use crate::model::{AlertRecord, PendingAggregate, RuntimeState};
use crate::ports::{AlerterPort, EnhancementOutcome, EnhancementPort, StateStore, StoreResult};
use crate::{vg_debug, vg_warn};

/// Optional collaborator that enriches the first match of a batch with a
/// visualization-dashboard link. Out of scope in the sense that no concrete
/// implementation lives in this crate — failures are non-fatal.
pub trait DashboardPort: Send + Sync {
    fn build_link(&self, first_match: &serde_json::Value) -> Result<String, String>;
}

/// Result of one `alert()` call.
#[derive(Debug, Clone, Default)]
pub struct AlertOutcome {
    pub delivered_count: usize,
    pub first_failure: Option<String>,
    pub persisted_ids: Vec<String>,
}

fn apply_enhancements(matches: &mut Vec<serde_json::Value>, enhancements: &[Box<dyn EnhancementPort>]) {
    matches.retain_mut(|m| {
        for enhancement in enhancements {
            match enhancement.apply(m) {
                Ok(EnhancementOutcome::Kept) => {}
                Ok(EnhancementOutcome::Dropped) => return false,
                Err(e) => {
                    // Flow-control drop is not an error; an enhancement
                    // *error* is logged and the match proceeds unmodified.
                    vg_warn!(alert, error = %e, "enhancement error, match kept unmodified");
                }
            }
        }
        true
    });
}

/// Immediate delivery.
///
/// `debug_sink`, when set, receives every match instead of the configured
/// sinks and the call returns without persisting anything.
#[allow(clippy::too_many_arguments)]
pub async fn alert(
    mut matches: Vec<serde_json::Value>,
    rule: &RuleConfig,
    at: DateTime<Utc>,
    enhancements: &[Box<dyn EnhancementPort>],
    sinks: &[Box<dyn AlerterPort>],
    dashboard: Option<&dyn DashboardPort>,
    debug_sink: Option<&dyn AlerterPort>,
    store: &dyn StateStore,
) -> StoreResult<AlertOutcome> {
    if matches.is_empty() {
        return Ok(AlertOutcome::default());
    }

    if let Some(dash) = dashboard {
        if let Some(first) = matches.first_mut() {
            match dash.build_link(first) {
                Ok(link) => {
                    if let Some(obj) = first.as_object_mut() {
                        obj.insert("dashboard_link".to_string(), serde_json::Value::String(link));
                    }
                }
                Err(e) => vg_warn!(alert, error = %e, "dashboard link generation failed, non-fatal"),
            }
        }
    }

    apply_enhancements(&mut matches, enhancements);
    if matches.is_empty() {
        return Ok(AlertOutcome::default());
    }

    if let Some(debug) = debug_sink {
        let _ = debug.deliver(&matches).await;
        vg_debug!(alert, rule = %rule.name, matches = matches.len(), "debug mode: delivered to debug sink only");
        return Ok(AlertOutcome {
            delivered_count: 1,
            first_failure: None,
            persisted_ids: Vec::new(),
        });
    }

    let mut delivered_count = 0usize;
    let mut first_failure: Option<String> = None;
    for sink in sinks {
        match sink.deliver(&matches).await {
            Ok(()) => delivered_count += 1,
            Err(e) => {
                vg_warn!(alert, rule = %rule.name, sink = %sink.describe().alerter_type, error = %e, "sink delivery failed");
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }
    }
    let alert_sent = !sinks.is_empty() && first_failure.is_none();

    let mut persisted_ids = Vec::with_capacity(matches.len());
    let mut aggregate_id: Option<String> = None;
    for m in &matches {
        let record = AlertRecord {
            rule_name: rule.name.clone(),
            match_body: m.clone(),
            alert_info: serde_json::json!({ "sinks": sinks.iter().map(|s| s.describe().alerter_type).collect::<Vec<_>>() }),
            alert_sent,
            alert_time: at,
            alert_exception: first_failure.clone(),
            aggregate_id: aggregate_id.clone(),
            timestamp: at,
        };
        let id = store.put_alert(&record).await?;
        if aggregate_id.is_none() {
            aggregate_id = Some(id.clone());
        }
        persisted_ids.push(id);
    }

    Ok(AlertOutcome {
        delivered_count,
        first_failure,
        persisted_ids,
    })
}

/// `add_aggregated_alert(match, rule)`.
///
/// Never fails the caller's tick: a persistence failure degrades to the
/// documented in-memory buffering path rather than propagating a store
/// error, since the alternative (aborting the tick) would also lose the
/// checkpoint progress the rest of the tick already made.
pub async fn add_aggregated_alert(
    state: &mut RuntimeState,
    match_body: serde_json::Value,
    match_ts: DateTime<Utc>,
    rule: &RuleConfig,
    store: &dyn StateStore,
) {
    let aggregation = rule
        .aggregation
        .expect("add_aggregated_alert only called when rule.aggregation is set")
        .as_duration();
    let aggregation = chrono::Duration::from_std(aggregation).unwrap_or(chrono::Duration::zero());

    let needs_new_window = match &state.pending_aggregate {
        None => true,
        Some(p) => p.fire_at <= match_ts,
    };

    if needs_new_window {
        let fire_at = match_ts + aggregation;
        let record = AlertRecord {
            rule_name: rule.name.clone(),
            match_body: match_body.clone(),
            alert_info: serde_json::json!({ "aggregation": true }),
            alert_sent: false,
            alert_time: fire_at,
            alert_exception: None,
            aggregate_id: None,
            timestamp: match_ts,
        };
        match store.put_alert(&record).await {
            Ok(id) => {
                state.pending_aggregate = Some(PendingAggregate {
                    id,
                    fire_at,
                    matches: Vec::new(),
                });
            }
            Err(e) => {
                vg_warn!(alert, rule = %rule.name, error = %e, "failed to persist new aggregation window, buffering in memory");
                state.pending_aggregate = Some(PendingAggregate {
                    id: String::new(),
                    fire_at,
                    matches: vec![match_body],
                });
            }
        }
        return;
    }

    let pending = state.pending_aggregate.as_mut().expect("checked above");
    let record = AlertRecord {
        rule_name: rule.name.clone(),
        match_body: match_body.clone(),
        alert_info: serde_json::json!({ "aggregation": true }),
        alert_sent: false,
        alert_time: pending.fire_at,
        alert_exception: None,
        aggregate_id: if pending.id.is_empty() { None } else { Some(pending.id.clone()) },
        timestamp: match_ts,
    };
    if let Err(e) = store.put_alert(&record).await {
        vg_warn!(alert, rule = %rule.name, error = %e, "failed to persist aggregated match, buffering in memory");
        pending.matches.push(match_body);
    }
}

/// Deliver and clear any matches buffered in memory because persistence
/// failed earlier, once the window's `fire_at` is due.
/// Called by each rule's own task, since `RuntimeState` is owned
/// exclusively by it.
pub async fn flush_buffered_aggregate(
    state: &mut RuntimeState,
    rule: &RuleConfig,
    now: DateTime<Utc>,
    enhancements: &[Box<dyn EnhancementPort>],
    sinks: &[Box<dyn AlerterPort>],
    store: &dyn StateStore,
) {
    let due = matches!(&state.pending_aggregate, Some(p) if p.fire_at <= now && !p.matches.is_empty());
    if !due {
        return;
    }
    let pending = state.pending_aggregate.take().expect("checked above");
    let _ = alert(pending.matches, rule, now, enhancements, sinks, None, None, store).await;
}

/// Summary of one `retry_persisted_alerts` sweep.
#[derive(Debug, Clone, Default)]
pub struct RetrySummary {
    pub redelivered: usize,
    pub still_pending: usize,
}

/// `send_pending_alerts`'s persisted-record half.
///
/// Queries `StateStore` for undelivered `AlertRecord`s due within
/// `alert_time_limit` and redelivers each aggregate group once its
/// `fire_at` (`alert_time`) is due: "due" means `alert_time <= now`.
///
/// `resolve_rule` looks up a rule's config plus its sinks by name; `None`
/// means the rule is gone.
pub async fn retry_persisted_alerts<'a, F>(
    now: DateTime<Utc>,
    alert_time_limit: chrono::Duration,
    resolve_rule: F,
    store: &dyn StateStore,
) -> StoreResult<RetrySummary>
where
    F: Fn(&str) -> Option<(&'a RuleConfig, &'a [Box<dyn AlerterPort>])>,
{
    let since = now - alert_time_limit;
    let pending = store.get_pending_alerts(since, now).await?;

    let mut summary = RetrySummary::default();
    let mut handled_roots = std::collections::HashSet::new();

    for (id, record) in &pending {
        if record.aggregate_id.is_some() {
            continue; // only root records (no aggregate_id) drive a retry
        }
        if !handled_roots.insert(id.clone()) {
            continue;
        }
        if record.alert_time > now {
            summary.still_pending += 1;
            continue; // not due yet
        }
        let Some((rule, sinks)) = resolve_rule(&record.rule_name) else {
            vg_warn!(alert, rule = %record.rule_name, "rule gone, skipping pending alert retry");
            continue;
        };

        let siblings = store.get_aggregate_siblings(id).await?;
        let mut batch = vec![record.match_body.clone()];
        let mut involved_ids = vec![id.clone()];
        for (sib_id, sib) in siblings {
            if sib_id == *id {
                continue;
            }
            batch.push(sib.match_body);
            involved_ids.push(sib_id);
        }

        let mut delivered = 0usize;
        for sink in sinks {
            if sink.deliver(&batch).await.is_ok() {
                delivered += 1;
            }
        }

        if delivered > 0 {
            for involved_id in &involved_ids {
                let _ = store.delete_alert(involved_id).await;
            }
            summary.redelivered += 1;
            vg_debug!(alert, rule = %rule.name, matches = batch.len(), "retried alert delivered");
        } else {
            summary.still_pending += 1;
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{FakeStateStore, RecordingAlerter};
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn rule() -> RuleConfig {
        let raw: vigil_config::RuleConfigRaw = toml::from_str(
            r#"
name = "r"
index_pattern = "logs-*"
run_every = "1m"
buffer_time = "15m"
es_host = "localhost"
"#,
        )
        .unwrap();
        vigil_config::RuleConfig::resolve(raw, "r.toml".into(), "h".into()).unwrap()
    }

    #[tokio::test]
    async fn alert_delivers_and_persists_one_record_per_match() {
        let store = FakeStateStore::new();
        let sink = RecordingAlerter::new("test");
        let sinks: Vec<Box<dyn AlerterPort>> = vec![Box::new(sink)];
        let enhancements: Vec<Box<dyn EnhancementPort>> = vec![];
        let matches = vec![serde_json::json!({"a": 1}), serde_json::json!({"a": 2})];

        let outcome = alert(matches, &rule(), ts(0), &enhancements, &sinks, None, None, &store)
            .await
            .unwrap();

        assert_eq!(outcome.delivered_count, 1);
        assert!(outcome.first_failure.is_none());
        assert_eq!(outcome.persisted_ids.len(), 2);
        assert_eq!(store.alert_count(), 2);
    }

    #[tokio::test]
    async fn alert_debug_mode_skips_persistence() {
        let store = FakeStateStore::new();
        let debug_sink = RecordingAlerter::new("debug");
        let sinks: Vec<Box<dyn AlerterPort>> = vec![];
        let enhancements: Vec<Box<dyn EnhancementPort>> = vec![];
        let matches = vec![serde_json::json!({"a": 1})];

        let outcome = alert(matches, &rule(), ts(0), &enhancements, &sinks, None, Some(&debug_sink), &store)
            .await
            .unwrap();

        assert_eq!(outcome.delivered_count, 1);
        assert_eq!(store.alert_count(), 0);
        assert_eq!(debug_sink.delivered_batches().len(), 1);
    }

    #[tokio::test]
    async fn alert_sink_failure_keeps_record_pending() {
        let store = FakeStateStore::new();
        let sink = RecordingAlerter::failing("broken", "sink down");
        let sinks: Vec<Box<dyn AlerterPort>> = vec![Box::new(sink)];
        let enhancements: Vec<Box<dyn EnhancementPort>> = vec![];

        let outcome = alert(vec![serde_json::json!({"a": 1})], &rule(), ts(0), &enhancements, &sinks, None, None, &store)
            .await
            .unwrap();

        assert_eq!(outcome.delivered_count, 0);
        assert_eq!(outcome.first_failure.as_deref(), Some("sink down"));
        let pending = store.get_pending_alerts(ts(-1), ts(1)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(!pending[0].1.alert_sent);
    }

    #[tokio::test]
    async fn aggregation_opens_and_reuses_window() {
        let store = FakeStateStore::new();
        let mut state = RuntimeState::new();
        let mut rule = rule();
        rule.aggregation = Some("2m".parse().unwrap());

        add_aggregated_alert(&mut state, serde_json::json!({"a": 1}), ts(0), &rule, &store).await;
        let first_id = state.pending_aggregate.as_ref().unwrap().id.clone();
        assert!(!first_id.is_empty());

        add_aggregated_alert(&mut state, serde_json::json!({"a": 2}), ts(30), &rule, &store).await;
        assert_eq!(state.pending_aggregate.as_ref().unwrap().id, first_id);

        // past fire_at -> new window
        add_aggregated_alert(&mut state, serde_json::json!({"a": 3}), ts(121), &rule, &store).await;
        assert_ne!(state.pending_aggregate.as_ref().unwrap().id, first_id);

        assert_eq!(store.alert_count(), 3);
    }

    #[tokio::test]
    async fn retry_redelivers_due_alerts_and_deletes_them() {
        let store = FakeStateStore::new();
        let record = AlertRecord {
            rule_name: "r".into(),
            match_body: serde_json::json!({"a": 1}),
            alert_info: serde_json::json!({}),
            alert_sent: false,
            alert_time: ts(0),
            alert_exception: Some("prior failure".into()),
            aggregate_id: None,
            timestamp: ts(0),
        };
        store.put_alert(&record).await.unwrap();

        let rule_cfg = rule();
        let sink = RecordingAlerter::new("recovered");
        let sinks: Vec<Box<dyn AlerterPort>> = vec![Box::new(sink)];

        let summary = retry_persisted_alerts(
            ts(10),
            chrono::Duration::days(2),
            |name| if name == "r" { Some((&rule_cfg, sinks.as_slice())) } else { None },
            &store,
        )
        .await
        .unwrap();

        assert_eq!(summary.redelivered, 1);
        assert_eq!(store.alert_count(), 0);
    }

    #[tokio::test]
    async fn retry_skips_not_yet_due_alerts() {
        let store = FakeStateStore::new();
        let record = AlertRecord {
            rule_name: "r".into(),
            match_body: serde_json::json!({"a": 1}),
            alert_info: serde_json::json!({}),
            alert_sent: false,
            alert_time: ts(100),
            alert_exception: None,
            aggregate_id: None,
            timestamp: ts(0),
        };
        store.put_alert(&record).await.unwrap();

        let rule_cfg = rule();
        let sink = RecordingAlerter::new("s");
        let sinks: Vec<Box<dyn AlerterPort>> = vec![Box::new(sink)];

        let summary = retry_persisted_alerts(
            ts(10),
            chrono::Duration::days(2),
            |_| Some((&rule_cfg, sinks.as_slice())),
            &store,
        )
        .await
        .unwrap();

        assert_eq!(summary.redelivered, 0);
        assert_eq!(store.alert_count(), 1);
    }
}
