//! `RuleRuntime`: the mutable per-rule execution state, and `tick()`, the
//! per-tick algorithm a `Scheduler` drives once per rule per poll cycle.

use std::time::Instant;

use chrono::{DateTime, Utc};

use vigil_config::RuleConfig;

use crate::alert_flow::{self, DashboardPort};
use crate::model::{RuntimeState, StatusRecord};
use crate::ports::{AlerterPort, DetectorPort, EnhancementPort, QueryClient, StateStore, StoreResult};
use crate::query_pipeline;
use crate::silence_cache::SilenceCache;
use crate::{vg_debug, vg_warn};

/// Immutable config + mutable runtime for one loaded rule.
pub struct RuleRuntime {
    pub config: RuleConfig,
    pub state: RuntimeState,
}

impl RuleRuntime {
    pub fn new(config: RuleConfig) -> Self {
        Self {
            config,
            state: RuntimeState::new(),
        }
    }

    /// Replace `config` on a hot-reload, carrying over all runtime fields.
    pub fn reconfigure(&mut self, config: RuleConfig) {
        self.config = config;
    }
}

/// Everything one `tick()` call needs beyond `RuleRuntime` itself: the
/// injected collaborators treated as external dependencies.
pub struct TickContext<'a> {
    pub client: &'a dyn QueryClient,
    pub detector: &'a mut dyn DetectorPort,
    pub enhancements: &'a [Box<dyn EnhancementPort>],
    pub sinks: &'a [Box<dyn AlerterPort>],
    pub dashboard: Option<&'a dyn DashboardPort>,
    pub debug_sink: Option<&'a dyn AlerterPort>,
    pub store: &'a dyn StateStore,
    pub silence_cache: &'a mut SilenceCache,
}

/// Result of one tick: `None` status means the tick was skipped entirely
/// (e.g. by the future-start guard).
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    pub status: Option<StatusRecord>,
}

/// Run one poll cycle for a single rule.
///
/// `now` is the tick's single monotonic timestamp, captured once by the
/// caller and used for every comparison here.
/// `cli_end_override` is `--end`; `old_query_limit` governs checkpoint
/// recovery eligibility.
pub async fn tick(
    runtime: &mut RuleRuntime,
    ctx: &mut TickContext<'_>,
    now: DateTime<Utc>,
    cli_end_override: Option<DateTime<Utc>>,
    old_query_limit: chrono::Duration,
) -> StoreResult<TickOutcome> {
    let started = Instant::now();
    let rule = runtime.config.clone();

    runtime.state.original_checkpoint = runtime.state.checkpoint;

    // Step 1: compute `end`. CLI override wins outright over `query_delay`.
    let end = match cli_end_override {
        Some(e) => e,
        None => match rule.query_delay {
            Some(delay) => now - to_chrono(delay.as_duration()),
            None => now,
        },
    };

    // Step 2: determine `start`.
    let buffer_time = to_chrono(rule.buffer_time.as_duration());
    let run_every = to_chrono(rule.run_every.as_duration());

    let start = match runtime.state.checkpoint {
        Some(checkpoint) => checkpoint,
        None => recover_or_default_start(&rule, ctx.store, now, end, buffer_time, run_every, old_query_limit).await?,
    };

    // Step 3: reject a future start.
    if start > now {
        vg_warn!(pipe, rule = %rule.name, start = %start, now = %now, "rule start is in the future, skipping tick");
        return Ok(TickOutcome::default());
    }

    // Step 4: flush any pending aggregate matches carried over.
    alert_flow::flush_buffered_aggregate(
        &mut runtime.state,
        &rule,
        now,
        ctx.enhancements,
        ctx.sinks,
        ctx.store,
    )
    .await;

    // Step 5: chunked-execute `run_query` until `checkpoint == end`.
    let chunk_len = run_every;
    let mut cursor = start;
    let mut total_hits = 0u64;

    loop {
        let remaining = end - cursor;
        let chunk_end = if remaining > buffer_time && !chunk_len.is_zero() {
            cursor + chunk_len
        } else {
            end
        };

        let outcome =
            query_pipeline::run_query(ctx.client, &rule, &mut runtime.state, ctx.detector, cursor, chunk_end).await?;
        total_hits += outcome.hits;

        // Checkpoint advancement is atomic per chunk: only move it once the
        // chunk's query has fully succeeded.
        cursor = chunk_end;
        runtime.state.checkpoint = Some(cursor);

        if cursor >= end {
            break;
        }
    }

    // Step 6: garbage-collect detector state.
    ctx.detector.garbage_collect(end);

    // Step 7: drain matches, apply disposition.
    let drained = ctx.detector.drain_matches();
    let mut matches_count = 0u64;
    for m in drained {
        if m.get(&rule.timestamp_field).is_none() {
            vg_warn!(pipe, rule = %rule.name, "match missing timestamp_field, dropped");
            continue;
        }

        let key = SilenceCache::compose_key(&rule.name, rule.query_key.as_deref(), &m);
        if ctx.silence_cache.is_silenced(&key, now, ctx.store).await? {
            continue;
        }

        if !rule.realert.is_zero() {
            let until = now + to_chrono(rule.realert.as_duration());
            let _ = ctx.silence_cache.set_realert(&key, until, now, ctx.store).await;
        }

        matches_count += 1;

        if rule.aggregation.is_some() {
            let match_ts = m
                .get(&rule.timestamp_field)
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(now);
            alert_flow::add_aggregated_alert(&mut runtime.state, m, match_ts, &rule, ctx.store).await;
        } else {
            match alert_flow::alert(
                vec![m],
                &rule,
                now,
                ctx.enhancements,
                ctx.sinks,
                ctx.dashboard,
                ctx.debug_sink,
                ctx.store,
            )
            .await
            {
                Ok(_) => {}
                Err(e) => vg_warn!(alert, rule = %rule.name, error = %e, "immediate alert delivery errored"),
            }
        }
    }

    // Step 8: persist a StatusRecord with totals.
    let status = StatusRecord {
        rule_name: rule.name.clone(),
        starttime: start,
        endtime: end,
        hits: total_hits,
        matches: matches_count,
        time_taken: started.elapsed().as_secs_f64(),
        timestamp: now,
    };
    if let Err(e) = ctx.store.put_status(&status).await {
        vg_warn!(conn, rule = %rule.name, error = %e, "failed to persist status record");
    }

    // Step 9: evict stale `processed_ids`.
    runtime.state.evict_processed_ids(now, buffer_time);

    vg_debug!(
        pipe,
        rule = %rule.name,
        hits = total_hits,
        matches = matches_count,
        duration_ms = started.elapsed().as_millis() as u64,
        "tick complete"
    );

    Ok(TickOutcome { status: Some(status) })
}

async fn recover_or_default_start(
    rule: &RuleConfig,
    store: &dyn StateStore,
    now: DateTime<Utc>,
    end: DateTime<Utc>,
    buffer_time: chrono::Duration,
    run_every: chrono::Duration,
    old_query_limit: chrono::Duration,
) -> StoreResult<DateTime<Utc>> {
    if let Some(status) = store.get_last_status(&rule.name).await? {
        if now - status.endtime < old_query_limit {
            return Ok(status.endtime);
        }
    }
    Ok(match rule.query_mode {
        vigil_config::QueryMode::Hits => end - buffer_time,
        vigil_config::QueryMode::Count | vigil_config::QueryMode::Terms => end - run_every,
    })
}

fn to_chrono(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{SearchHit, SearchResponse};
    use crate::testkit::{FakeQueryClient, FakeStateStore, FrequencyDetector, RecordingAlerter};
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn rule() -> RuleConfig {
        let raw: vigil_config::RuleConfigRaw = toml::from_str(
            r#"
name = "too_many_errors"
index_pattern = "logs-*"
run_every = "1m"
buffer_time = "5m"
es_host = "localhost"
"#,
        )
        .unwrap();
        vigil_config::RuleConfig::resolve(raw, "r.toml".into(), "h".into()).unwrap()
    }

    #[tokio::test]
    async fn first_tick_without_recovery_uses_default_start() {
        let client = FakeQueryClient::new();
        client.push_search(Ok(SearchResponse::default()));
        let store = FakeStateStore::new();
        let mut runtime = RuleRuntime::new(rule());
        let mut detector = FrequencyDetector::new("@timestamp", 1000, chrono::Duration::minutes(5));
        let mut cache = SilenceCache::new();
        let enhancements: Vec<Box<dyn EnhancementPort>> = vec![];
        let sinks: Vec<Box<dyn AlerterPort>> = vec![];
        let mut ctx = TickContext {
            client: &client,
            detector: &mut detector,
            enhancements: &enhancements,
            sinks: &sinks,
            dashboard: None,
            debug_sink: None,
            store: &store,
            silence_cache: &mut cache,
        };

        let outcome = tick(&mut runtime, &mut ctx, ts(10_000), None, chrono::Duration::days(1))
            .await
            .unwrap();
        let status = outcome.status.unwrap();
        assert_eq!(status.endtime, ts(10_000));
        assert_eq!(status.starttime, ts(10_000) - chrono::Duration::minutes(5));
        assert_eq!(runtime.state.checkpoint, Some(ts(10_000)));
    }

    #[tokio::test]
    async fn future_start_guard_skips_tick() {
        let client = FakeQueryClient::new();
        let store = FakeStateStore::new();
        let mut runtime = RuleRuntime::new(rule());
        runtime.state.checkpoint = Some(ts(100_000));
        let mut detector = FrequencyDetector::new("@timestamp", 1000, chrono::Duration::minutes(5));
        let mut cache = SilenceCache::new();
        let enhancements: Vec<Box<dyn EnhancementPort>> = vec![];
        let sinks: Vec<Box<dyn AlerterPort>> = vec![];
        let mut ctx = TickContext {
            client: &client,
            detector: &mut detector,
            enhancements: &enhancements,
            sinks: &sinks,
            dashboard: None,
            debug_sink: None,
            store: &store,
            silence_cache: &mut cache,
        };

        let outcome = tick(&mut runtime, &mut ctx, ts(0), None, chrono::Duration::days(1))
            .await
            .unwrap();
        assert!(outcome.status.is_none());
        assert_eq!(runtime.state.checkpoint, Some(ts(100_000)), "checkpoint must not move");
        assert!(client.search_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn matches_are_delivered_and_silenced_on_realert() {
        let client = FakeQueryClient::new();
        client.push_search(Ok(SearchResponse {
            hits: vec![SearchHit {
                id: "d1".into(),
                source: serde_json::json!({"@timestamp": "2026-01-01T00:00:00Z"}),
            }],
            total: 1,
        }));
        let store = FakeStateStore::new();
        let mut runtime = RuleRuntime::new({
            let mut r = rule();
            r.realert = "5m".parse().unwrap();
            r
        });
        runtime.state.checkpoint = Some(parse("2025-12-31T23:55:00Z"));
        let mut detector = FrequencyDetector::new("@timestamp", 1, chrono::Duration::minutes(5));
        let mut cache = SilenceCache::new();
        let sink = RecordingAlerter::new("s");
        let sinks: Vec<Box<dyn AlerterPort>> = vec![Box::new(sink)];
        let enhancements: Vec<Box<dyn EnhancementPort>> = vec![];

        let now = parse("2026-01-01T00:00:00Z");
        let mut ctx = TickContext {
            client: &client,
            detector: &mut detector,
            enhancements: &enhancements,
            sinks: &sinks,
            dashboard: None,
            debug_sink: None,
            store: &store,
            silence_cache: &mut cache,
        };
        let outcome = tick(&mut runtime, &mut ctx, now, None, chrono::Duration::days(1)).await.unwrap();
        let status = outcome.status.unwrap();
        assert_eq!(status.matches, 1);
        assert_eq!(store.alert_count(), 1);
    }

    fn parse(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }
}
