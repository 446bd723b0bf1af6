//! Builds queries, chunks long windows, dedups hits, feeds the detector.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use vigil_config::RuleConfig;
use vigil_config::QueryMode;

use crate::model::RuntimeState;
use crate::ports::{DetectorPort, QueryClient, SearchBody, StoreResult};
use crate::time_ops;
use crate::{vg_debug, vg_warn};

/// Outcome of a single `run_query` call, used to accumulate the tick's
/// `StatusRecord` totals.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOutcome {
    pub hits: u64,
}

/// `run_query(rule, start, end) -> ok|fail`.
///
/// Dedup, `processed_ids` bookkeeping, and detector feeding all happen here;
/// the caller (`RuleRuntime::tick`) only drives window chunking and checkpoint
/// advancement.
pub async fn run_query(
    client: &dyn QueryClient,
    rule: &RuleConfig,
    state: &mut RuntimeState,
    detector: &mut dyn DetectorPort,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> StoreResult<QueryOutcome> {
    let index = time_ops::format_index(&rule.index_pattern, start, end);
    let body = SearchBody {
        filters: rule.filters.clone(),
        timestamp_field: rule.timestamp_field.clone(),
        start,
        end,
        sort_ascending: true,
    };

    match rule.query_mode {
        QueryMode::Hits => run_hits(client, rule, state, detector, &index, &body).await,
        QueryMode::Count => run_count(client, rule, detector, &index, &body, end).await,
        QueryMode::Terms => run_terms(client, rule, detector, &index, &body, end).await,
    }
}

async fn run_hits(
    client: &dyn QueryClient,
    rule: &RuleConfig,
    state: &mut RuntimeState,
    detector: &mut dyn DetectorPort,
    index: &str,
    body: &SearchBody,
) -> StoreResult<QueryOutcome> {
    let response = client
        .search(index, body, rule.max_query_size, &rule.included_fields)
        .await?;

    let received = response.hits.len();
    if received == rule.max_query_size {
        // Best-effort under ceiling: callers must not adjust the checkpoint
        // to compensate.
        vg_warn!(
            pipe,
            rule = %rule.name,
            max_query_size = rule.max_query_size,
            "query returned exactly max_query_size hits; data may be lost to the ceiling"
        );
    }

    let mut surviving = Vec::with_capacity(received);
    for hit in response.hits {
        if state.processed_ids.contains_key(&hit.id) {
            continue;
        }
        let ts = hit
            .source
            .get(&rule.timestamp_field)
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(body.end);
        state.processed_ids.insert(hit.id, ts);
        surviving.push(hit.source);
    }

    let hits = surviving.len() as u64;
    vg_debug!(pipe, rule = %rule.name, index = index, hits = hits, "hits query complete");
    detector.add_data(surviving);
    Ok(QueryOutcome { hits })
}

async fn run_count(
    client: &dyn QueryClient,
    rule: &RuleConfig,
    detector: &mut dyn DetectorPort,
    index: &str,
    body: &SearchBody,
    end: DateTime<Utc>,
) -> StoreResult<QueryOutcome> {
    let response = client.count(index, rule.doc_type.as_deref(), body).await?;
    let mut counts = BTreeMap::new();
    counts.insert(end, response.count);
    detector.add_count_data(counts);
    Ok(QueryOutcome { hits: response.count })
}

async fn run_terms(
    client: &dyn QueryClient,
    rule: &RuleConfig,
    detector: &mut dyn DetectorPort,
    index: &str,
    body: &SearchBody,
    end: DateTime<Utc>,
) -> StoreResult<QueryOutcome> {
    let field = rule
        .terms_key
        .as_deref()
        .expect("RuleConfig::validate rejects terms mode without terms_key");
    let response = client
        .terms(index, rule.doc_type.as_deref(), body, field, rule.terms_size)
        .await?;
    let total: u64 = response.buckets.iter().map(|b| b.doc_count).sum();
    let mut buckets = BTreeMap::new();
    buckets.insert(end, response.buckets);
    detector.add_terms_data(buckets);
    Ok(QueryOutcome { hits: total })
}
