//! Wire-body construction for the Elasticsearch-shaped HTTP contract
//!: the `filter.bool.must` + range
//! clause shape for hits, `query.filtered` for counts, and the
//! `aggs.filtered.aggs.counts.terms` wrap for terms aggregations. These are
//! pure functions over `serde_json::Value` so the shape can be unit tested
//! without a server.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use vigil_core::ports::SearchBody;

/// Flattens the rule's configured `filters` (a single filter object or an
/// array of them) into one `must` array, alongside the timestamp range
/// clause every query carries.
fn build_must(body: &SearchBody) -> Vec<Value> {
    let mut must = Vec::new();
    match &body.filters {
        Value::Array(items) => must.extend(items.iter().cloned()),
        Value::Null => {}
        other => must.push(other.clone()),
    }
    must.push(range_clause(&body.timestamp_field, body.start, body.end));
    must
}

fn range_clause(timestamp_field: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Value {
    let mut range = serde_json::Map::new();
    range.insert(
        timestamp_field.to_string(),
        json!({ "gt": start.to_rfc3339(), "lte": end.to_rfc3339() }),
    );
    json!({ "range": Value::Object(range) })
}

fn filtered_query(body: &SearchBody) -> Value {
    json!({
        "filtered": {
            "filter": {
                "bool": { "must": build_must(body) }
            }
        }
    })
}

/// `/{index}/_search` body for a hits query: `query.filtered` plus an
/// ascending/descending sort on `timestamp_field`.
pub fn search_body(body: &SearchBody) -> Value {
    let order = if body.sort_ascending { "asc" } else { "desc" };
    let mut sort_field = serde_json::Map::new();
    sort_field.insert(body.timestamp_field.clone(), json!({ "order": order }));
    json!({
        "query": filtered_query(body),
        "sort": [Value::Object(sort_field)],
    })
}

/// `/{index}/_count` body: just the filtered query, no sort.
pub fn count_body(body: &SearchBody) -> Value {
    json!({ "query": filtered_query(body) })
}

/// `/{index}/_search?search_type=count` body: the same filter, wrapped as
/// a term aggregation under `aggs.filtered.aggs.counts.terms`, matching the
/// original's `get_hits_terms` aggregation shape.
pub fn terms_body(body: &SearchBody, field: &str, size: usize) -> Value {
    let filter = json!({ "bool": { "must": build_must(body) } });
    json!({
        "query": { "filtered": { "filter": filter.clone() } },
        "aggs": {
            "filtered": {
                "filter": filter,
                "aggs": {
                    "counts": {
                        "terms": { "field": field, "size": size }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_body(filters: Value) -> SearchBody {
        SearchBody {
            filters,
            timestamp_field: "@timestamp".to_string(),
            start: Utc.timestamp_opt(0, 0).unwrap(),
            end: Utc.timestamp_opt(60, 0).unwrap(),
            sort_ascending: true,
        }
    }

    #[test]
    fn search_body_wraps_filters_and_range() {
        let body = sample_body(json!([{"term": {"level": "error"}}]));
        let wire = search_body(&body);
        let must = wire["query"]["filtered"]["filter"]["bool"]["must"].as_array().unwrap();
        assert_eq!(must.len(), 2);
        assert_eq!(must[0], json!({"term": {"level": "error"}}));
        assert_eq!(must[1]["range"]["@timestamp"]["gt"], json!("1970-01-01T00:00:00+00:00"));
        assert_eq!(wire["sort"][0]["@timestamp"]["order"], json!("asc"));
    }

    #[test]
    fn single_object_filter_is_wrapped_not_flattened() {
        let body = sample_body(json!({"term": {"level": "error"}}));
        let wire = search_body(&body);
        let must = wire["query"]["filtered"]["filter"]["bool"]["must"].as_array().unwrap();
        assert_eq!(must.len(), 2);
        assert_eq!(must[0], json!({"term": {"level": "error"}}));
    }

    #[test]
    fn null_filters_produce_only_the_range_clause() {
        let body = sample_body(Value::Null);
        let wire = search_body(&body);
        let must = wire["query"]["filtered"]["filter"]["bool"]["must"].as_array().unwrap();
        assert_eq!(must.len(), 1);
    }

    #[test]
    fn count_body_has_no_sort() {
        let body = sample_body(Value::Null);
        let wire = count_body(&body);
        assert!(wire.get("sort").is_none());
        assert!(wire.get("query").is_some());
    }

    #[test]
    fn terms_body_wraps_counts_terms_aggregation() {
        let body = sample_body(Value::Null);
        let wire = terms_body(&body, "user", 50);
        assert_eq!(wire["aggs"]["filtered"]["aggs"]["counts"]["terms"]["field"], json!("user"));
        assert_eq!(wire["aggs"]["filtered"]["aggs"]["counts"]["terms"]["size"], json!(50));
        assert!(wire["aggs"]["filtered"]["filter"]["bool"]["must"].is_array());
    }
}
