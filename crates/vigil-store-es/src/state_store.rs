//! `EsStateStore`: persists rule checkpoints, alert records, silences, and
//! errors against the writeback index's four doc types:
//! `elastalert_status`, `elastalert`, `silence`, `elastalert_error`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use vigil_core::model::{AlertRecord, SilenceRecord, StatusRecord};
use vigil_core::ports::{StateStore, StoreError, StoreResult};

use crate::transport::EsTransport;

const STATUS_TYPE: &str = "elastalert_status";
const ALERT_TYPE: &str = "elastalert";
const SILENCE_TYPE: &str = "silence";
const ERROR_TYPE: &str = "elastalert_error";

pub struct EsStateStore {
    transport: Arc<EsTransport>,
    writeback_index: String,
}

impl EsStateStore {
    pub fn new(transport: Arc<EsTransport>, writeback_index: impl Into<String>) -> Self {
        Self {
            transport,
            writeback_index: writeback_index.into(),
        }
    }

    fn search_path(&self, doc_type: &str) -> String {
        format!("{}/{}/_search", self.writeback_index, doc_type)
    }

    fn create_path(&self, doc_type: &str) -> String {
        format!("{}/{}/", self.writeback_index, doc_type)
    }

    fn delete_path(&self, doc_type: &str, id: &str) -> String {
        format!("{}/{}/{}", self.writeback_index, doc_type, id)
    }

    async fn newest_by_term(&self, doc_type: &str, field: &str, value: &str) -> StoreResult<Option<(String, Value)>> {
        let body = term_query_sorted(field, value, "@timestamp", false, 1);
        let raw = self.transport.post_json(&self.search_path(doc_type), &body).await?;
        let hits = raw
            .pointer("/hits/hits")
            .and_then(|v| v.as_array())
            .ok_or_else(|| StoreError::structural("search response missing hits.hits array"))?;
        match hits.first() {
            Some(hit) => {
                let id = hit.get("_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let source = hit.get("_source").cloned().unwrap_or(Value::Null);
                Ok(Some((id, source)))
            }
            None => Ok(None),
        }
    }

    async fn search_by_term(&self, doc_type: &str, field: &str, value: &str) -> StoreResult<Vec<(String, Value)>> {
        let body = term_query_sorted(field, value, "@timestamp", true, 10_000);
        let raw = self.transport.post_json(&self.search_path(doc_type), &body).await?;
        let hits = raw
            .pointer("/hits/hits")
            .and_then(|v| v.as_array())
            .ok_or_else(|| StoreError::structural("search response missing hits.hits array"))?;
        Ok(hits
            .iter()
            .map(|hit| {
                let id = hit.get("_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let source = hit.get("_source").cloned().unwrap_or(Value::Null);
                (id, source)
            })
            .collect())
    }
}

fn term_query_sorted(field: &str, value: &str, sort_field: &str, ascending: bool, size: usize) -> Value {
    let mut term = Map::new();
    term.insert(field.to_string(), json!(value));
    let mut sort = Map::new();
    sort.insert(sort_field.to_string(), json!({ "order": if ascending { "asc" } else { "desc" } }));
    json!({
        "query": { "filtered": { "filter": { "term": Value::Object(term) } } },
        "sort": [Value::Object(sort)],
        "size": size,
    })
}

fn decode<T: serde::de::DeserializeOwned>(source: Value) -> StoreResult<T> {
    serde_json::from_value(source).map_err(|e| StoreError::structural(format!("malformed document: {e}")))
}

#[async_trait]
impl StateStore for EsStateStore {
    async fn get_last_status(&self, rule_name: &str) -> StoreResult<Option<StatusRecord>> {
        match self.newest_by_term(STATUS_TYPE, "rule_name", rule_name).await? {
            Some((_, source)) => Ok(Some(decode(source)?)),
            None => Ok(None),
        }
    }

    async fn put_status(&self, record: &StatusRecord) -> StoreResult<()> {
        let body = serde_json::to_value(record).map_err(|e| StoreError::structural(e.to_string()))?;
        self.transport.post_json(&self.create_path(STATUS_TYPE), &body).await?;
        Ok(())
    }

    async fn put_alert(&self, record: &AlertRecord) -> StoreResult<String> {
        let body = serde_json::to_value(record).map_err(|e| StoreError::structural(e.to_string()))?;
        let raw = self.transport.post_json(&self.create_path(ALERT_TYPE), &body).await?;
        raw.get("_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| StoreError::structural("create response missing _id"))
    }

    async fn get_pending_alerts(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> StoreResult<Vec<(String, AlertRecord)>> {
        let mut term = Map::new();
        term.insert("alert_sent".to_string(), json!(false));
        let body = json!({
            "query": {
                "filtered": {
                    "filter": {
                        "bool": {
                            "must": [
                                { "term": Value::Object(term) },
                                { "range": { "alert_time": { "gte": since.to_rfc3339(), "lte": until.to_rfc3339() } } },
                            ]
                        }
                    }
                }
            },
            "size": 10_000,
        });
        let raw = self.transport.post_json(&self.search_path(ALERT_TYPE), &body).await?;
        let hits = raw
            .pointer("/hits/hits")
            .and_then(|v| v.as_array())
            .ok_or_else(|| StoreError::structural("search response missing hits.hits array"))?;
        hits.iter()
            .map(|hit| {
                let id = hit.get("_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let source = hit.get("_source").cloned().unwrap_or(Value::Null);
                Ok((id, decode::<AlertRecord>(source)?))
            })
            .collect()
    }

    async fn get_aggregate_siblings(&self, aggregate_id: &str) -> StoreResult<Vec<(String, AlertRecord)>> {
        self.search_by_term(ALERT_TYPE, "aggregate_id", aggregate_id)
            .await?
            .into_iter()
            .map(|(id, source)| Ok((id, decode::<AlertRecord>(source)?)))
            .collect()
    }

    async fn delete_alert(&self, id: &str) -> StoreResult<()> {
        self.transport.delete(&self.delete_path(ALERT_TYPE, id)).await
    }

    async fn get_newest_silence(&self, key: &str) -> StoreResult<Option<SilenceRecord>> {
        match self.newest_by_term(SILENCE_TYPE, "rule_name", key).await? {
            Some((_, source)) => Ok(Some(decode(source)?)),
            None => Ok(None),
        }
    }

    async fn put_silence(&self, record: &SilenceRecord) -> StoreResult<()> {
        let body = serde_json::to_value(record).map_err(|e| StoreError::structural(e.to_string()))?;
        self.transport.post_json(&self.create_path(SILENCE_TYPE), &body).await?;
        Ok(())
    }

    async fn put_error(&self, message: &str, traceback: &[String], data: Option<Value>) -> StoreResult<()> {
        let body = json!({
            "message": message,
            "traceback": traceback,
            "data": data,
            "@timestamp": Utc::now().to_rfc3339(),
        });
        self.transport.post_json(&self.create_path(ERROR_TYPE), &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_query_wraps_single_field_and_sort() {
        let wire = term_query_sorted("rule_name", "too_many_errors", "@timestamp", false, 1);
        assert_eq!(
            wire["query"]["filtered"]["filter"]["term"]["rule_name"],
            json!("too_many_errors")
        );
        assert_eq!(wire["sort"][0]["@timestamp"]["order"], json!("desc"));
        assert_eq!(wire["size"], json!(1));
    }
}
