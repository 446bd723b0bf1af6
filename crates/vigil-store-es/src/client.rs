//! `EsQueryClient`: the concrete [`QueryClient`] speaking the wire shapes
//! of `crate::wire` over an Elasticsearch-shaped `_search`/`_count` API.

use std::sync::Arc;

use async_trait::async_trait;
use vigil_core::ports::{
    CountResponse, QueryClient, SearchBody, SearchHit, SearchResponse, StoreError, StoreResult,
    TermBucket, TermsResponse,
};

use crate::transport::EsTransport;
use crate::wire;

pub struct EsQueryClient {
    transport: Arc<EsTransport>,
}

impl EsQueryClient {
    pub fn new(transport: Arc<EsTransport>) -> Self {
        Self { transport }
    }

    fn doc_path(index: &str, doc_type: Option<&str>, suffix: &str) -> String {
        match doc_type {
            Some(dt) => format!("{index}/{dt}/{suffix}"),
            None => format!("{index}/{suffix}"),
        }
    }
}

fn total_hits(raw: &serde_json::Value) -> u64 {
    match raw.pointer("/hits/total") {
        Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(serde_json::Value::Object(obj)) => obj.get("value").and_then(|v| v.as_u64()).unwrap_or(0),
        _ => 0,
    }
}

#[async_trait]
impl QueryClient for EsQueryClient {
    async fn search(
        &self,
        index: &str,
        body: &SearchBody,
        size: usize,
        source_fields: &[String],
    ) -> StoreResult<SearchResponse> {
        let mut wire_body = wire::search_body(body);
        wire_body["size"] = serde_json::json!(size);
        if !source_fields.is_empty() {
            wire_body["_source"] = serde_json::json!(source_fields);
        }
        let raw = self.transport.post_json(&format!("{index}/_search"), &wire_body).await?;
        let total = total_hits(&raw);
        let hits = raw
            .pointer("/hits/hits")
            .and_then(|v| v.as_array())
            .ok_or_else(|| StoreError::structural("search response missing hits.hits array"))?
            .iter()
            .map(|hit| SearchHit {
                id: hit.get("_id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                source: hit.get("_source").cloned().unwrap_or(serde_json::Value::Null),
            })
            .collect();
        Ok(SearchResponse { hits, total })
    }

    async fn count(&self, index: &str, doc_type: Option<&str>, body: &SearchBody) -> StoreResult<CountResponse> {
        let wire_body = wire::count_body(body);
        let path = Self::doc_path(index, doc_type, "_count");
        let raw = self.transport.post_json(&path, &wire_body).await?;
        let count = raw
            .get("count")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| StoreError::structural("count response missing count field"))?;
        Ok(CountResponse { count })
    }

    async fn terms(
        &self,
        index: &str,
        doc_type: Option<&str>,
        body: &SearchBody,
        field: &str,
        size: usize,
    ) -> StoreResult<TermsResponse> {
        let wire_body = wire::terms_body(body, field, size);
        let path = format!("{}?search_type=count", Self::doc_path(index, doc_type, "_search"));
        let raw = self.transport.post_json(&path, &wire_body).await?;
        let buckets = raw
            .pointer("/aggregations/filtered/counts/buckets")
            .and_then(|v| v.as_array())
            .ok_or_else(|| StoreError::structural("terms response missing aggregation buckets"))?
            .iter()
            .map(|b| TermBucket {
                key: b.get("key").map(value_as_key).unwrap_or_default(),
                doc_count: b.get("doc_count").and_then(|v| v.as_u64()).unwrap_or(0),
            })
            .collect();
        Ok(TermsResponse { buckets })
    }

    async fn create(&self, index: &str, doc_type: Option<&str>, body: serde_json::Value) -> StoreResult<String> {
        let path = Self::doc_path(index, doc_type, "");
        let raw = self.transport.post_json(&path, &body).await?;
        raw.get("_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| StoreError::structural("create response missing _id"))
    }

    async fn delete(&self, index: &str, doc_type: Option<&str>, id: &str) -> StoreResult<()> {
        let path = Self::doc_path(index, doc_type, id);
        self.transport.delete(&path).await
    }
}

fn value_as_key(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
