//! QueryClient: a narrow, typed port over the backing document store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::StoreResult;

/// A single search hit: document id plus its source body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub source: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Clone)]
pub struct TermBucket {
    pub key: String,
    pub doc_count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct TermsResponse {
    pub buckets: Vec<TermBucket>,
}

/// The filter/range query body a caller builds once per query; opaque to everything except the concrete `QueryClient`
/// implementation, which knows how to serialize it for its backing store.
#[derive(Debug, Clone)]
pub struct SearchBody {
    pub filters: serde_json::Value,
    pub timestamp_field: String,
    pub start: chrono::DateTime<chrono::Utc>,
    pub end: chrono::DateTime<chrono::Utc>,
    /// Ascending sort by `timestamp_field` (hit queries only).
    pub sort_ascending: bool,
}

#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn search(
        &self,
        index: &str,
        body: &SearchBody,
        size: usize,
        source_fields: &[String],
    ) -> StoreResult<SearchResponse>;

    async fn count(&self, index: &str, doc_type: Option<&str>, body: &SearchBody) -> StoreResult<CountResponse>;

    async fn terms(
        &self,
        index: &str,
        doc_type: Option<&str>,
        body: &SearchBody,
        field: &str,
        size: usize,
    ) -> StoreResult<TermsResponse>;

    async fn create(&self, index: &str, doc_type: Option<&str>, body: serde_json::Value) -> StoreResult<String>;

    async fn delete(&self, index: &str, doc_type: Option<&str>, id: &str) -> StoreResult<()>;
}
