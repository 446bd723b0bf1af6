//! StateStore: persists per-rule checkpoints, alert records, silences, and
//! errors to a writeback index.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::StoreResult;
use crate::model::{AlertRecord, SilenceRecord, StatusRecord};

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_last_status(&self, rule_name: &str) -> StoreResult<Option<StatusRecord>>;
    async fn put_status(&self, record: &StatusRecord) -> StoreResult<()>;

    /// Returns the new record's id — becomes `aggregate_id` for siblings.
    async fn put_alert(&self, record: &AlertRecord) -> StoreResult<String>;
    async fn get_pending_alerts(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> StoreResult<Vec<(String, AlertRecord)>>;
    async fn get_aggregate_siblings(&self, aggregate_id: &str) -> StoreResult<Vec<(String, AlertRecord)>>;
    async fn delete_alert(&self, id: &str) -> StoreResult<()>;

    async fn get_newest_silence(&self, key: &str) -> StoreResult<Option<SilenceRecord>>;
    async fn put_silence(&self, record: &SilenceRecord) -> StoreResult<()>;

    async fn put_error(&self, message: &str, traceback: &[String], data: Option<serde_json::Value>) -> StoreResult<()>;
}
