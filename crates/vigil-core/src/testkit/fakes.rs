use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{AlertRecord, SilenceRecord, StatusRecord};
use crate::ports::{
    CountResponse, QueryClient, SearchBody, SearchResponse, StateStore, StoreError, StoreResult,
    TermsResponse,
};

/// A `QueryClient` whose responses are queued up front by the test, one per
/// call of each kind. Calling past the end of a queue is a test bug and
/// panics loudly rather than silently returning a default.
#[derive(Default)]
pub struct FakeQueryClient {
    search_responses: Mutex<VecDeque<StoreResult<SearchResponse>>>,
    count_responses: Mutex<VecDeque<StoreResult<CountResponse>>>,
    terms_responses: Mutex<VecDeque<StoreResult<TermsResponse>>>,
    pub search_calls: Mutex<Vec<(String, DateTime<Utc>, DateTime<Utc>)>>,
}

impl FakeQueryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_search(&self, response: StoreResult<SearchResponse>) {
        self.search_responses.lock().unwrap().push_back(response);
    }

    pub fn push_count(&self, response: StoreResult<CountResponse>) {
        self.count_responses.lock().unwrap().push_back(response);
    }

    pub fn push_terms(&self, response: StoreResult<TermsResponse>) {
        self.terms_responses.lock().unwrap().push_back(response);
    }
}

#[async_trait]
impl QueryClient for FakeQueryClient {
    async fn search(
        &self,
        index: &str,
        body: &SearchBody,
        _size: usize,
        _source_fields: &[String],
    ) -> StoreResult<SearchResponse> {
        self.search_calls
            .lock()
            .unwrap()
            .push((index.to_string(), body.start, body.end));
        self.search_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(SearchResponse::default()))
    }

    async fn count(&self, _index: &str, _doc_type: Option<&str>, _body: &SearchBody) -> StoreResult<CountResponse> {
        self.count_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(CountResponse::default()))
    }

    async fn terms(
        &self,
        _index: &str,
        _doc_type: Option<&str>,
        _body: &SearchBody,
        _field: &str,
        _size: usize,
    ) -> StoreResult<TermsResponse> {
        self.terms_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(TermsResponse::default()))
    }

    async fn create(&self, _index: &str, _doc_type: Option<&str>, _body: serde_json::Value) -> StoreResult<String> {
        Ok("fake-id".to_string())
    }

    async fn delete(&self, _index: &str, _doc_type: Option<&str>, _id: &str) -> StoreResult<()> {
        Ok(())
    }
}

/// An in-memory `StateStore`. Alert ids are assigned sequentially
/// (`"alert-0"`, `"alert-1"`, ...).
#[derive(Default)]
pub struct FakeStateStore {
    statuses: Mutex<HashMap<String, StatusRecord>>,
    alerts: Mutex<HashMap<String, AlertRecord>>,
    silences: Mutex<HashMap<String, SilenceRecord>>,
    pub errors: Mutex<Vec<String>>,
    next_id: Mutex<u64>,
    /// When set, every write call fails with this message (simulates the
    /// store going dead mid-tick).
    pub fail_writes: Mutex<Option<String>>,
}

impl FakeStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_guard(&self) -> StoreResult<()> {
        if let Some(msg) = self.fail_writes.lock().unwrap().clone() {
            return Err(StoreError::transient(msg));
        }
        Ok(())
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

#[async_trait]
impl StateStore for FakeStateStore {
    async fn get_last_status(&self, rule_name: &str) -> StoreResult<Option<StatusRecord>> {
        Ok(self.statuses.lock().unwrap().get(rule_name).cloned())
    }

    async fn put_status(&self, record: &StatusRecord) -> StoreResult<()> {
        self.write_guard()?;
        self.statuses
            .lock()
            .unwrap()
            .insert(record.rule_name.clone(), record.clone());
        Ok(())
    }

    async fn put_alert(&self, record: &AlertRecord) -> StoreResult<String> {
        self.write_guard()?;
        let mut next_id = self.next_id.lock().unwrap();
        let id = format!("alert-{next_id}");
        *next_id += 1;
        self.alerts.lock().unwrap().insert(id.clone(), record.clone());
        Ok(id)
    }

    async fn get_pending_alerts(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> StoreResult<Vec<(String, AlertRecord)>> {
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| !r.alert_sent && r.alert_time >= since && r.alert_time <= until)
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect())
    }

    async fn get_aggregate_siblings(&self, aggregate_id: &str) -> StoreResult<Vec<(String, AlertRecord)>> {
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, r)| id.as_str() == aggregate_id || r.aggregate_id.as_deref() == Some(aggregate_id))
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect())
    }

    async fn delete_alert(&self, id: &str) -> StoreResult<()> {
        self.write_guard()?;
        self.alerts.lock().unwrap().remove(id);
        Ok(())
    }

    async fn get_newest_silence(&self, key: &str) -> StoreResult<Option<SilenceRecord>> {
        Ok(self.silences.lock().unwrap().get(key).cloned())
    }

    async fn put_silence(&self, record: &SilenceRecord) -> StoreResult<()> {
        self.write_guard()?;
        let mut silences = self.silences.lock().unwrap();
        let replace = match silences.get(&record.rule_name) {
            Some(existing) => record.until >= existing.until,
            None => true,
        };
        if replace {
            silences.insert(record.rule_name.clone(), record.clone());
        }
        Ok(())
    }

    async fn put_error(&self, message: &str, _traceback: &[String], _data: Option<serde_json::Value>) -> StoreResult<()> {
        self.errors.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// Records every delivered batch. Can be configured to fail delivery with a
/// fixed message to exercise the retry path.
#[derive(Default)]
pub struct RecordingAlerter {
    pub delivered: Mutex<Vec<Vec<serde_json::Value>>>,
    pub fail_with: Option<String>,
    pub name: String,
}

impl RecordingAlerter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail_with: Some(message.into()),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn delivered_batches(&self) -> Vec<Vec<serde_json::Value>> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl crate::ports::AlerterPort for RecordingAlerter {
    async fn deliver(&self, matches: &[serde_json::Value]) -> Result<(), String> {
        if let Some(msg) = &self.fail_with {
            return Err(msg.clone());
        }
        self.delivered.lock().unwrap().push(matches.to_vec());
        Ok(())
    }

    fn describe(&self) -> crate::ports::AlerterInfo {
        crate::ports::AlerterInfo {
            alerter_type: self.name.clone(),
        }
    }
}
