//! Low-level HTTP plumbing shared by [`crate::client::EsQueryClient`] and
//! [`crate::state_store::EsStateStore`]: one `reqwest::Client` per
//! `(es_host, es_port)` pair, issuing requests and classifying failures
//! into [`vigil_core::ports::StoreError`]'s transient/structural split.

use vigil_core::ports::StoreError;
use vigil_core::{vg_warn, ports::StoreResult};

/// The 1024-char truncation is applied by `StoreError::{transient,structural}`
/// themselves; this module only decides which variant a failure becomes.
pub struct EsTransport {
    http: reqwest::Client,
    base_url: String,
}

impl EsTransport {
    pub fn new(http: reqwest::Client, es_host: &str, es_port: u16) -> Self {
        Self {
            http,
            base_url: format!("http://{es_host}:{es_port}"),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `POST {path}` with a JSON body, returning the decoded JSON response.
    pub async fn post_json(&self, path: &str, body: &serde_json::Value) -> StoreResult<serde_json::Value> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(classify_transport)?;
        Self::decode(resp).await
    }

    /// `DELETE {path}`, tolerating a 404 (already gone) as success.
    pub async fn delete(&self, path: &str) -> StoreResult<()> {
        let resp = self.http.delete(self.url(path)).send().await.map_err(classify_transport)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !resp.status().is_success() {
            return Err(classify_status(resp.status(), resp.text().await.unwrap_or_default()));
        }
        Ok(())
    }

    async fn decode(resp: reqwest::Response) -> StoreResult<serde_json::Value> {
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }
        let text = resp.text().await.map_err(classify_transport)?;
        if text.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| {
            vg_warn!(conn, "malformed response body: {e}");
            StoreError::structural(format!("malformed JSON response: {e}"))
        })
    }
}

fn classify_transport(err: reqwest::Error) -> StoreError {
    if err.is_timeout() || err.is_connect() {
        StoreError::transient(err.to_string())
    } else if let Some(status) = err.status() {
        classify_status(status, err.to_string())
    } else {
        StoreError::transient(err.to_string())
    }
}

fn classify_status(status: reqwest::StatusCode, body: String) -> StoreError {
    if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
        StoreError::transient(format!("{status}: {body}"))
    } else {
        StoreError::structural(format!("{status}: {body}"))
    }
}
