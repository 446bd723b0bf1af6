//! Process-wide cache of `EsTransport`s keyed by `(es_host, es_port)`
//!: rules sharing a
//! store endpoint reuse one underlying `reqwest::Client` instead of building
//! a fresh one per rule.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use orion_error::prelude::*;
use tokio::sync::RwLock;

use crate::error::{StoreReason, StoreResult};
use crate::transport::EsTransport;

type Key = (String, u16);

#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<Key, Arc<EsTransport>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(&self, es_host: &str, es_port: u16) -> StoreResult<Arc<EsTransport>> {
        let key: Key = (es_host.to_string(), es_port);
        if let Some(existing) = self.clients.read().await.get(&key) {
            return Ok(existing.clone());
        }
        let mut clients = self.clients.write().await;
        if let Some(existing) = clients.get(&key) {
            return Ok(existing.clone());
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .owe(StoreReason::ClientBuild)?;
        let transport = Arc::new(EsTransport::new(http, es_host, es_port));
        clients.insert(key, transport.clone());
        Ok(transport)
    }

    /// Drops a cached client.
    pub async fn evict(&self, es_host: &str, es_port: u16) {
        let key: Key = (es_host.to_string(), es_port);
        self.clients.write().await.remove(&key);
    }
}
