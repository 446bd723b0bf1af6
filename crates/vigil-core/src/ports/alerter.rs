//! AlerterPort: the capability surface every concrete alert sink satisfies
//!. Concrete sinks (email, chat, ticket system, ...) are out
//! of scope.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct AlerterInfo {
    pub alerter_type: String,
}

#[async_trait]
pub trait AlerterPort: Send + Sync {
    /// Deliver a batch of matches as one combined alert. `Err` carries the
    /// failure message.
    async fn deliver(&self, matches: &[serde_json::Value]) -> Result<(), String>;

    fn describe(&self) -> AlerterInfo;
}
