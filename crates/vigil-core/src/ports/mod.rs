//! Port traits every collaborator the core depends on must satisfy.

mod alerter;
mod detector;
mod enhancement;
mod query_client;
mod state_store;

pub use alerter::{AlerterInfo, AlerterPort};
pub use detector::DetectorPort;
pub use enhancement::{EnhancementOutcome, EnhancementPort};
pub use query_client::{
    CountResponse, QueryClient, SearchBody, SearchHit, SearchResponse, TermBucket, TermsResponse,
};
pub use state_store::StateStore;

use std::fmt;

/// Distinguishes a transient store failure (network, timeout, 5xx — retry
/// next tick) from a structural one (4xx, malformed response — report and
/// continue).
#[derive(Debug, Clone)]
pub enum StoreError {
    Transient(String),
    Structural(String),
}

impl StoreError {
    /// Truncate to at most 1024 characters before surfacing, to keep logs
    /// bounded.
    const MAX_LEN: usize = 1024;

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(Self::truncate(msg.into()))
    }

    pub fn structural(msg: impl Into<String>) -> Self {
        Self::Structural(Self::truncate(msg.into()))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Structural(m) => m,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    fn truncate(msg: String) -> String {
        if msg.len() <= Self::MAX_LEN {
            return msg;
        }
        let removed = msg.len() - Self::MAX_LEN;
        let mut truncated: String = msg.chars().take(Self::MAX_LEN).collect();
        truncated.push_str(&format!("... ({removed} characters removed)"));
        truncated
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient(m) => write!(f, "transient store error: {m}"),
            Self::Structural(m) => write!(f, "structural store error: {m}"),
        }
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_messages() {
        let long = "x".repeat(2000);
        let err = StoreError::transient(long);
        assert!(err.message().len() < 2000);
        assert!(err.message().starts_with("xxx"));
        assert!(err.message().contains("characters removed"));
    }

    #[test]
    fn short_messages_pass_through() {
        let err = StoreError::structural("not found");
        assert_eq!(err.message(), "not found");
    }

    #[test]
    fn transient_vs_structural() {
        assert!(StoreError::transient("timeout").is_transient());
        assert!(!StoreError::structural("bad request").is_transient());
    }
}
