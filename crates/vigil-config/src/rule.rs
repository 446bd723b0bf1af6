use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

/// How a rule's query is dispatched against the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    Hits,
    Count,
    Terms,
}

impl Default for QueryMode {
    fn default() -> Self {
        QueryMode::Hits
    }
}

/// Raw TOML shape of a rule file, before defaults/validation are resolved.
#[derive(Debug, Deserialize)]
pub struct RuleConfigRaw {
    pub name: String,
    #[serde(default)]
    pub filters: serde_json::Value,
    pub index_pattern: String,
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub included_fields: Vec<String>,
    #[serde(default)]
    pub query_mode: QueryMode,
    #[serde(default)]
    pub terms_key: Option<String>,
    #[serde(default = "default_terms_size")]
    pub terms_size: usize,

    pub run_every: HumanDuration,
    pub buffer_time: HumanDuration,
    #[serde(default)]
    pub query_delay: Option<HumanDuration>,
    #[serde(default = "default_max_query_size")]
    pub max_query_size: usize,
    #[serde(default = "default_old_query_limit")]
    pub old_query_limit: HumanDuration,

    #[serde(default = "HumanDuration::zero")]
    pub realert: HumanDuration,
    #[serde(default)]
    pub aggregation: Option<HumanDuration>,
    #[serde(default)]
    pub query_key: Option<String>,

    #[serde(default)]
    pub use_local_time: bool,

    #[serde(default)]
    pub enhancements: Vec<String>,
    #[serde(default)]
    pub sinks: Vec<String>,
    #[serde(default)]
    pub detector: Option<String>,

    pub es_host: String,
    #[serde(default = "default_es_port")]
    pub es_port: u16,
}

fn default_timestamp_field() -> String {
    "@timestamp".to_string()
}
fn default_terms_size() -> usize {
    50
}
fn default_max_query_size() -> usize {
    10_000
}
fn default_old_query_limit() -> HumanDuration {
    "1d".parse().expect("valid default duration")
}
fn default_es_port() -> u16 {
    9200
}

/// Immutable, resolved per-rule configuration: every recognized option is a
/// named, typed field rather than a dynamic key/value bag.
#[derive(Debug, Clone)]
pub struct RuleConfig {
    pub name: String,
    pub source_path: PathBuf,
    pub content_hash: String,

    pub filters: serde_json::Value,
    pub index_pattern: String,
    pub timestamp_field: String,
    pub doc_type: Option<String>,
    pub included_fields: Vec<String>,
    pub query_mode: QueryMode,
    pub terms_key: Option<String>,
    pub terms_size: usize,

    pub run_every: HumanDuration,
    pub buffer_time: HumanDuration,
    pub query_delay: Option<HumanDuration>,
    pub max_query_size: usize,
    pub old_query_limit: HumanDuration,

    pub realert: HumanDuration,
    pub aggregation: Option<HumanDuration>,
    pub query_key: Option<String>,

    pub use_local_time: bool,

    pub enhancements: Vec<String>,
    pub sinks: Vec<String>,
    pub detector: Option<String>,

    pub es_host: String,
    pub es_port: u16,
}

impl RuleConfig {
    /// Validate cross-field invariants that a plain `Deserialize` can't express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("rule name must not be empty ({})", self.source_path.display());
        }
        if self.index_pattern.trim().is_empty() {
            anyhow::bail!("rule {:?}: index_pattern must not be empty", self.name);
        }
        if self.buffer_time.is_zero() {
            anyhow::bail!("rule {:?}: buffer_time must be > 0", self.name);
        }
        if self.run_every.is_zero() {
            anyhow::bail!("rule {:?}: run_every must be > 0", self.name);
        }
        if self.query_mode == QueryMode::Terms && self.terms_key.is_none() {
            anyhow::bail!("rule {:?}: query_mode=terms requires terms_key", self.name);
        }
        if self.max_query_size == 0 {
            anyhow::bail!("rule {:?}: max_query_size must be > 0", self.name);
        }
        Ok(())
    }

    pub fn resolve(raw: RuleConfigRaw, source_path: PathBuf, content_hash: String) -> anyhow::Result<Self> {
        let cfg = RuleConfig {
            name: raw.name,
            source_path,
            content_hash,
            filters: raw.filters,
            index_pattern: raw.index_pattern,
            timestamp_field: raw.timestamp_field,
            doc_type: raw.doc_type,
            included_fields: raw.included_fields,
            query_mode: raw.query_mode,
            terms_key: raw.terms_key,
            terms_size: raw.terms_size,
            run_every: raw.run_every,
            buffer_time: raw.buffer_time,
            query_delay: raw.query_delay,
            max_query_size: raw.max_query_size,
            old_query_limit: raw.old_query_limit,
            realert: raw.realert,
            aggregation: raw.aggregation,
            query_key: raw.query_key,
            use_local_time: raw.use_local_time,
            enhancements: raw.enhancements,
            sinks: raw.sinks,
            detector: raw.detector,
            es_host: raw.es_host,
            es_port: raw.es_port,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
name = "too_many_errors"
index_pattern = "logs-*"
run_every = "1m"
buffer_time = "15m"
es_host = "localhost"
"#;

    #[test]
    fn resolve_minimal_rule() {
        let raw: RuleConfigRaw = toml::from_str(MINIMAL).unwrap();
        let cfg = RuleConfig::resolve(raw, PathBuf::from("rules/too_many_errors.toml"), "abc".into()).unwrap();
        assert_eq!(cfg.name, "too_many_errors");
        assert_eq!(cfg.timestamp_field, "@timestamp");
        assert_eq!(cfg.query_mode, QueryMode::Hits);
        assert_eq!(cfg.es_port, 9200);
        assert_eq!(cfg.max_query_size, 10_000);
        assert!(cfg.realert.is_zero());
    }

    #[test]
    fn terms_mode_requires_terms_key() {
        let toml = format!("{MINIMAL}\nquery_mode = \"terms\"\n");
        let raw: RuleConfigRaw = toml::from_str(&toml).unwrap();
        let err = RuleConfig::resolve(raw, PathBuf::from("r.toml"), "abc".into()).unwrap_err();
        assert!(err.to_string().contains("terms_key"));
    }

    #[test]
    fn zero_buffer_time_rejected() {
        let toml = MINIMAL.replace("buffer_time = \"15m\"", "buffer_time = \"0s\"");
        let raw: RuleConfigRaw = toml::from_str(&toml).unwrap();
        assert!(RuleConfig::resolve(raw, PathBuf::from("r.toml"), "abc".into()).is_err());
    }

    #[test]
    fn full_rule_with_aggregation_and_query_key() {
        let toml = format!(
            r#"{MINIMAL}
realert = "5m"
aggregation = "2m"
query_key = "user"
enhancements = ["geoip"]
sinks = ["chat"]
"#
        );
        let raw: RuleConfigRaw = toml::from_str(&toml).unwrap();
        let cfg = RuleConfig::resolve(raw, PathBuf::from("r.toml"), "h".into()).unwrap();
        assert_eq!(cfg.realert.as_duration().as_secs(), 300);
        assert_eq!(cfg.aggregation.unwrap().as_duration().as_secs(), 120);
        assert_eq!(cfg.query_key.as_deref(), Some("user"));
        assert_eq!(cfg.enhancements, vec!["geoip".to_string()]);
        assert_eq!(cfg.sinks, vec!["chat".to_string()]);
    }
}
