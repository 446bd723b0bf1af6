use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::logging::LoggingConfig;
use crate::types::HumanDuration;

/// Raw TOML shape of the top-level engine config file.
#[derive(Debug, Deserialize)]
pub struct EngineConfigRaw {
    #[serde(default = "default_es_host")]
    pub es_host: String,
    #[serde(default = "default_es_port")]
    pub es_port: u16,
    #[serde(default = "default_writeback_index")]
    pub writeback_index: String,
    #[serde(default = "default_run_every")]
    pub run_every: HumanDuration,
    #[serde(default = "default_buffer_time")]
    pub buffer_time: HumanDuration,
    #[serde(default = "default_max_query_size")]
    pub max_query_size: usize,
    #[serde(default = "default_old_query_limit")]
    pub old_query_limit: HumanDuration,
    #[serde(default = "default_alert_time_limit")]
    pub alert_time_limit: HumanDuration,
    #[serde(default = "default_rules_folder")]
    pub rules_folder: PathBuf,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_es_host() -> String {
    "localhost".to_string()
}
fn default_es_port() -> u16 {
    9200
}
fn default_writeback_index() -> String {
    "elastalert_status".to_string()
}
fn default_run_every() -> HumanDuration {
    "1m".parse().expect("valid default duration")
}
fn default_buffer_time() -> HumanDuration {
    "45m".parse().expect("valid default duration")
}
fn default_max_query_size() -> usize {
    10_000
}
fn default_old_query_limit() -> HumanDuration {
    "1d".parse().expect("valid default duration")
}
fn default_alert_time_limit() -> HumanDuration {
    "2d".parse().expect("valid default duration")
}
fn default_rules_folder() -> PathBuf {
    PathBuf::from("rules")
}

/// Resolved, validated engine-wide configuration. Per-rule options fall back
/// to these values when left unset.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub es_host: String,
    pub es_port: u16,
    pub writeback_index: String,
    pub run_every: HumanDuration,
    pub buffer_time: HumanDuration,
    pub max_query_size: usize,
    pub old_query_limit: HumanDuration,
    pub alert_time_limit: HumanDuration,
    pub rules_folder: PathBuf,
    pub debug: bool,
    pub verbose: bool,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    pub fn from_raw(raw: EngineConfigRaw) -> anyhow::Result<Self> {
        if raw.es_host.trim().is_empty() {
            anyhow::bail!("es_host must not be empty");
        }
        if raw.run_every.is_zero() {
            anyhow::bail!("run_every must be > 0");
        }
        if raw.max_query_size == 0 {
            anyhow::bail!("max_query_size must be > 0");
        }
        Ok(Self {
            es_host: raw.es_host,
            es_port: raw.es_port,
            writeback_index: raw.writeback_index,
            run_every: raw.run_every,
            buffer_time: raw.buffer_time,
            max_query_size: raw.max_query_size,
            old_query_limit: raw.old_query_limit,
            alert_time_limit: raw.alert_time_limit,
            rules_folder: raw.rules_folder,
            debug: raw.debug,
            verbose: raw.verbose,
            logging: raw.logging,
        })
    }

    pub fn parse_toml(text: &str) -> anyhow::Result<Self> {
        let raw: EngineConfigRaw = toml::from_str(text)?;
        Self::from_raw(raw)
    }

    /// Read and parse the engine config file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading engine config {}", path.display()))?;
        Self::parse_toml(&text).with_context(|| format!("parsing engine config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_on_empty_config() {
        let cfg = EngineConfig::parse_toml("").unwrap();
        assert_eq!(cfg.es_host, "localhost");
        assert_eq!(cfg.es_port, 9200);
        assert_eq!(cfg.writeback_index, "elastalert_status");
        assert_eq!(cfg.rules_folder, PathBuf::from("rules"));
        assert!(!cfg.debug);
    }

    #[test]
    fn overrides_apply() {
        let toml = r#"
es_host = "es.internal"
es_port = 9201
writeback_index = "vigil_status"
run_every = "30s"
rules_folder = "/etc/vigil/rules"
debug = true
"#;
        let cfg = EngineConfig::parse_toml(toml).unwrap();
        assert_eq!(cfg.es_host, "es.internal");
        assert_eq!(cfg.es_port, 9201);
        assert_eq!(cfg.writeback_index, "vigil_status");
        assert_eq!(cfg.run_every.as_duration().as_secs(), 30);
        assert_eq!(cfg.rules_folder, PathBuf::from("/etc/vigil/rules"));
        assert!(cfg.debug);
    }

    #[test]
    fn rejects_empty_host() {
        assert!(EngineConfig::parse_toml(r#"es_host = "" "#).is_err());
    }

    #[test]
    fn rejects_zero_max_query_size() {
        assert!(EngineConfig::parse_toml("max_query_size = 0").is_err());
    }

    #[test]
    fn load_reads_and_parses_file() {
        let path = std::env::temp_dir().join(format!("vigil-engine-config-test-{}.toml", std::process::id()));
        std::fs::write(&path, "es_host = \"es.example\"\n").unwrap();
        let cfg = EngineConfig::load(&path).unwrap();
        assert_eq!(cfg.es_host, "es.example");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn load_missing_file_errors() {
        assert!(EngineConfig::load(&PathBuf::from("/nonexistent/vigil/config.toml")).is_err());
    }
}
