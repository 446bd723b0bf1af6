//! Resolves the name-lists a `RuleConfig` carries (`detector`, `sinks`,
//! `enhancements`) into concrete port implementations.
//!
//! Concrete detectors and concrete alert sinks are an explicit Non-goal
//! — `DefaultComponentFactory` falls back to
//! `vigil_core::testkit::FrequencyDetector` for any named (or unnamed)
//! detector, and resolves every named sink/enhancement to nothing, logging
//! once per rule so a misconfigured rule is visible rather than silently
//! inert.

use async_trait::async_trait;
use chrono::Duration;
use vigil_config::RuleConfig;
use vigil_core::ports::{AlerterInfo, AlerterPort, DetectorPort, EnhancementPort};
use vigil_core::testkit::FrequencyDetector;
use vigil_core::vg_warn;

/// Builds the three capability sets a loaded rule needs before its task can
/// start ticking.
pub trait ComponentFactory: Send + Sync {
    fn build_detector(&self, rule: &RuleConfig) -> Box<dyn DetectorPort>;
    fn build_sinks(&self, rule: &RuleConfig) -> Vec<Box<dyn AlerterPort>>;
    fn build_enhancements(&self, rule: &RuleConfig) -> Vec<Box<dyn EnhancementPort>>;
}

/// The factory `vigil-engine` wires in by default. No concrete
/// detector/sink/enhancement registry exists in this workspace, so every
/// lookup either falls back to the bundled `FrequencyDetector` or resolves
/// to an empty set.
#[derive(Default)]
pub struct DefaultComponentFactory;

impl ComponentFactory for DefaultComponentFactory {
    fn build_detector(&self, rule: &RuleConfig) -> Box<dyn DetectorPort> {
        if let Some(name) = &rule.detector {
            vg_warn!(
                conf,
                rule = %rule.name,
                detector = %name,
                "no concrete detector registered under this name, falling back to the frequency detector"
            );
        }
        let window = to_chrono(rule.buffer_time.as_duration());
        Box::new(FrequencyDetector::new(rule.timestamp_field.clone(), 1, window))
    }

    fn build_sinks(&self, rule: &RuleConfig) -> Vec<Box<dyn AlerterPort>> {
        if !rule.sinks.is_empty() {
            vg_warn!(
                conf,
                rule = %rule.name,
                sinks = ?rule.sinks,
                "no concrete alert sinks registered, configured sinks will not receive matches"
            );
        }
        Vec::new()
    }

    fn build_enhancements(&self, rule: &RuleConfig) -> Vec<Box<dyn EnhancementPort>> {
        if !rule.enhancements.is_empty() {
            vg_warn!(
                conf,
                rule = %rule.name,
                enhancements = ?rule.enhancements,
                "no concrete enhancements registered, skipping"
            );
        }
        Vec::new()
    }
}

fn to_chrono(d: std::time::Duration) -> Duration {
    Duration::from_std(d).unwrap_or(Duration::MAX)
}

/// Delivery target for `--debug` mode: logs the matches instead
/// of calling a real sink. Not a configured `sinks[]` entry — `Scheduler`
/// wires this in directly as `alert_flow::alert`'s `debug_sink` argument.
pub struct DebugAlerter;

#[async_trait]
impl AlerterPort for DebugAlerter {
    async fn deliver(&self, matches: &[serde_json::Value]) -> Result<(), String> {
        vg_warn!(alert, count = matches.len(), matches = %serde_json::json!(matches), "debug mode: alert not delivered to a real sink");
        Ok(())
    }

    fn describe(&self) -> AlerterInfo {
        AlerterInfo {
            alerter_type: "debug".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> RuleConfig {
        let raw: vigil_config::RuleConfigRaw = toml::from_str(
            r#"
name = "too_many_errors"
index_pattern = "logs-*"
run_every = "1m"
buffer_time = "5m"
es_host = "localhost"
sinks = ["chat"]
enhancements = ["geoip"]
detector = "spike"
"#,
        )
        .unwrap();
        vigil_config::RuleConfig::resolve(raw, "r.toml".into(), "h".into()).unwrap()
    }

    #[test]
    fn unresolved_names_yield_empty_sets() {
        let factory = DefaultComponentFactory;
        let rule = rule();
        assert!(factory.build_sinks(&rule).is_empty());
        assert!(factory.build_enhancements(&rule).is_empty());
    }

    #[test]
    fn detector_always_falls_back_to_frequency() {
        let factory = DefaultComponentFactory;
        let mut detector = factory.build_detector(&rule());
        detector.add_data(vec![serde_json::json!({"@timestamp": "2026-01-01T00:00:00Z"})]);
        assert_eq!(detector.drain_matches().len(), 1);
    }

    #[tokio::test]
    async fn debug_alerter_never_fails() {
        let alerter = DebugAlerter;
        let matches = vec![serde_json::json!({"a": 1})];
        assert!(alerter.deliver(&matches).await.is_ok());
        assert_eq!(alerter.describe().alerter_type, "debug");
    }
}
