use std::collections::HashSet;

use crate::rule::RuleConfig;

/// Cross-rule validation that a single `RuleConfig::validate` can't express:
/// checks that hold over the whole loaded set rather than one file.
///
/// Rule names are used as checkpoint and silence-cache keys, so a collision
/// between two rule files would make them share state they shouldn't.
pub fn validate_rule_set(rules: &[RuleConfig]) -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for rule in rules {
        if !seen.insert(rule.name.as_str()) {
            anyhow::bail!(
                "duplicate rule name {:?} (from {})",
                rule.name,
                rule.source_path.display()
            );
        }
    }
    Ok(())
}
