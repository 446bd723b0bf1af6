use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::rule::{RuleConfig, RuleConfigRaw};

pub type ContentHash = String;

/// Scans a rules folder for `.toml` rule files and loads/hashes them.
///
/// A periodic re-scan detects new, modified, and removed rule files by
/// comparing content hashes against the previous snapshot, rather than
/// relying on file modification times (which miss some filesystem edge
/// cases, e.g. a rewrite that preserves mtime).
pub struct RuleLoader {
    rules_folder: PathBuf,
}

impl RuleLoader {
    pub fn new(rules_folder: impl Into<PathBuf>) -> Self {
        Self {
            rules_folder: rules_folder.into(),
        }
    }

    /// List every rule file currently present, each with a content hash.
    pub fn snapshot(&self) -> Result<BTreeMap<PathBuf, ContentHash>> {
        let mut out = BTreeMap::new();
        if !self.rules_folder.exists() {
            return Ok(out);
        }
        for entry in std::fs::read_dir(&self.rules_folder)
            .with_context(|| format!("reading rules folder {}", self.rules_folder.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let hash = hash_file(&path)?;
            out.insert(path, hash);
        }
        Ok(out)
    }

    /// Parse and validate a single rule file.
    pub fn load_rule(&self, path: &Path) -> Result<RuleConfig> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading rule {}", path.display()))?;
        let raw: RuleConfigRaw =
            toml::from_str(&text).with_context(|| format!("parsing rule {}", path.display()))?;
        let hash = hash_bytes(text.as_bytes());
        RuleConfig::resolve(raw, path.to_path_buf(), hash)
    }

    /// Load every rule file found by `snapshot`, skipping none: a rule that
    /// fails to parse is surfaced as an error naming its path, rather than
    /// silently dropped, so a typo doesn't disable a rule unnoticed.
    pub fn load_all(&self) -> Result<Vec<RuleConfig>> {
        let snapshot = self.snapshot()?;
        snapshot.keys().map(|path| self.load_rule(path)).collect()
    }
}

fn hash_file(path: &Path) -> Result<ContentHash> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(hash_bytes(&bytes))
}

fn hash_bytes(bytes: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_rule(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    const RULE_BODY: &str = r#"
name = "too_many_errors"
index_pattern = "logs-*"
run_every = "1m"
buffer_time = "15m"
es_host = "localhost"
"#;

    #[test]
    fn snapshot_finds_toml_files_only() {
        let dir = tempdir();
        write_rule(dir.path(), "rule_a.toml", RULE_BODY);
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let loader = RuleLoader::new(dir.path());
        let snap = loader.snapshot().unwrap();
        assert_eq!(snap.len(), 1);
        assert!(snap.keys().next().unwrap().ends_with("rule_a.toml"));
    }

    #[test]
    fn snapshot_on_missing_folder_is_empty() {
        let loader = RuleLoader::new("/nonexistent/rules/path/for/test");
        let snap = loader.snapshot().unwrap();
        assert!(snap.is_empty());
    }

    #[test]
    fn load_rule_parses_and_hashes() {
        let dir = tempdir();
        let path = write_rule(dir.path(), "rule_a.toml", RULE_BODY);
        let loader = RuleLoader::new(dir.path());
        let rule = loader.load_rule(&path).unwrap();
        assert_eq!(rule.name, "too_many_errors");
        assert_eq!(rule.content_hash.len(), 64);
    }

    #[test]
    fn changed_content_changes_hash() {
        let dir = tempdir();
        let path = write_rule(dir.path(), "rule_a.toml", RULE_BODY);
        let loader = RuleLoader::new(dir.path());
        let first = loader.load_rule(&path).unwrap().content_hash;

        write_rule(dir.path(), "rule_a.toml", &format!("{RULE_BODY}\nrealert = \"5m\"\n"));
        let second = loader.load_rule(&path).unwrap().content_hash;
        assert_ne!(first, second);
    }

    #[test]
    fn load_all_surfaces_parse_errors() {
        let dir = tempdir();
        write_rule(dir.path(), "good.toml", RULE_BODY);
        write_rule(dir.path(), "bad.toml", "name = \"broken\"\n");
        let loader = RuleLoader::new(dir.path());
        assert!(loader.load_all().is_err());
    }

    fn tempdir() -> TempDir {
        TempDir::new()
    }

    /// Minimal scoped temp directory, removed on drop. Avoids pulling in the
    /// `tempfile` crate for four lines of cleanup logic.
    struct TempDir(PathBuf);

    impl TempDir {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!(
                "vigil-config-test-{}-{}",
                std::process::id(),
                ADDR.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            ));
            std::fs::create_dir_all(&path).unwrap();
            Self(path)
        }

        fn path(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    static ADDR: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
}
