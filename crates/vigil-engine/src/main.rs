use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use vigil_config::EngineConfig;
use vigil_core::model::SilenceRecord;
use vigil_core::time_ops;
use vigil_runtime::{wait_for_signal, DefaultComponentFactory, Scheduler};
use vigil_store_es::{ClientRegistry, EsStateStore};

/// A rule-driven alerting engine that polls a document store and emits
/// alerts through pluggable sinks.
#[derive(Parser)]
#[command(name = "vigild", about = "Rule-driven alerting engine")]
struct Cli {
    /// Path to the engine config file
    #[arg(short, long)]
    config: PathBuf,
    /// Pin the engine to a single rule file, disabling hot reload of others
    #[arg(long)]
    rule: Option<PathBuf>,
    /// Log matches instead of delivering them to configured sinks
    #[arg(long)]
    debug: bool,
    /// Raise the log level to debug regardless of the config file
    #[arg(long)]
    verbose: bool,
    /// Disable hot reload of the rules folder
    #[arg(long)]
    pin_rules: bool,
    /// Seed the first tick's checkpoint instead of recovering it from the store
    #[arg(long)]
    start: Option<String>,
    /// Override every tick's query window end
    #[arg(long)]
    end: Option<String>,
    /// One-shot: silence `--rule` for `unit=n` (e.g. `hours=2`), then exit.
    /// Requires `--rule`.
    #[arg(long)]
    silence: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .canonicalize()
        .with_context(|| format!("config path '{}'", cli.config.display()))?;
    let mut engine_config = EngineConfig::load(&config_path)?;
    if cli.debug {
        engine_config.debug = true;
    }
    if cli.verbose {
        engine_config.verbose = true;
        engine_config.logging.level = "debug".to_string();
    }
    let base_dir = config_path
        .parent()
        .expect("config path must have a parent directory");

    let _guard = vigil_runtime::init_tracing(&engine_config.logging, base_dir)?;

    let start_override = cli.start.as_deref().map(time_ops::parse_iso8601).transpose().map_err(|e| anyhow::anyhow!(e))?;
    let end_override = cli.end.as_deref().map(time_ops::parse_iso8601).transpose().map_err(|e| anyhow::anyhow!(e))?;

    if let Some(spec) = &cli.silence {
        let rule_path = cli.rule.as_ref().context("--silence requires --rule")?;
        run_silence(&engine_config, rule_path, spec).await?;
        return Ok(());
    }

    let factory = Arc::new(DefaultComponentFactory);
    let scheduler = Scheduler::bootstrap(
        &engine_config,
        cli.rule,
        factory,
        start_override,
        end_override,
        cli.pin_rules,
        engine_config.debug,
    )
    .await
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    tracing::info!(domain = "sys", "vigil engine started");

    let cancel = tokio_util::sync::CancellationToken::new();
    let signal_task = tokio::spawn(wait_for_signal(cancel.clone()));
    scheduler.run(cancel).await;
    signal_task.abort();

    Ok(())
}

/// `--silence unit=n --rule <path>`: persist a `SilenceRecord` for the named
/// rule and exit without starting the poll loop.
async fn run_silence(engine_config: &EngineConfig, rule_path: &PathBuf, spec: &str) -> Result<()> {
    let duration = vigil_config::parse_silence_spec(spec)?;
    let loader = vigil_config::RuleLoader::new(engine_config.rules_folder.clone());
    let rule = loader
        .load_rule(rule_path)
        .with_context(|| format!("loading rule {}", rule_path.display()))?;

    let registry = ClientRegistry::new();
    let transport = registry
        .get_or_create(&rule.es_host, rule.es_port)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let store = EsStateStore::new(transport, engine_config.writeback_index.clone());

    let now = time_ops::now();
    let record = SilenceRecord {
        rule_name: rule.name.clone(),
        until: now + duration,
        timestamp: now,
    };

    use vigil_core::ports::StateStore;
    store.put_silence(&record).await.map_err(|e| anyhow::anyhow!("{e}"))?;

    tracing::info!(domain = "sys", rule = %rule.name, until = %record.until, "rule silenced");
    Ok(())
}
