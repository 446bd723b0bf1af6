//! The tick loop driven across every loaded rule.
//!
//! Each iteration captures a single `now`, hands every rule's `RuleRuntime`
//! + detector + silence cache to its own `tokio::spawn`ed task for that
//! tick, then — once every in-flight task for the iteration has rejoined —
//! diffs `RuleLoader::snapshot()` for hot reload (the diff never runs while
//! a tick future is still pending, so a reload can never race an in-flight
//! tick) and sweeps persisted alerts due for retry. Each `RuleRuntime` is
//! owned exclusively by the task ticking it and returned to the
//! `Scheduler` when that task completes — ownership is the serialization,
//! so no `Arc<Mutex<_>>` is needed even though each tick runs concurrently
//! with every other rule's tick.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use orion_error::prelude::*;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use vigil_config::{validate, ContentHash, EngineConfig, RuleConfig, RuleLoader};
use vigil_core::alert_flow;
use vigil_core::ports::{AlerterPort, DetectorPort, EnhancementPort, QueryClient, StateStore};
use vigil_core::rule_runtime::{self, RuleRuntime, TickContext};
use vigil_core::silence_cache::SilenceCache;
use vigil_core::{vg_debug, vg_info, vg_warn};
use vigil_store_es::{ClientRegistry, EsQueryClient, EsStateStore};

use crate::components::{ComponentFactory, DebugAlerter};
use crate::error::{RuntimeReason, RuntimeResult};

/// Everything a rule needs to tick, bundled so it can move into and back out
/// of the tokio task that owns it for one iteration.
struct RuleSlot {
    runtime: RuleRuntime,
    detector: Box<dyn DetectorPort>,
    enhancements: Vec<Box<dyn EnhancementPort>>,
    sinks: Vec<Box<dyn AlerterPort>>,
    client: Arc<dyn QueryClient>,
    store: Arc<dyn StateStore>,
    silence_cache: SilenceCache,
    source_path: PathBuf,
    /// Set when a tick or retry sweep hit a store/query failure for this
    /// rule's endpoint and evicted it from the `ClientRegistry`. Picked up
    /// and cleared by `reconnect_stalled` at the top of the next tick.
    needs_reconnect: bool,
}

pub struct Scheduler {
    rules: HashMap<String, RuleSlot>,
    known_files: BTreeMap<PathBuf, ContentHash>,
    registry: ClientRegistry,
    factory: Arc<dyn ComponentFactory>,
    loader: RuleLoader,
    writeback_index: String,
    old_query_limit: chrono::Duration,
    alert_time_limit: chrono::Duration,
    run_every: std::time::Duration,
    cli_end_override: Option<DateTime<Utc>>,
    pin_rules: bool,
    debug: bool,
}

impl Scheduler {
    /// Bootstrap from `config`, loading every rule under `config.rules_folder`
    /// unless `single_rule` pins the scheduler to one file (`--rule`).
    #[allow(clippy::too_many_arguments)]
    pub async fn bootstrap(
        config: &EngineConfig,
        single_rule: Option<PathBuf>,
        factory: Arc<dyn ComponentFactory>,
        cli_start_override: Option<DateTime<Utc>>,
        cli_end_override: Option<DateTime<Utc>>,
        pin_rules: bool,
        debug: bool,
    ) -> RuntimeResult<Self> {
        let loader = RuleLoader::new(config.rules_folder.clone());
        let registry = ClientRegistry::new();

        let rule_configs: Vec<RuleConfig> = match &single_rule {
            Some(path) => vec![loader.load_rule(path).owe(RuntimeReason::Bootstrap)?],
            None => loader.load_all().owe(RuntimeReason::Bootstrap)?,
        };
        validate::validate_rule_set(&rule_configs).owe(RuntimeReason::Bootstrap)?;

        let mut scheduler = Self {
            rules: HashMap::new(),
            known_files: BTreeMap::new(),
            registry,
            factory,
            loader,
            writeback_index: config.writeback_index.clone(),
            old_query_limit: to_chrono(config.old_query_limit.as_duration()),
            alert_time_limit: to_chrono(config.alert_time_limit.as_duration()),
            run_every: config.run_every.as_duration(),
            cli_end_override,
            pin_rules,
            debug,
        };

        for rule in rule_configs {
            scheduler.load_slot(rule, cli_start_override).await?;
        }
        scheduler.known_files = scheduler.loader.snapshot().owe(RuntimeReason::Bootstrap)?;

        vg_info!(sys, rules = scheduler.rules.len(), "scheduler bootstrap complete");
        Ok(scheduler)
    }

    async fn load_slot(&mut self, rule: RuleConfig, cli_start_override: Option<DateTime<Utc>>) -> RuntimeResult<()> {
        let transport = self
            .registry
            .get_or_create(&rule.es_host, rule.es_port)
            .await
            .owe(RuntimeReason::Bootstrap)?;
        let client: Arc<dyn QueryClient> = Arc::new(EsQueryClient::new(transport.clone()));
        let store: Arc<dyn StateStore> = Arc::new(EsStateStore::new(transport, self.writeback_index.clone()));

        let detector = self.factory.build_detector(&rule);
        let enhancements = self.factory.build_enhancements(&rule);
        let sinks = self.factory.build_sinks(&rule);
        let source_path = rule.source_path.clone();
        let name = rule.name.clone();

        let mut runtime = RuleRuntime::new(rule);
        // `--start` seeds the first tick's checkpoint directly, superseding
        // StateStore recovery. Subsequent ticks advance from there
        // like any other checkpoint.
        if let Some(start) = cli_start_override {
            runtime.state.checkpoint = Some(start);
        }

        self.rules.insert(
            name,
            RuleSlot {
                runtime,
                detector,
                enhancements,
                sinks,
                client,
                store,
                silence_cache: SilenceCache::new(),
                source_path,
                needs_reconnect: false,
            },
        );
        Ok(())
    }

    /// Drive the scheduler until `cancel` fires. Runs one outer iteration
    /// every `run_every`, ticking every loaded rule concurrently.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.run_every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    vg_info!(sys, "scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_iteration().await;
                }
            }
        }
    }

    async fn run_iteration(&mut self) {
        let started = Instant::now();
        let now = Utc::now();
        self.tick_all(now).await;

        if !self.pin_rules {
            self.reload_rules().await;
        }

        let failed_endpoints = self.retry_pending(now).await;
        for (es_host, es_port) in failed_endpoints {
            self.mark_endpoint_dead(&es_host, es_port).await;
        }

        let elapsed = started.elapsed();
        if elapsed > self.run_every {
            vg_warn!(
                sys,
                elapsed_ms = elapsed.as_millis() as u64,
                run_every_ms = self.run_every.as_millis() as u64,
                "tick exceeded run_every, falling behind cadence"
            );
        }
    }

    /// Evict `(es_host, es_port)` from the `ClientRegistry` and flag every
    /// rule on that endpoint for reconnect at the top of the next tick.
    async fn mark_endpoint_dead(&mut self, es_host: &str, es_port: u16) {
        self.registry.evict(es_host, es_port).await;
        for slot in self.rules.values_mut() {
            if slot.runtime.config.es_host == es_host && slot.runtime.config.es_port == es_port {
                slot.needs_reconnect = true;
            }
        }
    }

    /// Tick every currently loaded rule concurrently, reclaiming each
    /// `RuleSlot` as its task completes. Returns only once every rule's tick
    /// for this `now` has finished, satisfying "never diff mid-tick".
    async fn tick_all(&mut self, now: DateTime<Utc>) {
        self.reconnect_stalled().await;

        let mut join_set = JoinSet::new();
        let cli_end_override = self.cli_end_override;
        let old_query_limit = self.old_query_limit;
        let debug = self.debug;

        for (name, slot) in self.rules.drain() {
            join_set.spawn(async move {
                let RuleSlot {
                    mut runtime,
                    mut detector,
                    enhancements,
                    sinks,
                    client,
                    store,
                    mut silence_cache,
                    source_path,
                    needs_reconnect,
                } = slot;

                let debug_alerter = DebugAlerter;
                let mut ctx = TickContext {
                    client: client.as_ref(),
                    detector: detector.as_mut(),
                    enhancements: &enhancements,
                    sinks: &sinks,
                    dashboard: None,
                    debug_sink: if debug { Some(&debug_alerter as &dyn AlerterPort) } else { None },
                    store: store.as_ref(),
                    silence_cache: &mut silence_cache,
                };

                let result = rule_runtime::tick(&mut runtime, &mut ctx, now, cli_end_override, old_query_limit).await;
                drop(ctx);

                let slot = RuleSlot {
                    runtime,
                    detector,
                    enhancements,
                    sinks,
                    client,
                    store,
                    silence_cache,
                    source_path,
                    needs_reconnect,
                };
                (name, slot, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, mut slot, result)) => {
                    if let Err(e) = result {
                        vg_warn!(pipe, rule = %name, error = %e, "tick failed, marking store client dead for reconnect next tick");
                        self.registry
                            .evict(&slot.runtime.config.es_host, slot.runtime.config.es_port)
                            .await;
                        slot.needs_reconnect = true;
                    }
                    self.rules.insert(name, slot);
                }
                Err(e) => vg_warn!(pipe, error = %e, "rule tick task panicked"),
            }
        }
    }

    /// Rebuild the client/store for any rule flagged `needs_reconnect` by a
    /// failure in a previous tick or retry sweep. Runs before this tick's
    /// tasks are spawned, so a rule whose endpoint failed reconstructs its
    /// store client lazily at the top of the next tick rather than inline
    /// with the failure.
    async fn reconnect_stalled(&mut self) {
        let stalled: Vec<String> = self
            .rules
            .iter()
            .filter(|(_, slot)| slot.needs_reconnect)
            .map(|(name, _)| name.clone())
            .collect();

        for name in stalled {
            let Some((es_host, es_port)) = self.rules.get(&name).map(|s| (s.runtime.config.es_host.clone(), s.runtime.config.es_port)) else {
                continue;
            };
            match self.registry.get_or_create(&es_host, es_port).await {
                Ok(transport) => {
                    let client: Arc<dyn QueryClient> = Arc::new(EsQueryClient::new(transport.clone()));
                    let store: Arc<dyn StateStore> = Arc::new(EsStateStore::new(transport, self.writeback_index.clone()));
                    if let Some(slot) = self.rules.get_mut(&name) {
                        slot.client = client;
                        slot.store = store;
                        slot.needs_reconnect = false;
                        vg_info!(conn, rule = %name, "store client reconnected after prior failure");
                    }
                }
                Err(e) => {
                    vg_warn!(conn, rule = %name, error = %e, "failed to reconnect store client, will retry next tick");
                }
            }
        }
    }

    /// Diff `RuleLoader::snapshot()` against the last known file set: load
    /// new rules, reconfigure changed ones, drop removed ones.
    async fn reload_rules(&mut self) {
        let snapshot = match self.loader.snapshot() {
            Ok(s) => s,
            Err(e) => {
                vg_warn!(conf, error = %e, "failed to rescan rules folder");
                return;
            }
        };

        let mut present_names = std::collections::HashSet::new();

        for (path, hash) in &snapshot {
            let previously_known = self.known_files.get(path);
            if previously_known == Some(hash) {
                if let Some(slot) = self.rules.values().find(|s| &s.source_path == path) {
                    present_names.insert(slot.runtime.config.name.clone());
                }
                continue;
            }

            match self.loader.load_rule(path) {
                Ok(rule) => {
                    present_names.insert(rule.name.clone());
                    if let Some(slot) = self.rules.get_mut(&rule.name) {
                        vg_info!(conf, rule = %rule.name, "rule changed, reconfiguring");
                        slot.runtime.reconfigure(rule);
                    } else {
                        vg_info!(conf, path = %path.display(), "new rule file found");
                        if let Err(e) = self.load_slot(rule, None).await {
                            vg_warn!(conf, path = %path.display(), error = %e, "failed to load new rule");
                        }
                    }
                }
                Err(e) => {
                    vg_warn!(conf, path = %path.display(), error = %e, "failed to parse rule, keeping previous version");
                    if let Some(slot) = self.rules.values().find(|s| &s.source_path == path) {
                        present_names.insert(slot.runtime.config.name.clone());
                    }
                }
            }
        }

        let removed: Vec<String> = self
            .rules
            .values()
            .filter(|s| !present_names.contains(&s.runtime.config.name))
            .map(|s| s.runtime.config.name.clone())
            .collect();
        for name in removed {
            vg_info!(conf, rule = %name, "rule file removed, dropping rule");
            self.rules.remove(&name);
        }

        self.known_files = snapshot;
    }

    /// Sweep persisted undelivered alerts across every currently loaded rule.
    /// Does not touch any rule's
    /// `RuntimeState` — only `flush_buffered_aggregate`, called from within
    /// each rule's own tick, does that.
    ///
    /// Swept once per rule's own store, since rules may point at distinct
    /// ES clusters (`es_host`/`es_port`) and therefore distinct writeback
    /// indices; `resolve_rule` still spans every loaded rule so a store
    /// shared by several rules is only queried once per rule but resolves
    /// any of their pending records correctly.
    ///
    /// Returns the `(es_host, es_port)` of every endpoint whose store
    /// errored during this sweep, so the caller can mark it dead for
    /// reconnect at the top of the next tick (spec §7: the writeback client
    /// is marked dead on its own failure, not just on a query failure).
    async fn retry_pending(&self, now: DateTime<Utc>) -> Vec<(String, u16)> {
        let mut failed_endpoints = Vec::new();
        for slot in self.rules.values() {
            let resolve = |name: &str| {
                self.rules
                    .get(name)
                    .map(|s| (&s.runtime.config, s.sinks.as_slice()))
            };
            match alert_flow::retry_persisted_alerts(now, self.alert_time_limit, resolve, slot.store.as_ref()).await {
                Ok(summary) if summary.redelivered > 0 => {
                    vg_debug!(alert, rule = %slot.runtime.config.name, redelivered = summary.redelivered, "retried pending alerts");
                }
                Ok(_) => {}
                Err(e) => {
                    vg_warn!(alert, rule = %slot.runtime.config.name, error = %e, "pending alert retry sweep failed, marking store client dead for reconnect next tick");
                    failed_endpoints.push((slot.runtime.config.es_host.clone(), slot.runtime.config.es_port));
                }
            }
        }
        failed_endpoints
    }
}

fn to_chrono(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}
