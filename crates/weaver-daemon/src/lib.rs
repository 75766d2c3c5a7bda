//! Daemon wiring for the Weaver engine.
//!
//! Brings the components up in dependency order, runs the background
//! loops, and coordinates graceful shutdown:
//!
//! 1. stores (shadow cache, memory, workflow runs)
//! 2. startup reconciliation (`full_sync` when stale or rebuilt)
//! 3. watcher with the cache snapshot as scan baseline
//! 4. rules engine with the built-in rule library
//! 5. workflow runtime, capability injection, discovery, resume
//! 6. inspection HTTP server, TTL sweeper, schedule ticker

pub mod capabilities;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use weaver_cache::{ShadowCache, SqliteConfig};
use weaver_config::WeaverConfig;
use weaver_core::LlmClient;
use weaver_llm::{BreakerState, HttpLlmClient, LlmClientConfig};
use weaver_memory::MemoryStore;
use weaver_observe::{HealthReport, HealthStatus};
use weaver_rules::library::{AutoLinkRule, AutoTagRule, DailyNoteRule, MeetingNoteRule};
use weaver_rules::RulesEngine;
use weaver_vault::{FsVault, VaultSync};
use weaver_watch::{BaselineEntry, WatchConfig};
use weaver_workflow::{RunStore, RuntimeConfig, WorkflowRuntime};

/// A running engine. Dropping it does not stop anything; call
/// [`Daemon::shutdown`] for a coordinated stop.
pub struct Daemon {
    config: WeaverConfig,
    cache: ShadowCache,
    memory: MemoryStore,
    llm: Arc<HttpLlmClient>,
    engine: Arc<RulesEngine>,
    workflows: Option<Arc<WorkflowRuntime>>,
    shutdown: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Daemon {
    /// Initialize every component and start the event pipeline.
    pub async fn start(config: WeaverConfig) -> Result<Self> {
        let shutdown = CancellationToken::new();

        let vault: Arc<FsVault> = Arc::new(FsVault::new(&config.vault.path));
        let cache = ShadowCache::open(SqliteConfig::new(
            config.cache_db_path().to_string_lossy().as_ref(),
        ))
        .context("opening shadow cache")?;
        let memory =
            MemoryStore::open(config.memory_db_path()).context("opening memory store")?;

        let sync = Arc::new(VaultSync::new(
            vault.clone(),
            cache.clone(),
            memory.clone(),
            config.vault.watcher.ignore.clone(),
            config.sync.batch_size,
            config.sync.parallelism,
        ));

        // Startup reconciliation before any live event is observed.
        if sync
            .needs_full_sync(config.shadow_cache.staleness_threshold_secs)
            .await
            .context("staleness check")?
        {
            info!("running startup reconciliation");
            sync.full_sync().await.context("startup full sync")?;
        }

        let llm = Arc::new(HttpLlmClient::new(LlmClientConfig {
            provider: config.llm.provider.clone(),
            api_url: config.llm.api_url.clone(),
            api_key: config.llm.api_key.clone(),
            default_model: config.llm.default_model.clone(),
            rate_limit_per_minute: config.llm.rate_limit_per_minute,
            max_retries: config.llm.max_retries,
            breaker_threshold: config.llm.circuit_breaker_threshold,
            breaker_cooldown: Duration::from_secs(config.llm.circuit_breaker_cooldown_secs),
        }));

        let engine = RulesEngine::new(
            cache.clone(),
            memory.clone(),
            llm.clone() as Arc<dyn LlmClient>,
            vault.clone(),
            sync.clone(),
            config.rules.clone(),
        );
        register_builtin_rules(&engine, &config);

        // Watcher, seeded with the cache's snapshot as scan baseline.
        let baseline: Vec<BaselineEntry> = cache
            .snapshot()
            .await
            .context("cache snapshot")?
            .into_iter()
            .map(|s| BaselineEntry {
                path: s.path,
                content_hash: s.content_hash,
            })
            .collect();
        let watch_config = WatchConfig::new(&config.vault.path)
            .with_debounce(Duration::from_millis(config.vault.watcher.debounce_ms))
            .with_ignore(config.vault.watcher.ignore.clone());
        let watcher = weaver_watch::start(watch_config, baseline)
            .await
            .context("starting watcher")?;

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(engine.clone().run(watcher)));

        // Workflow runtime.
        let workflows = if config.workflows.enabled {
            let registry = capabilities::build(
                vault.clone(),
                cache.clone(),
                memory.clone(),
                llm.clone() as Arc<dyn LlmClient>,
            );
            let store =
                RunStore::open(config.workflow_db_path()).context("opening workflow store")?;
            let runtime = WorkflowRuntime::new(
                registry,
                store,
                RuntimeConfig {
                    max_concurrency: config.workflows.max_concurrency,
                    run_timeout: Duration::from_millis(config.workflows.timeout_ms),
                    default_step_timeout: Duration::from_millis(config.workflows.step_timeout_ms),
                },
            );
            runtime.discover_and_register(&config.workflow_root());
            let resumed = runtime.resume_unfinished().context("resuming runs")?;
            if resumed > 0 {
                info!(resumed, "workflow runs resumed");
            }

            if !config.workflows.http_addr.is_empty() {
                let addr = config
                    .workflows
                    .http_addr
                    .parse()
                    .context("parsing workflows.http_addr")?;
                let server_runtime = runtime.clone();
                let server_shutdown = shutdown.clone();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) =
                        weaver_workflow::serve(server_runtime, addr, server_shutdown).await
                    {
                        warn!(error = %e, "workflow inspection server exited");
                    }
                }));
            }
            Some(runtime)
        } else {
            None
        };

        // TTL sweeper.
        {
            let memory = memory.clone();
            let token = shutdown.clone();
            let interval = Duration::from_secs(config.memory.sweep_interval_secs.max(1));
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {
                            if let Ok(count) = memory.len().await {
                                metrics::gauge!("weaver_memory_entries").set(count as f64);
                            }
                            if let Err(e) = memory.sweep().await {
                                warn!(error = %e, "memory sweep failed");
                            }
                        }
                    }
                }
            }));
        }

        // Schedule ticker for SCHEDULE-triggered rules.
        {
            let engine = engine.clone();
            let token = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(60)) => {
                            engine.tick_schedule().await;
                        }
                    }
                }
            }));
        }

        info!(vault = %config.vault.path.display(), "weaver daemon started");
        Ok(Self {
            config,
            cache,
            memory,
            llm,
            engine,
            workflows,
            shutdown,
            tasks,
        })
    }

    pub fn engine(&self) -> &Arc<RulesEngine> {
        &self.engine
    }

    pub fn workflows(&self) -> Option<&Arc<WorkflowRuntime>> {
        self.workflows.as_ref()
    }

    pub fn config(&self) -> &WeaverConfig {
        &self.config
    }

    /// Structured health, one report per component plus the aggregate.
    pub async fn health(&self) -> (HealthStatus, Vec<HealthReport>) {
        let mut reports = Vec::new();

        match self.cache.stats().await {
            Ok(stats) => {
                metrics::gauge!("weaver_cache_notes").set(stats.note_count as f64);
                reports.push(
                    HealthReport::healthy("cache")
                        .with_details(serde_json::to_value(&stats).unwrap_or_default()),
                );
            }
            Err(e) => reports.push(HealthReport::unhealthy("cache", e.to_string())),
        }

        match self.memory.len().await {
            Ok(entries) => reports.push(
                HealthReport::healthy("memory")
                    .with_details(serde_json::json!({ "entries": entries })),
            ),
            Err(e) => reports.push(HealthReport::unhealthy("memory", e.to_string())),
        }

        reports.push(match self.llm.breaker_state() {
            BreakerState::Closed => HealthReport::healthy("llm"),
            BreakerState::HalfOpen => HealthReport::degraded("llm", "circuit half-open"),
            BreakerState::Open => HealthReport::degraded("llm", "circuit open"),
        });

        let stats = self.engine.stats();
        reports.push(if stats.quarantined.is_empty() {
            HealthReport::healthy("rules")
                .with_details(serde_json::to_value(&stats).unwrap_or_default())
        } else {
            HealthReport::degraded(
                "rules",
                format!("{} rule(s) quarantined", stats.quarantined.len()),
            )
            .with_details(serde_json::to_value(&stats).unwrap_or_default())
        });

        if let Some(workflows) = &self.workflows {
            reports.push(HealthReport::healthy("workflows").with_details(serde_json::json!({
                "registered": workflows.list().len(),
                "active_runs": workflows.active_count(),
            })));
        }

        (weaver_observe::aggregate(&reports), reports)
    }

    /// Coordinated shutdown: stop intake, cancel in-flight work, wait for
    /// the background tasks to drain.
    pub async fn shutdown(self) {
        info!("weaver daemon shutting down");
        self.shutdown.cancel();
        self.engine.shutdown_token().cancel();
        if let Some(workflows) = &self.workflows {
            workflows.shutdown_token().cancel();
        }
        for task in self.tasks {
            let _ = task.await;
        }
        info!("weaver daemon stopped");
    }
}

fn register_builtin_rules(engine: &Arc<RulesEngine>, config: &WeaverConfig) {
    if config.rules.auto_tag.enabled {
        engine.register(Arc::new(AutoTagRule::new(config.rules.auto_tag.clone())));
    }
    if config.rules.auto_link.enabled {
        engine.register(Arc::new(AutoLinkRule::new(config.rules.auto_link.clone())));
    }
    if config.rules.daily_note.enabled {
        engine.register(Arc::new(DailyNoteRule::new()));
    }
    if config.rules.meeting_note.enabled {
        engine.register(Arc::new(MeetingNoteRule::new()));
    }
}
