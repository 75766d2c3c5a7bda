//! The rule contract and the context rules execute against.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use weaver_cache::ShadowCache;
use weaver_config::RulesConfig;
use weaver_core::{FileEvent, LlmClient, Note, RuleEffects, RuleTrigger};
use weaver_memory::MemoryStore;

/// Descriptive metadata surfaced by the admin interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleMetadata {
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A declarative, idempotent reaction to events.
///
/// Rules are pure with respect to the snapshot in their [`RuleContext`]:
/// they read through it and describe every side effect in the returned
/// [`RuleEffects`]. The engine applies effects; rules never touch the vault
/// directly.
#[async_trait]
pub trait Rule: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn trigger(&self) -> RuleTrigger;

    /// Additional triggers this rule also fires on (e.g. auto-tag
    /// optionally reacting to changes).
    fn extra_triggers(&self) -> Vec<RuleTrigger> {
        Vec::new()
    }

    /// Tag a `TAG_MATCH` rule requires on the event's note.
    fn tag_filter(&self) -> Option<&str> {
        None
    }

    /// Higher runs earlier; ties break by id.
    fn priority(&self) -> i32 {
        100
    }

    fn metadata(&self) -> RuleMetadata {
        RuleMetadata::default()
    }

    async fn condition(&self, ctx: &RuleContext) -> anyhow::Result<bool>;

    async fn action(&self, ctx: &RuleContext) -> anyhow::Result<RuleEffects>;
}

/// Everything a rule may read: the triggering event, the indexed note, and
/// lazy access to cache, memory, and the LLM. These accessors are the only
/// legal suspension points inside `condition` and `action`.
pub struct RuleContext {
    event: FileEvent,
    note: Option<Note>,
    cache: ShadowCache,
    memory: MemoryStore,
    llm: Arc<dyn LlmClient>,
    cancel: CancellationToken,
    config: RulesConfig,
}

impl RuleContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        event: FileEvent,
        note: Option<Note>,
        cache: ShadowCache,
        memory: MemoryStore,
        llm: Arc<dyn LlmClient>,
        cancel: CancellationToken,
        config: RulesConfig,
    ) -> Self {
        Self {
            event,
            note,
            cache,
            memory,
            llm,
            cancel,
            config,
        }
    }

    pub fn event(&self) -> &FileEvent {
        &self.event
    }

    /// The cache's view of the event's note, indexed before rules ran.
    /// `None` for deletions and schedule ticks.
    pub fn note(&self) -> Option<&Note> {
        self.note.as_ref()
    }

    pub fn cache(&self) -> &ShadowCache {
        &self.cache
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn llm(&self) -> &dyn LlmClient {
        self.llm.as_ref()
    }

    /// Cancellation signal tied to the rule timeout and engine shutdown.
    /// Long-running actions should check it between suspension points.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn config(&self) -> &RulesConfig {
        &self.config
    }
}
