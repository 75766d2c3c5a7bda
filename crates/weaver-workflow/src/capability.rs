//! Host-injected step capabilities.
//!
//! Workflow definitions name handlers; the host decides what those names
//! mean by registering capabilities at startup. The registry is populated
//! once and read-only afterwards. There is no fallback resolution: a
//! handler name nobody registered fails validation with
//! `WORKFLOW_MISSING_CAPABILITY`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// What a step handler sees when invoked.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// The run's input, verbatim.
    pub input: serde_json::Value,
    /// Results of previously completed steps, by step name.
    pub prior: HashMap<String, serde_json::Value>,
    /// Signaled on run cancellation and engine shutdown.
    pub cancel: CancellationToken,
}

/// An injected capability: one idempotent unit of work.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, ctx: StepContext) -> anyhow::Result<serde_json::Value>;
}

/// Convenience impl so closures can be registered directly.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> StepHandler for FnHandler<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    async fn run(&self, ctx: StepContext) -> anyhow::Result<serde_json::Value> {
        (self.0)(ctx).await
    }
}

/// Registry of capabilities, keyed by handler name.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("names", &self.names())
            .finish()
    }
}
