//! Built-in workflow capabilities.
//!
//! Workflows see exactly what the host injects here, nothing else: vault
//! IO, the memory store, cache statistics, LLM completion, and logging.
//! Handlers read their arguments from the run input (or prior step
//! results) and return plain JSON.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use weaver_cache::ShadowCache;
use weaver_core::{LlmClient, LlmOptions, LlmOutput, ResponseFormat, VaultIo};
use weaver_memory::MemoryStore;
use weaver_workflow::{CapabilityRegistry, FnHandler, StepContext};

fn str_arg(ctx: &StepContext, key: &str) -> anyhow::Result<String> {
    ctx.input
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("missing string argument '{key}'"))
}

/// Build the registry of host capabilities.
pub fn build(
    vault: Arc<dyn VaultIo>,
    cache: ShadowCache,
    memory: MemoryStore,
    llm: Arc<dyn LlmClient>,
) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();

    registry.register(
        "log",
        Arc::new(FnHandler(|ctx: StepContext| async move {
            info!(input = %ctx.input, "workflow log step");
            Ok(Value::Null)
        })),
    );

    {
        let vault = vault.clone();
        registry.register(
            "vault.read",
            Arc::new(FnHandler(move |ctx: StepContext| {
                let vault = vault.clone();
                async move {
                    let path = str_arg(&ctx, "path")?;
                    let bytes = vault.read_file(&path).await?;
                    Ok(json!({
                        "path": path,
                        "content": String::from_utf8_lossy(&bytes),
                    }))
                }
            })),
        );
    }

    {
        let vault = vault.clone();
        registry.register(
            "vault.write",
            Arc::new(FnHandler(move |ctx: StepContext| {
                let vault = vault.clone();
                async move {
                    let path = str_arg(&ctx, "path")?;
                    let content = str_arg(&ctx, "content")?;
                    vault.write_file(&path, content.as_bytes()).await?;
                    Ok(json!({ "path": path, "written": content.len() }))
                }
            })),
        );
    }

    {
        let memory = memory.clone();
        registry.register(
            "memory.get",
            Arc::new(FnHandler(move |ctx: StepContext| {
                let memory = memory.clone();
                async move {
                    let namespace = str_arg(&ctx, "namespace")?;
                    let key = str_arg(&ctx, "key")?;
                    let value = memory.get(&namespace, &key).await?;
                    Ok(value.unwrap_or(Value::Null))
                }
            })),
        );
    }

    {
        let memory = memory.clone();
        registry.register(
            "memory.put",
            Arc::new(FnHandler(move |ctx: StepContext| {
                let memory = memory.clone();
                async move {
                    let namespace = str_arg(&ctx, "namespace")?;
                    let key = str_arg(&ctx, "key")?;
                    let value = ctx
                        .input
                        .get("value")
                        .cloned()
                        .unwrap_or(Value::Null);
                    let ttl_ms = ctx
                        .input
                        .get("ttl_ms")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0);
                    memory.put(&namespace, &key, &value, ttl_ms).await?;
                    Ok(json!({ "namespace": namespace, "key": key }))
                }
            })),
        );
    }

    {
        let cache = cache.clone();
        registry.register(
            "cache.stats",
            Arc::new(FnHandler(move |_ctx: StepContext| {
                let cache = cache.clone();
                async move {
                    let stats = cache.stats().await?;
                    Ok(serde_json::to_value(stats)?)
                }
            })),
        );
    }

    {
        let llm = llm.clone();
        registry.register(
            "llm.complete",
            Arc::new(FnHandler(move |ctx: StepContext| {
                let llm = llm.clone();
                async move {
                    let prompt = str_arg(&ctx, "prompt")?;
                    let format = match ctx.input.get("format").and_then(|v| v.as_str()) {
                        Some("json") => ResponseFormat::Json,
                        Some("list") => ResponseFormat::List,
                        _ => ResponseFormat::Text,
                    };
                    let options = LlmOptions {
                        response_format: format,
                        ..Default::default()
                    };
                    let output = llm
                        .complete(&prompt, options)
                        .await
                        .map_err(|e| anyhow::anyhow!("llm call failed: {e}"))?;
                    Ok(match output {
                        LlmOutput::Text(text) => json!({ "text": text }),
                        LlmOutput::Json(value) => value,
                        LlmOutput::List(items) => json!(items),
                    })
                }
            })),
        );
    }

    registry
}
