//! Application of rule effects.
//!
//! Effects are applied per note in a fixed order: vault write first, cache
//! refresh second, memory ops last. The first failing sub-step stops the
//! rest; earlier sub-steps are not rolled back but the outcome is recorded
//! as partial so telemetry and the execution log can tell.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use weaver_cache::ShadowCache;
use weaver_core::{
    BodyEdit, Diagnostic, ErrorKind, Frontmatter, MemoryOp, RuleEffects, VaultIo,
};
use weaver_memory::MemoryStore;
use weaver_parser::{serialize_note, split_frontmatter, NoteParser};
use weaver_vault::VaultSync;

/// What happened while applying one rule's effects.
#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    pub sub_steps_total: usize,
    pub sub_steps_completed: usize,
    pub diagnostics: Vec<Diagnostic>,
    /// First failure, if any. `partial()` distinguishes "nothing applied"
    /// from "stopped midway".
    pub error: Option<String>,
}

impl ApplyOutcome {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn partial(&self) -> bool {
        self.error.is_some() && self.sub_steps_completed > 0
    }
}

pub(crate) struct EffectApplier {
    vault: Arc<dyn VaultIo>,
    cache: ShadowCache,
    memory: MemoryStore,
    sync: Arc<VaultSync>,
    parser: NoteParser,
}

impl EffectApplier {
    pub fn new(
        vault: Arc<dyn VaultIo>,
        cache: ShadowCache,
        memory: MemoryStore,
        sync: Arc<VaultSync>,
    ) -> Self {
        Self {
            vault,
            cache,
            memory,
            sync,
            parser: NoteParser::new(),
        }
    }

    pub async fn apply(&self, effects: &RuleEffects) -> ApplyOutcome {
        let mut outcome = ApplyOutcome {
            sub_steps_total: effects.note_updates.len()
                + effects.created_notes.len()
                + effects.memory_ops.len(),
            ..Default::default()
        };
        outcome.diagnostics.extend(effects.diagnostics.clone());

        for update in &effects.note_updates {
            if let Err(e) = self.apply_note_update(update).await {
                outcome.error = Some(e);
                return outcome;
            }
            outcome.sub_steps_completed += 1;
        }

        for created in &effects.created_notes {
            match self.apply_created_note(created).await {
                Ok(Some(diag)) => {
                    outcome.diagnostics.push(diag);
                    outcome.sub_steps_completed += 1;
                }
                Ok(None) => outcome.sub_steps_completed += 1,
                Err(e) => {
                    outcome.error = Some(e);
                    return outcome;
                }
            }
        }

        for op in &effects.memory_ops {
            if let Err(e) = self.apply_memory_op(op).await {
                outcome.error = Some(e);
                return outcome;
            }
            outcome.sub_steps_completed += 1;
        }

        outcome
    }

    async fn apply_note_update(
        &self,
        update: &weaver_core::NoteUpdate,
    ) -> Result<(), String> {
        if update.is_empty() {
            return Ok(());
        }
        let bytes = self
            .vault
            .read_file(&update.path)
            .await
            .map_err(|e| format!("reading {}: {e}", update.path))?;
        let content = String::from_utf8_lossy(&bytes).into_owned();

        let (mut frontmatter, mut body) = match split_frontmatter(&content) {
            Some((yaml, body)) => (
                Frontmatter::from_yaml(yaml).unwrap_or_else(|_| Frontmatter::empty()),
                body.to_string(),
            ),
            None => (Frontmatter::empty(), content),
        };

        if !update.body_edits.is_empty() {
            body = apply_body_edits(&body, &update.body_edits)
                .map_err(|e| format!("body edits for {}: {e}", update.path))?;
        }
        frontmatter.apply_patches(&update.frontmatter);

        // The patched frontmatter must still round-trip; a rule must not be
        // able to corrupt a note's metadata block.
        let yaml = frontmatter.to_yaml();
        if Frontmatter::from_yaml(&yaml).is_err() {
            return Err(format!(
                "frontmatter for {} no longer parses after patching",
                update.path
            ));
        }

        let serialized = serialize_note(&frontmatter, &body);
        self.vault
            .write_file(&update.path, serialized.as_bytes())
            .await
            .map_err(|e| format!("writing {}: {e}", update.path))?;
        self.index_written(&update.path, serialized.as_bytes()).await
    }

    async fn apply_created_note(
        &self,
        created: &weaver_core::CreatedNote,
    ) -> Result<Option<Diagnostic>, String> {
        if !created.overwrite {
            let exists = self
                .vault
                .stat(&created.path)
                .await
                .map_err(|e| format!("stat {}: {e}", created.path))?
                .is_some();
            if exists {
                debug!(path = %created.path, "created note already exists, skipping");
                return Ok(Some(Diagnostic::new(
                    ErrorKind::RuleApplyFailed,
                    format!("{} already exists, creation skipped", created.path),
                )));
            }
        }
        self.vault
            .write_file(&created.path, created.content.as_bytes())
            .await
            .map_err(|e| format!("writing {}: {e}", created.path))?;
        self.index_written(&created.path, created.content.as_bytes())
            .await?;
        Ok(None)
    }

    /// The cache is updated only after `VaultIo` acknowledged the write.
    async fn index_written(&self, path: &str, bytes: &[u8]) -> Result<(), String> {
        let parsed = self.parser.parse(path, bytes);
        let mtime = self
            .vault
            .stat(path)
            .await
            .ok()
            .flatten()
            .map(|s| s.mtime)
            .unwrap_or_else(Utc::now);
        self.cache
            .upsert_note(&parsed, mtime)
            .await
            .map_err(|e| format!("indexing {path}: {e}"))?;
        if let Ok(Some(note)) = self.cache.get_note(path).await {
            if let Err(e) = self.sync.mirror_note(&note).await {
                warn!(path, error = %e, "mirror refresh failed after apply");
            }
        }
        Ok(())
    }

    async fn apply_memory_op(&self, op: &MemoryOp) -> Result<(), String> {
        match op {
            MemoryOp::Put {
                namespace,
                key,
                value,
                ttl_ms,
            } => self
                .memory
                .put(namespace, key, value, *ttl_ms)
                .await
                .map_err(|e| format!("memory put {namespace}/{key}: {e}")),
            MemoryOp::Delete { namespace, key } => self
                .memory
                .delete(namespace, key)
                .await
                .map(|_| ())
                .map_err(|e| format!("memory delete {namespace}/{key}: {e}")),
        }
    }
}

/// Validate and apply byte-range replacements.
///
/// Edits must be in bounds, on character boundaries, and non-overlapping;
/// they are applied back-to-front so earlier offsets stay valid.
pub fn apply_body_edits(body: &str, edits: &[BodyEdit]) -> Result<String, String> {
    let mut sorted: Vec<&BodyEdit> = edits.iter().collect();
    sorted.sort_by_key(|e| e.start);

    let mut prev_end = 0;
    for edit in &sorted {
        if edit.start > edit.end || edit.end > body.len() {
            return Err(format!("edit {}..{} out of bounds", edit.start, edit.end));
        }
        if !body.is_char_boundary(edit.start) || !body.is_char_boundary(edit.end) {
            return Err(format!(
                "edit {}..{} splits a character",
                edit.start, edit.end
            ));
        }
        if edit.start < prev_end {
            return Err(format!("edit {}..{} overlaps a prior edit", edit.start, edit.end));
        }
        prev_end = edit.end;
    }

    let mut result = body.to_string();
    for edit in sorted.iter().rev() {
        result.replace_range(edit.start..edit.end, &edit.replacement);
    }
    Ok(result)
}
