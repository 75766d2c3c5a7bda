//! Rule triggers and the explicit effect description rules produce.
//!
//! Rules are pure with respect to the snapshot they are given: side effects
//! are expressed as [`RuleEffects`] which the engine applies per note. The
//! engine, not the rule, talks to the vault, the cache, and the memory store
//! when applying.

use serde::{Deserialize, Serialize};

use crate::error::Diagnostic;

/// What causes a rule to be considered for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleTrigger {
    FileAdd,
    FileChange,
    FileDelete,
    /// Fires on any file event whose note carries the rule's configured tag.
    TagMatch,
    Schedule,
    Manual,
}

/// A frontmatter mutation, keyed so unknown fields survive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum FrontmatterPatch {
    Set {
        key: String,
        value: serde_yaml::Value,
    },
    Remove {
        key: String,
    },
}

/// A byte-range replacement in a note body.
///
/// Ranges index into the body the rule was shown (not the full file); the
/// engine validates that edits are non-overlapping and in bounds before
/// applying them back-to-front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyEdit {
    pub start: usize,
    pub end: usize,
    pub replacement: String,
}

/// Updates to a single existing note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NoteUpdate {
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frontmatter: Vec<FrontmatterPatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body_edits: Vec<BodyEdit>,
}

impl NoteUpdate {
    pub fn for_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frontmatter.is_empty() && self.body_edits.is_empty()
    }
}

/// A brand-new note a rule wants written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedNote {
    pub path: String,
    pub content: String,
    /// When false and the path exists, creation is skipped with a diagnostic.
    #[serde(default)]
    pub overwrite: bool,
}

/// A memory-store mutation requested by a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum MemoryOp {
    Put {
        namespace: String,
        key: String,
        value: serde_json::Value,
        /// 0 means no expiry.
        #[serde(default)]
        ttl_ms: u64,
    },
    Delete {
        namespace: String,
        key: String,
    },
}

/// Everything a rule wants done, described explicitly.
///
/// Application order per note: frontmatter/body updates through the vault,
/// then cache refresh, then memory ops. A failed sub-step skips the rest
/// and the engine records the result as partial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleEffects {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub note_updates: Vec<NoteUpdate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created_notes: Vec<CreatedNote>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memory_ops: Vec<MemoryOp>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl RuleEffects {
    /// Effects that change nothing; the engine logs and moves on.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.note_updates.is_empty() && self.created_notes.is_empty() && self.memory_ops.is_empty()
    }

    pub fn with_note_update(mut self, update: NoteUpdate) -> Self {
        self.note_updates.push(update);
        self
    }

    pub fn with_created_note(mut self, note: CreatedNote) -> Self {
        self.created_notes.push(note);
        self
    }

    pub fn with_memory_op(mut self, op: MemoryOp) -> Self {
        self.memory_ops.push(op);
        self
    }

    pub fn with_diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostics.push(diagnostic);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_effects_report_empty() {
        assert!(RuleEffects::none().is_empty());
        let effects = RuleEffects::none().with_memory_op(MemoryOp::Delete {
            namespace: "ns".into(),
            key: "k".into(),
        });
        assert!(!effects.is_empty());
    }

    #[test]
    fn trigger_serializes_screaming_snake() {
        let json = serde_json::to_string(&RuleTrigger::FileAdd).unwrap();
        assert_eq!(json, "\"FILE_ADD\"");
        let json = serde_json::to_string(&RuleTrigger::TagMatch).unwrap();
        assert_eq!(json, "\"TAG_MATCH\"");
    }
}
