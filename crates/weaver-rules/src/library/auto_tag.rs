//! Auto-tagging of untagged notes.
//!
//! Trigger: `FILE_ADD` (plus `FILE_CHANGE` when configured). Condition: the
//! note has no frontmatter tags and enough body to classify. Action: ask
//! the LLM for candidate tags with confidence scores, keep the confident
//! ones, and patch them into frontmatter.
//!
//! Idempotent by construction: once tags exist the condition fails, so an
//! already-tagged note never reaches the LLM again.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use weaver_config::AutoTagConfig;
use weaver_core::{
    Diagnostic, FrontmatterPatch, LlmError, LlmOptions, NoteUpdate, RuleEffects, RuleTrigger,
};

use crate::rule::{Rule, RuleContext, RuleMetadata};

pub struct AutoTagRule {
    config: AutoTagConfig,
}

#[derive(Debug, Deserialize)]
struct TagSuggestion {
    name: String,
    #[serde(alias = "conf")]
    confidence: f64,
}

impl AutoTagRule {
    pub fn new(config: AutoTagConfig) -> Self {
        Self { config }
    }

    fn prompt(body: &str) -> String {
        format!(
            "Suggest 3 to 5 topical tags for the note below. Respond with only a JSON \
             array of objects shaped {{\"name\": string, \"confidence\": number between 0 and 1}}. \
             Tags are lowercase, single words or slash-separated phrases, no leading '#'.\n\
             \n\
             Note:\n{body}"
        )
    }
}

#[async_trait]
impl Rule for AutoTagRule {
    fn id(&self) -> &str {
        "auto-tag"
    }

    fn name(&self) -> &str {
        "Auto Tag"
    }

    fn trigger(&self) -> RuleTrigger {
        RuleTrigger::FileAdd
    }

    fn extra_triggers(&self) -> Vec<RuleTrigger> {
        if self.config.on_change {
            vec![RuleTrigger::FileChange]
        } else {
            Vec::new()
        }
    }

    fn priority(&self) -> i32 {
        200
    }

    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            description: "Tags untagged notes with LLM-suggested topics".into(),
            category: "enrichment".into(),
            tags: vec!["llm".into(), "frontmatter".into()],
        }
    }

    async fn condition(&self, ctx: &RuleContext) -> anyhow::Result<bool> {
        let Some(note) = ctx.note() else {
            return Ok(false);
        };
        let existing = note.frontmatter.get_string_list("tags");
        Ok(existing.is_empty() && note.body.trim().len() >= self.config.min_content_length)
    }

    async fn action(&self, ctx: &RuleContext) -> anyhow::Result<RuleEffects> {
        let note = ctx
            .note()
            .ok_or_else(|| anyhow::anyhow!("auto-tag ran without a note"))?;

        let output = match ctx
            .llm()
            .complete(&Self::prompt(&note.body), LlmOptions::json())
            .await
        {
            Ok(output) => output,
            // A down provider or a garbled response is a skip, not a rule
            // failure: the note stays untagged and a later event retries.
            Err(e @ (LlmError::CircuitOpen | LlmError::Parse { .. })) => {
                return Ok(RuleEffects::none()
                    .with_diagnostic(Diagnostic::new(e.kind(), e.to_string())));
            }
            Err(e) => return Err(e.into()),
        };

        let suggestions: Vec<TagSuggestion> = match output.as_json() {
            Some(value) => serde_json::from_value(value.clone())
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let existing = note.frontmatter.get_string_list("tags");
        let mut tags: Vec<String> = existing
            .iter()
            .map(|t| t.trim_start_matches('#').to_lowercase())
            .collect();
        for suggestion in suggestions {
            if suggestion.confidence < self.config.confidence_threshold {
                continue;
            }
            let tag = suggestion
                .name
                .trim()
                .trim_start_matches('#')
                .to_lowercase();
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        tags.truncate(self.config.max_tags);

        if tags.is_empty() {
            debug!(path = %note.path, "no confident tag suggestions");
            return Ok(RuleEffects::none());
        }

        let value = serde_yaml::Value::Sequence(
            tags.iter()
                .map(|t| serde_yaml::Value::String(t.clone()))
                .collect(),
        );
        Ok(RuleEffects::none().with_note_update(NoteUpdate {
            path: note.path.clone(),
            frontmatter: vec![FrontmatterPatch::Set {
                key: "tags".into(),
                value,
            }],
            body_edits: Vec::new(),
        }))
    }
}
