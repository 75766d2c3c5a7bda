//! Meeting note action-item extraction.
//!
//! Trigger: `FILE_CHANGE` on notes with non-empty `attendees` frontmatter
//! and a `#meeting` tag. The LLM extracts action items as JSON; they are
//! grouped by priority into a companion tasks note, linked back from the
//! meeting note, and kept raw in memory for downstream consumers.
//!
//! Re-runs are merges, not duplicates: when a companion already exists the
//! new items are folded in by case-insensitive task equality, the existing
//! companion path is reused, and the back-link is inserted at most once.
//! An extraction that adds nothing produces no effects at all.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use weaver_core::{
    BodyEdit, CreatedNote, Diagnostic, LlmError, LlmOptions, MemoryOp, NoteUpdate, RuleEffects,
    RuleTrigger,
};

use crate::library::text::slug;
use crate::rule::{Rule, RuleContext, RuleMetadata};

/// Memory namespace for raw extracted action items, keyed by meeting path.
pub const MEETINGS_NAMESPACE: &str = "meetings";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionItem {
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn default_priority() -> String {
    "medium".into()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Extraction {
    action_items: Vec<ActionItem>,
}

pub struct MeetingNoteRule;

impl MeetingNoteRule {
    pub fn new() -> Self {
        Self
    }

    fn prompt(body: &str) -> String {
        format!(
            "Extract action items from the meeting notes below. Respond with only JSON \
             shaped {{\"actionItems\": [{{\"task\": string, \"assignee\": string?, \
             \"dueDate\": string?, \"priority\": \"high\"|\"medium\"|\"low\", \
             \"context\": string?}}]}}.\n\nMeeting notes:\n{body}"
        )
    }

    fn companion_basename(title: &str) -> String {
        format!("{}-tasks-{}", slug(title), Utc::now().format("%Y-%m-%d"))
    }

    fn render_companion(meeting_basename: &str, title: &str, items: &[ActionItem]) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "---\nmeeting: \"[[{meeting_basename}]]\"\ntags:\n- tasks\n---\n# {title}: Action Items\n"
        ));
        for (priority, heading) in [
            ("high", "## High Priority"),
            ("medium", "## Medium Priority"),
            ("low", "## Low Priority"),
        ] {
            let group: Vec<&ActionItem> =
                items.iter().filter(|i| i.priority == priority).collect();
            if group.is_empty() {
                continue;
            }
            out.push_str("\n");
            out.push_str(heading);
            out.push('\n');
            for item in group {
                out.push_str(&format!("- [ ] {}", item.task));
                if let Some(assignee) = &item.assignee {
                    out.push_str(&format!(" (@{assignee})"));
                }
                if let Some(due) = &item.due_date {
                    out.push_str(&format!(" (due: {due})"));
                }
                out.push('\n');
            }
        }
        out
    }

    /// Merge new items into previously extracted ones by case-insensitive
    /// task text, never duplicating.
    fn merge(mut existing: Vec<ActionItem>, new: Vec<ActionItem>) -> Vec<ActionItem> {
        for item in new {
            let duplicate = existing
                .iter()
                .any(|e| e.task.eq_ignore_ascii_case(&item.task));
            if !duplicate {
                existing.push(item);
            }
        }
        existing
    }
}

impl Default for MeetingNoteRule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Rule for MeetingNoteRule {
    fn id(&self) -> &str {
        "meeting-note"
    }

    fn name(&self) -> &str {
        "Meeting Note"
    }

    fn trigger(&self) -> RuleTrigger {
        RuleTrigger::FileChange
    }

    fn priority(&self) -> i32 {
        250
    }

    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            description: "Extracts meeting action items into a companion tasks note".into(),
            category: "enrichment".into(),
            tags: vec!["llm".into(), "meetings".into()],
        }
    }

    async fn condition(&self, ctx: &RuleContext) -> anyhow::Result<bool> {
        let Some(note) = ctx.note() else {
            return Ok(false);
        };
        let has_attendees = !note.frontmatter.get_string_list("attendees").is_empty();
        Ok(has_attendees && note.tags.contains("meeting"))
    }

    async fn action(&self, ctx: &RuleContext) -> anyhow::Result<RuleEffects> {
        let note = ctx
            .note()
            .ok_or_else(|| anyhow::anyhow!("meeting-note ran without a note"))?;

        let output = match ctx
            .llm()
            .complete(&Self::prompt(&note.body), LlmOptions::json())
            .await
        {
            Ok(output) => output,
            Err(e @ (LlmError::CircuitOpen | LlmError::Parse { .. })) => {
                return Ok(RuleEffects::none()
                    .with_diagnostic(Diagnostic::new(e.kind(), e.to_string())));
            }
            Err(e) => return Err(e.into()),
        };
        let extraction: Extraction = match output.as_json() {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or(Extraction {
                action_items: Vec::new(),
            }),
            None => Extraction {
                action_items: Vec::new(),
            },
        };
        if extraction.action_items.is_empty() {
            debug!(path = %note.path, "no action items extracted");
            return Ok(RuleEffects::none());
        }

        let previous: Vec<ActionItem> = match ctx
            .memory()
            .get(MEETINGS_NAMESPACE, &note.path)
            .await?
        {
            Some(value) => serde_json::from_value(value).unwrap_or_default(),
            None => Vec::new(),
        };
        let merged = Self::merge(previous.clone(), extraction.action_items);

        let directory = match note.path.rsplit_once('/') {
            Some((dir, _)) => format!("{dir}/"),
            None => String::new(),
        };
        // An existing companion keeps its path (and date suffix); the merge
        // lands in the same file instead of spawning a new one per day.
        let prefix = format!("{}-tasks-", slug(&note.title));
        let existing_companion = ctx
            .cache()
            .note_titles()
            .await?
            .into_iter()
            .map(|(path, _)| path)
            .find(|path| {
                path.starts_with(&directory)
                    && weaver_core::note::basename_of(path).starts_with(&prefix)
            });
        let companion_path = existing_companion
            .unwrap_or_else(|| {
                format!("{directory}{}.md", Self::companion_basename(&note.title))
            });
        let companion_basename = weaver_core::note::basename_of(&companion_path).to_string();
        let link_present = note.body.contains(&companion_basename);

        // Nothing new and the back-link is in place: converged, touch
        // nothing so re-runs cannot churn the vault.
        if merged == previous && link_present {
            debug!(path = %note.path, "action items already up to date");
            return Ok(RuleEffects::none());
        }

        let companion = Self::render_companion(note.basename(), &note.title, &merged);

        let mut effects = RuleEffects::none()
            .with_created_note(CreatedNote {
                path: companion_path,
                content: companion,
                overwrite: true,
            })
            .with_memory_op(MemoryOp::Put {
                namespace: MEETINGS_NAMESPACE.into(),
                key: note.path.clone(),
                value: serde_json::to_value(&merged)?,
                ttl_ms: 0,
            });

        // Link the meeting note to its tasks note, once.
        if !link_present {
            let insertion = format!("\n\n[[{companion_basename}]]\n");
            effects = effects.with_note_update(NoteUpdate {
                path: note.path.clone(),
                frontmatter: Vec::new(),
                body_edits: vec![BodyEdit {
                    start: note.body.len(),
                    end: note.body.len(),
                    replacement: insertion,
                }],
            });
        }
        Ok(effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(task: &str, priority: &str) -> ActionItem {
        ActionItem {
            task: task.into(),
            assignee: None,
            due_date: None,
            priority: priority.into(),
            context: None,
        }
    }

    #[test]
    fn merge_deduplicates_case_insensitively() {
        let existing = vec![item("Ship the report", "high")];
        let incoming = vec![
            item("ship the report", "medium"),
            item("Schedule follow-up", "low"),
        ];
        let merged = MeetingNoteRule::merge(existing, incoming);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].task, "Ship the report");
        // The first-seen item wins, including its priority.
        assert_eq!(merged[0].priority, "high");
    }

    #[test]
    fn companion_groups_by_priority() {
        let items = vec![
            item("urgent thing", "high"),
            item("someday thing", "low"),
            item("normal thing", "medium"),
        ];
        let rendered = MeetingNoteRule::render_companion("Weekly Sync", "Weekly Sync", &items);
        let high = rendered.find("## High Priority").unwrap();
        let medium = rendered.find("## Medium Priority").unwrap();
        let low = rendered.find("## Low Priority").unwrap();
        assert!(high < medium && medium < low);
        assert!(rendered.contains("meeting: \"[[Weekly Sync]]\""));
    }

    #[test]
    fn assignee_and_due_date_render_inline() {
        let mut task = item("review pr", "medium");
        task.assignee = Some("sam".into());
        task.due_date = Some("2024-04-01".into());
        let rendered = MeetingNoteRule::render_companion("m", "M", &[task]);
        assert!(rendered.contains("- [ ] review pr (@sam) (due: 2024-04-01)"));
    }
}
