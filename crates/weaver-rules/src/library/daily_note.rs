//! Daily note scaffolding with task rollover.
//!
//! Trigger: `FILE_ADD` where the filename is a `YYYY-MM-DD.md` date (UTC).
//! An empty (or still-skeletal) daily note is rendered from the template;
//! yesterday's incomplete tasks come out of memory and land under a
//! "Rollover Tasks" section, and today's open tasks are written back to
//! memory for the next rollover.

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use weaver_core::{BodyEdit, MemoryOp, NoteUpdate, RuleEffects, RuleTrigger};

use crate::rule::{Rule, RuleContext, RuleMetadata};

/// Memory namespace for per-day task lists.
pub const TASKS_NAMESPACE: &str = "daily/tasks";

static DAILY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("daily name regex"));

const TEMPLATE: &str = "# {{date}}\n\nWeek {{weekNumber}} | [[{{yesterday}}]] | [[{{tomorrow}}]]\n\n## Tasks\n\n## Notes\n";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyTask {
    pub text: String,
    pub completed: bool,
}

pub struct DailyNoteRule;

impl DailyNoteRule {
    pub fn new() -> Self {
        Self
    }

    fn date_of(path: &str) -> Option<NaiveDate> {
        let basename = weaver_core::note::basename_of(path);
        let caps = DAILY_NAME.captures(basename)?;
        NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        )
    }

    fn render(date: NaiveDate) -> String {
        let yesterday = date - Duration::days(1);
        let tomorrow = date + Duration::days(1);
        TEMPLATE
            .replace("{{date}}", &date.format("%Y-%m-%d").to_string())
            .replace("{{yesterday}}", &yesterday.format("%Y-%m-%d").to_string())
            .replace("{{tomorrow}}", &tomorrow.format("%Y-%m-%d").to_string())
            .replace("{{weekNumber}}", &date.iso_week().week().to_string())
    }
}

impl Default for DailyNoteRule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Rule for DailyNoteRule {
    fn id(&self) -> &str {
        "daily-note"
    }

    fn name(&self) -> &str {
        "Daily Note"
    }

    fn trigger(&self) -> RuleTrigger {
        RuleTrigger::FileAdd
    }

    fn priority(&self) -> i32 {
        300
    }

    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            description: "Scaffolds daily notes and rolls over unfinished tasks".into(),
            category: "scaffolding".into(),
            tags: vec!["daily".into(), "tasks".into()],
        }
    }

    async fn condition(&self, ctx: &RuleContext) -> anyhow::Result<bool> {
        let Some(note) = ctx.note() else {
            return Ok(false);
        };
        let Some(date) = Self::date_of(&note.path) else {
            return Ok(false);
        };
        let body = note.body.trim();
        Ok(body.is_empty() || body == Self::render(date).trim())
    }

    async fn action(&self, ctx: &RuleContext) -> anyhow::Result<RuleEffects> {
        let note = ctx
            .note()
            .ok_or_else(|| anyhow::anyhow!("daily-note ran without a note"))?;
        let date = Self::date_of(&note.path)
            .ok_or_else(|| anyhow::anyhow!("daily-note ran on a non-date path"))?;
        let yesterday = (date - Duration::days(1)).format("%Y-%m-%d").to_string();
        let today = date.format("%Y-%m-%d").to_string();

        let carried: Vec<DailyTask> = match ctx.memory().get(TASKS_NAMESPACE, &yesterday).await? {
            Some(value) => serde_json::from_value(value).unwrap_or_default(),
            None => Vec::new(),
        };
        let rollover: Vec<DailyTask> = carried.into_iter().filter(|t| !t.completed).collect();

        let mut rendered = Self::render(date);
        if !rollover.is_empty() {
            rendered.push_str("\n## Rollover Tasks\n\n");
            for task in &rollover {
                rendered.push_str(&format!("- [ ] {}\n", task.text));
            }
        }

        // Today's open set starts as the rollover; it stays in memory until
        // the next daily note picks it up. This append-style history is the
        // one sanctioned exception to strict rule idempotence.
        let effects = RuleEffects::none()
            .with_note_update(NoteUpdate {
                path: note.path.clone(),
                frontmatter: Vec::new(),
                body_edits: vec![BodyEdit {
                    start: 0,
                    end: note.body.len(),
                    replacement: rendered,
                }],
            })
            .with_memory_op(MemoryOp::Put {
                namespace: TASKS_NAMESPACE.into(),
                key: today,
                value: serde_json::to_value(&rollover)?,
                ttl_ms: 0,
            });
        Ok(effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_parsing_is_strict() {
        assert!(DailyNoteRule::date_of("journal/2024-03-15.md").is_some());
        assert!(DailyNoteRule::date_of("2024-3-15.md").is_none());
        assert!(DailyNoteRule::date_of("meeting-2024-03-15.md").is_none());
        assert!(DailyNoteRule::date_of("2024-13-40.md").is_none());
    }

    #[test]
    fn render_fills_all_placeholders() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let rendered = DailyNoteRule::render(date);
        assert!(rendered.contains("# 2024-03-15"));
        assert!(rendered.contains("[[2024-03-14]]"));
        assert!(rendered.contains("[[2024-03-16]]"));
        // ISO week of 2024-03-15.
        assert!(rendered.contains("Week 11"));
        assert!(!rendered.contains("{{"));
    }
}
