//! Auto-linking of phrases that name other notes.
//!
//! Trigger: `FILE_CHANGE` (plus `FILE_ADD`). Candidate phrases are
//! capitalized runs of 2–5 words; each is matched against existing note
//! titles case-insensitively with a Levenshtein ratio floor. Only the
//! first occurrence of a phrase is linked, existing wikilinks are never
//! touched, and a note never links to itself.

use std::ops::Range;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use weaver_config::AutoLinkConfig;
use weaver_core::note::basename_of;
use weaver_core::{BodyEdit, NoteUpdate, RuleEffects, RuleTrigger};

use crate::library::text::similarity;
use crate::rule::{Rule, RuleContext, RuleMetadata};

static CANDIDATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Z][A-Za-z0-9']*(?:[ ][A-Z][A-Za-z0-9']*){1,4}\b")
        .expect("candidate phrase regex")
});

static WIKILINK_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[[^\[\]]*\]\]").expect("wikilink span regex"));

pub struct AutoLinkRule {
    config: AutoLinkConfig,
}

impl AutoLinkRule {
    pub fn new(config: AutoLinkConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Rule for AutoLinkRule {
    fn id(&self) -> &str {
        "auto-link"
    }

    fn name(&self) -> &str {
        "Auto Link"
    }

    fn trigger(&self) -> RuleTrigger {
        RuleTrigger::FileChange
    }

    fn extra_triggers(&self) -> Vec<RuleTrigger> {
        vec![RuleTrigger::FileAdd]
    }

    fn priority(&self) -> i32 {
        150
    }

    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            description: "Wraps phrases naming existing notes in wikilinks".into(),
            category: "enrichment".into(),
            tags: vec!["links".into()],
        }
    }

    async fn condition(&self, ctx: &RuleContext) -> anyhow::Result<bool> {
        Ok(ctx
            .note()
            .is_some_and(|n| n.body.trim().len() > self.config.min_content_length))
    }

    async fn action(&self, ctx: &RuleContext) -> anyhow::Result<RuleEffects> {
        let note = ctx
            .note()
            .ok_or_else(|| anyhow::anyhow!("auto-link ran without a note"))?;
        let body = &note.body;

        // Existing wikilinks are sacrosanct: nothing inside them may be
        // touched or re-linked.
        let masked: Vec<Range<usize>> = WIKILINK_SPAN
            .find_iter(body)
            .map(|m| m.start()..m.end())
            .collect();
        let own_title = note.title.to_lowercase();
        let own_basename = note.basename().to_lowercase();

        let mut candidates: Vec<String> = Vec::new();
        for m in CANDIDATE.find_iter(body) {
            if candidates.len() >= self.config.max_candidates {
                break;
            }
            if overlaps(&masked, m.start(), m.end()) {
                continue;
            }
            let phrase = m.as_str().to_string();
            let lower = phrase.to_lowercase();
            if lower == own_title || lower == own_basename {
                continue;
            }
            if !candidates.contains(&phrase) {
                candidates.push(phrase);
            }
        }
        if candidates.is_empty() {
            return Ok(RuleEffects::none());
        }

        let titles = ctx.cache().note_titles().await?;
        let mut edits: Vec<BodyEdit> = Vec::new();
        let mut claimed: Vec<Range<usize>> = masked.clone();

        for phrase in candidates {
            if edits.len() >= self.config.max_links {
                break;
            }
            let lower = phrase.to_lowercase();

            // Best target across titles and basenames.
            let mut best: Option<(&str, f64)> = None;
            for (path, title) in &titles {
                if *path == note.path {
                    continue;
                }
                let score = similarity(&lower, &title.to_lowercase())
                    .max(similarity(&lower, &basename_of(path).to_lowercase()));
                if score >= self.config.match_threshold
                    && best.map_or(true, |(_, s)| score > s)
                {
                    best = Some((path, score));
                }
            }
            let Some((target_path, _)) = best else { continue };
            let target = basename_of(target_path);

            // First free occurrence only.
            let Some(start) = body
                .match_indices(&phrase)
                .map(|(i, _)| i)
                .find(|&i| !overlaps(&claimed, i, i + phrase.len()))
            else {
                continue;
            };
            let end = start + phrase.len();

            let replacement = if target.eq_ignore_ascii_case(&phrase) {
                format!("[[{phrase}]]")
            } else {
                format!("[[{target}|{phrase}]]")
            };
            claimed.push(start..end);
            edits.push(BodyEdit {
                start,
                end,
                replacement,
            });
        }

        if edits.is_empty() {
            return Ok(RuleEffects::none());
        }
        Ok(RuleEffects::none().with_note_update(NoteUpdate {
            path: note.path.clone(),
            frontmatter: Vec::new(),
            body_edits: edits,
        }))
    }
}

fn overlaps(ranges: &[Range<usize>], start: usize, end: usize) -> bool {
    ranges.iter().any(|r| start < r.end && end > r.start)
}
