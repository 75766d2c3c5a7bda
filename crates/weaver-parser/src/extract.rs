//! Tag, link, and title extraction with fenced-code masking.

use std::collections::BTreeSet;
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;
use weaver_core::{LinkKind, NoteLink};

static WIKILINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\[\]]+?)\]\]").expect("wikilink regex"));

static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]\[]*)\]\(([^)\s]+)\)").expect("markdown link regex"));

// A tag needs a letter up front; `#2024` alone is a heading-ish fragment,
// not a tag.
static INLINE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#([A-Za-z][A-Za-z0-9_/-]*)").expect("tag regex"));

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#\s+(.+?)\s*$").expect("heading regex"));

/// Byte ranges of fenced code blocks (``` or ~~~), fences included.
///
/// An unclosed fence extends to the end of the body.
pub(crate) fn fence_ranges(body: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut fence_start: Option<usize> = None;
    let mut offset = 0;

    for line in body.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            match fence_start.take() {
                Some(start) => ranges.push(start..offset + line.len()),
                None => fence_start = Some(offset),
            }
        }
        offset += line.len();
    }
    if let Some(start) = fence_start {
        ranges.push(start..body.len());
    }
    ranges
}

pub(crate) fn in_fence(fences: &[Range<usize>], pos: usize) -> bool {
    fences.iter().any(|r| r.contains(&pos))
}

/// Inline `#tag` occurrences outside fenced code, case-folded.
pub(crate) fn inline_tags(body: &str, fences: &[Range<usize>]) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    for caps in INLINE_TAG.captures_iter(body) {
        let m = caps.get(0).expect("whole match");
        if in_fence(fences, m.start()) {
            continue;
        }
        // Require a word boundary before the hash so `a#b` and URLs with
        // fragments are not mistaken for tags.
        if m.start() > 0 {
            let prev = body[..m.start()].chars().next_back().expect("prev char");
            if !prev.is_whitespace() && prev != '(' {
                continue;
            }
        }
        tags.insert(caps[1].to_lowercase());
    }
    tags
}

/// First `# ` heading outside fenced code.
pub(crate) fn title(body: &str, fences: &[Range<usize>]) -> Option<String> {
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if !in_fence(fences, offset) {
            if let Some(caps) = HEADING.captures(line.trim_end_matches(['\r', '\n'])) {
                return Some(caps[1].to_string());
            }
        }
        offset += line.len();
    }
    None
}

/// Wikilinks over the full content, positions content-relative.
///
/// Fence ranges are body-relative; `body_offset` maps them into content
/// space so frontmatter scanning stays unmasked.
pub(crate) fn wikilinks(
    source_path: &str,
    content: &str,
    fences: &[Range<usize>],
    body_offset: usize,
) -> Vec<(usize, NoteLink)> {
    let mut links = Vec::new();
    for caps in WIKILINK.captures_iter(content) {
        let m = caps.get(0).expect("whole match");
        if m.start() >= body_offset && in_fence(fences, m.start() - body_offset) {
            continue;
        }
        let inner = caps[1].trim();
        let (raw_target, display) = match inner.split_once('|') {
            Some((t, d)) => (t.trim(), Some(d.trim().to_string())),
            None => (inner, None),
        };
        // Heading and block references point into a note; resolution only
        // cares about the note itself.
        let target = raw_target
            .split_once('#')
            .map(|(t, _)| t)
            .unwrap_or(raw_target)
            .trim();
        if target.is_empty() {
            continue;
        }
        links.push((
            m.start(),
            NoteLink {
                source_path: source_path.to_string(),
                target: target.to_string(),
                kind: LinkKind::Wikilink,
                display,
                resolved_path: None,
                broken: false,
            },
        ));
    }
    links
}

/// `[text](target)` links in the body, positions body-relative.
///
/// External URLs are recorded but never resolved.
pub(crate) fn markdown_links(
    source_path: &str,
    body: &str,
    fences: &[Range<usize>],
) -> Vec<(usize, NoteLink)> {
    let mut links = Vec::new();
    for caps in MARKDOWN_LINK.captures_iter(body) {
        let m = caps.get(0).expect("whole match");
        if in_fence(fences, m.start()) {
            continue;
        }
        // Skip matches that are actually the tail of a wikilink alias.
        if m.start() > 0 && body.as_bytes()[m.start() - 1] == b'[' {
            continue;
        }
        let display = caps[1].trim();
        links.push((
            m.start(),
            NoteLink {
                source_path: source_path.to_string(),
                target: caps[2].trim().to_string(),
                kind: LinkKind::Markdown,
                display: (!display.is_empty()).then(|| display.to_string()),
                resolved_path: None,
                broken: false,
            },
        ));
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_mask_tags_and_links() {
        let body = "before #real\n```\n#fake [[NotALink]]\n```\nafter\n";
        let fences = fence_ranges(body);
        assert_eq!(fences.len(), 1);

        let tags = inline_tags(body, &fences);
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["real"]);

        let links = wikilinks("t.md", body, &fences, 0);
        assert!(links.is_empty());
    }

    #[test]
    fn unclosed_fence_masks_to_end() {
        let body = "text\n```\n#hidden\n";
        let fences = fence_ranges(body);
        assert!(inline_tags(body, &fences).is_empty());
    }

    #[test]
    fn url_fragments_are_not_tags() {
        let body = "see https://example.com/page#section and #yes\n";
        let tags = inline_tags(body, &fence_ranges(body));
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["yes"]);
    }

    #[test]
    fn wikilink_heading_and_block_refs_strip() {
        let body = "[[note#Section]] [[other#^block-id|Alias]]";
        let links = wikilinks("t.md", body, &[], 0);
        assert_eq!(links[0].1.target, "note");
        assert_eq!(links[1].1.target, "other");
        assert_eq!(links[1].1.display.as_deref(), Some("Alias"));
    }

    #[test]
    fn nested_path_targets_survive() {
        let body = "[[concepts/Graph Theory|graphs]]";
        let links = wikilinks("t.md", body, &[], 0);
        assert_eq!(links[0].1.target, "concepts/Graph Theory");
    }

    #[test]
    fn markdown_links_record_external_urls() {
        let body = "[docs](https://example.com/docs) and [local](concepts/graph.md)";
        let links = markdown_links("t.md", body, &[]);
        assert_eq!(links.len(), 2);
        assert!(links[0].1.is_external());
        assert!(!links[1].1.is_external());
    }

    #[test]
    fn title_skips_fenced_headings() {
        let body = "```\n# Not This\n```\n# Yes This\n";
        assert_eq!(title(body, &fence_ranges(body)).as_deref(), Some("Yes This"));
    }
}
