//! Markdown note parsing.
//!
//! `(path, bytes) -> ParsedNote` with deterministic extraction of
//! frontmatter, the tag set, outgoing links, the display title, and a stable
//! content hash. Parsing never fails: malformed input degrades to an empty
//! frontmatter map plus a diagnostic, and the body falls back to the full
//! content.
//!
//! Link resolution against the rest of the vault is not done here; the
//! shadow cache owns resolution state so broken-link tracking can follow
//! target notes as they appear and disappear.

mod extract;
mod frontmatter;

pub use frontmatter::{serialize_note, split_frontmatter};

use weaver_core::{content_hash, Diagnostic, ErrorKind, Frontmatter, ParsedNote};

/// Stateless note parser. Construct once and reuse; the extraction regexes
/// are compiled lazily and shared.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoteParser;

impl NoteParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse raw note bytes into a [`ParsedNote`].
    ///
    /// Re-parsing identical bytes yields an identical result, including the
    /// content hash, which is computed over LF-normalized bytes.
    pub fn parse(&self, path: &str, bytes: &[u8]) -> ParsedNote {
        let content = String::from_utf8_lossy(bytes).into_owned();
        let hash = content_hash(bytes);
        let mut diagnostics = Vec::new();

        let (frontmatter, body) = match split_frontmatter(&content) {
            Some((yaml, body)) => match Frontmatter::from_yaml(yaml) {
                Ok(fm) => (fm, body.to_string()),
                Err(err) => {
                    diagnostics.push(
                        Diagnostic::new(
                            ErrorKind::FrontmatterInvalid,
                            format!("unparseable frontmatter: {err}"),
                        )
                        .with_context(serde_json::json!({ "path": path })),
                    );
                    // Body falls back to the full content so nothing is lost.
                    (Frontmatter::empty(), content.clone())
                }
            },
            None => (Frontmatter::empty(), content.clone()),
        };

        let fences = extract::fence_ranges(&body);
        let mut tags = extract::inline_tags(&body, &fences);
        for raw in frontmatter.get_string_list("tags") {
            let tag = raw.trim().trim_start_matches('#').to_lowercase();
            if !tag.is_empty() {
                tags.insert(tag);
            }
        }

        // Wikilinks may appear in frontmatter values too; scan the whole
        // content. Fence ranges are body-relative, so shift by the body's
        // offset into the content when masking.
        let body_offset = content.len() - body.len();
        let mut positioned = extract::wikilinks(path, &content, &fences, body_offset);
        positioned.extend(
            extract::markdown_links(path, &body, &fences)
                .into_iter()
                .map(|(pos, link)| (pos + body_offset, link)),
        );
        positioned.sort_by_key(|(pos, _)| *pos);
        let links = positioned.into_iter().map(|(_, link)| link).collect();

        let title = extract::title(&body, &fences)
            .unwrap_or_else(|| weaver_core::note::basename_of(path).to_string());

        ParsedNote {
            path: path.to_string(),
            title,
            frontmatter,
            body,
            tags,
            links,
            content_hash: hash,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weaver_core::LinkKind;

    fn parse(content: &str) -> ParsedNote {
        NoteParser::new().parse("notes/test.md", content.as_bytes())
    }

    #[test]
    fn plain_note_has_empty_projections() {
        let parsed = parse("Graph theory");
        assert!(parsed.frontmatter.is_empty());
        assert!(parsed.tags.is_empty());
        assert!(parsed.links.is_empty());
        assert_eq!(parsed.body, "Graph theory");
        assert_eq!(parsed.title, "test");
    }

    #[test]
    fn reparse_is_deterministic() {
        let content = "---\ntags: [A]\n---\nBody with [[Link]] and #tag\n";
        let a = parse(content);
        let b = parse(content);
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_frontmatter_degrades_with_diagnostic() {
        let content = "---\n: [unbalanced\n---\nBody\n";
        let parsed = parse(content);
        assert!(parsed.frontmatter.is_empty());
        assert_eq!(parsed.body, content);
        assert_eq!(parsed.diagnostics.len(), 1);
        assert_eq!(parsed.diagnostics[0].kind, ErrorKind::FrontmatterInvalid);
    }

    #[test]
    fn tags_union_frontmatter_and_inline() {
        let content = "---\ntags: [Research, \"#Graph\"]\n---\nInline #Misc and #research again\n";
        let parsed = parse(content);
        let tags: Vec<&str> = parsed.tags.iter().map(|s| s.as_str()).collect();
        assert_eq!(tags, vec!["graph", "misc", "research"]);
    }

    #[test]
    fn title_prefers_first_heading() {
        let parsed = parse("intro\n# Real Title\n## Sub\n");
        assert_eq!(parsed.title, "Real Title");
    }

    #[test]
    fn links_keep_document_order() {
        let parsed = parse("[[Alpha]] then [ext](https://example.com) then [[Beta|B]]");
        assert_eq!(parsed.links.len(), 3);
        assert_eq!(parsed.links[0].target, "Alpha");
        assert_eq!(parsed.links[0].kind, LinkKind::Wikilink);
        assert_eq!(parsed.links[1].target, "https://example.com");
        assert_eq!(parsed.links[1].kind, LinkKind::Markdown);
        assert_eq!(parsed.links[2].display.as_deref(), Some("B"));
    }
}
