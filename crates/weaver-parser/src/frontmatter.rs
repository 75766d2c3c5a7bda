//! Frontmatter block splitting and note serialization.

use weaver_core::Frontmatter;

/// Split a leading `---` frontmatter block from note content.
///
/// Returns `(yaml, body)` when a complete block exists: the content starts
/// with a `---` line and a closing `---` line follows. Anything else,
/// including an unterminated opener, is treated as plain body.
pub fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix("---\r\n").or_else(|| content.strip_prefix("---\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((yaml, body));
        }
        offset += line.len();
    }
    // Closing delimiter on the final line without a trailing newline.
    if rest[offset..].is_empty() && rest.ends_with("\n---") {
        let yaml = &rest[..rest.len() - 4];
        return Some((yaml, ""));
    }
    None
}

/// Serialize frontmatter plus body back into note bytes.
///
/// The inverse of parsing for engine-authored notes: an empty map yields the
/// bare body, otherwise a `---` block followed by the body unchanged.
pub fn serialize_note(frontmatter: &Frontmatter, body: &str) -> String {
    if frontmatter.is_empty() {
        return body.to_string();
    }
    format!("---\n{}---\n{}", frontmatter.to_yaml(), body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_well_formed_block() {
        let content = "---\ntitle: X\n---\nBody here\n";
        let (yaml, body) = split_frontmatter(content).unwrap();
        assert_eq!(yaml, "title: X\n");
        assert_eq!(body, "Body here\n");
    }

    #[test]
    fn unterminated_block_is_body() {
        assert!(split_frontmatter("---\ntitle: X\nno closer\n").is_none());
    }

    #[test]
    fn ruler_later_in_file_is_not_frontmatter() {
        assert!(split_frontmatter("intro\n---\nmore\n---\n").is_none());
    }

    #[test]
    fn crlf_delimiters_are_accepted() {
        let content = "---\r\ntitle: X\r\n---\r\nBody\r\n";
        let (yaml, body) = split_frontmatter(content).unwrap();
        assert_eq!(yaml, "title: X\r\n");
        assert_eq!(body, "Body\r\n");
    }

    #[test]
    fn serialize_round_trips_authored_notes() {
        let content = "---\ntitle: X\ntags:\n- a\n---\nBody here\n";
        let (yaml, body) = split_frontmatter(content).unwrap();
        let fm = Frontmatter::from_yaml(yaml).unwrap();
        assert_eq!(serialize_note(&fm, body), content);
    }

    #[test]
    fn empty_frontmatter_serializes_to_bare_body() {
        assert_eq!(serialize_note(&Frontmatter::empty(), "Body\n"), "Body\n");
    }
}
