//! Notes and their projections.
//!
//! The vault exclusively owns note bytes. Everything in this module is a
//! projection derived from those bytes: the shadow cache and the memory
//! store hold copies keyed by path, never references into each other.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Diagnostic;
use crate::rule::FrontmatterPatch;

/// Structured metadata block at the start of a note.
///
/// Wraps a YAML mapping and preserves key order: keys already present keep
/// their file position when patched, keys added by the engine are appended.
/// Unknown keys are always carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frontmatter {
    map: serde_yaml::Mapping,
}

impl Frontmatter {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a raw YAML document into frontmatter.
    ///
    /// Only mapping documents are accepted; scalars and sequences are
    /// rejected so a stray `---` ruler is not mistaken for metadata.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::empty());
        }
        let map: serde_yaml::Mapping = serde_yaml::from_str(yaml)?;
        Ok(Self { map })
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn get(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.map.get(serde_yaml::Value::String(key.to_string()))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    /// Read a field that Obsidian allows as either a scalar or a list.
    ///
    /// `tags: foo` and `tags: [foo, bar]` both normalize to a list of
    /// strings; non-string items are skipped.
    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(serde_yaml::Value::String(s)) => vec![s.clone()],
            Some(serde_yaml::Value::Sequence(seq)) => seq
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Set a key, keeping its position if already present, appending if new.
    pub fn set(&mut self, key: impl Into<String>, value: serde_yaml::Value) {
        self.map.insert(serde_yaml::Value::String(key.into()), value);
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.map
            .remove(serde_yaml::Value::String(key.to_string()))
            .is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.keys().filter_map(|k| k.as_str())
    }

    /// Apply a batch of patches.
    ///
    /// Existing keys are updated in place; keys new to this note are applied
    /// in sorted order so the serialized output is stable across runs.
    pub fn apply_patches(&mut self, patches: &[FrontmatterPatch]) {
        let mut added: Vec<(&String, &serde_yaml::Value)> = Vec::new();
        for patch in patches {
            match patch {
                FrontmatterPatch::Set { key, value } => {
                    if self.get(key).is_some() {
                        self.set(key.clone(), value.clone());
                    } else {
                        added.push((key, value));
                    }
                }
                FrontmatterPatch::Remove { key } => {
                    self.remove(key);
                }
            }
        }
        added.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in added {
            self.set(key.clone(), value.clone());
        }
    }

    /// Serialize to a YAML document body (no `---` delimiters).
    pub fn to_yaml(&self) -> String {
        if self.map.is_empty() {
            return String::new();
        }
        // Mapping serialization cannot fail for values that came from YAML.
        serde_yaml::to_string(&self.map).unwrap_or_default()
    }
}

/// How a link was written in the source markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Wikilink,
    Markdown,
}

/// An outgoing reference from one note to another target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteLink {
    pub source_path: String,
    /// Raw trimmed target: a path-like reference, a basename, or a URL.
    pub target: String,
    pub kind: LinkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    /// Vault path of the resolved target note, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<String>,
    /// True iff this is a wikilink with no matching note in the vault.
    #[serde(default)]
    pub broken: bool,
}

impl NoteLink {
    pub fn is_external(&self) -> bool {
        self.kind == LinkKind::Markdown
            && (self.target.starts_with("http://") || self.target.starts_with("https://"))
    }
}

/// Deterministic parse output for one note: `(path, bytes) -> ParsedNote`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedNote {
    /// Vault-relative path, forward slashes, case preserved.
    pub path: String,
    /// First `# ` heading, falling back to the file stem.
    pub title: String,
    pub frontmatter: Frontmatter,
    /// Content without the frontmatter block.
    pub body: String,
    /// Case-folded tag set: frontmatter `tags` plus inline `#tag`s.
    pub tags: BTreeSet<String>,
    /// Outgoing links in document order.
    pub links: Vec<NoteLink>,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl ParsedNote {
    /// Basename without the `.md` extension, used for wikilink resolution.
    pub fn basename(&self) -> &str {
        basename_of(&self.path)
    }
}

/// A note as the shadow cache sees it: a parse plus vault timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub path: String,
    pub title: String,
    pub frontmatter: Frontmatter,
    pub body: String,
    pub tags: BTreeSet<String>,
    pub links: Vec<NoteLink>,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Note {
    pub fn from_parsed(
        parsed: ParsedNote,
        created_at: DateTime<Utc>,
        modified_at: DateTime<Utc>,
    ) -> Self {
        Self {
            path: parsed.path,
            title: parsed.title,
            frontmatter: parsed.frontmatter,
            body: parsed.body,
            tags: parsed.tags,
            links: parsed.links,
            content_hash: parsed.content_hash,
            created_at,
            modified_at,
        }
    }

    pub fn basename(&self) -> &str {
        basename_of(&self.path)
    }
}

/// Basename of a vault path without the `.md` extension.
pub fn basename_of(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.strip_suffix(".md").unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontmatter_preserves_unknown_keys_and_order() {
        let mut fm = Frontmatter::from_yaml("zeta: 1\ncustom-field: keep me\nalpha: 2\n").unwrap();
        fm.apply_patches(&[FrontmatterPatch::Set {
            key: "alpha".into(),
            value: serde_yaml::Value::from(3),
        }]);

        let keys: Vec<&str> = fm.keys().collect();
        assert_eq!(keys, vec!["zeta", "custom-field", "alpha"]);
        assert_eq!(fm.get_str("custom-field"), Some("keep me"));
    }

    #[test]
    fn engine_added_keys_append_in_sorted_order() {
        let mut fm = Frontmatter::from_yaml("title: x\n").unwrap();
        fm.apply_patches(&[
            FrontmatterPatch::Set {
                key: "tags".into(),
                value: serde_yaml::Value::from(vec!["a"]),
            },
            FrontmatterPatch::Set {
                key: "linked".into(),
                value: serde_yaml::Value::from(true),
            },
        ]);
        let keys: Vec<&str> = fm.keys().collect();
        assert_eq!(keys, vec!["title", "linked", "tags"]);
    }

    #[test]
    fn string_or_list_tags_normalize() {
        let fm = Frontmatter::from_yaml("tags: solo\n").unwrap();
        assert_eq!(fm.get_string_list("tags"), vec!["solo"]);

        let fm = Frontmatter::from_yaml("tags: [a, b]\n").unwrap();
        assert_eq!(fm.get_string_list("tags"), vec!["a", "b"]);

        let fm = Frontmatter::empty();
        assert!(fm.get_string_list("tags").is_empty());
    }

    #[test]
    fn scalar_document_is_rejected() {
        assert!(Frontmatter::from_yaml("just a string").is_err());
    }

    #[test]
    fn basename_resolution() {
        assert_eq!(basename_of("concepts/Graph Theory.md"), "Graph Theory");
        assert_eq!(basename_of("top.md"), "top");
        assert_eq!(basename_of("dir/sub/x"), "x");
    }
}
