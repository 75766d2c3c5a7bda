//! Parse/serialize laws for engine-authored notes.
//!
//! Notes the engine writes must survive a parse→serialize cycle byte for
//! byte; user-authored notes must keep their unknown frontmatter keys and
//! key order through a patch cycle.

use weaver_core::rule::FrontmatterPatch;
use weaver_core::Frontmatter;
use weaver_parser::{serialize_note, split_frontmatter, NoteParser};

#[test]
fn engine_authored_notes_round_trip_exactly() {
    let mut frontmatter = Frontmatter::empty();
    frontmatter.set("title", serde_yaml::Value::String("Graph Notes".into()));
    frontmatter.set(
        "tags",
        serde_yaml::Value::Sequence(vec![
            serde_yaml::Value::String("graph".into()),
            serde_yaml::Value::String("research".into()),
        ]),
    );
    let body = "# Graph Notes\n\nSome body text.\n";
    let bytes = serialize_note(&frontmatter, body);

    let parsed = NoteParser::new().parse("notes/graph.md", bytes.as_bytes());
    assert_eq!(serialize_note(&parsed.frontmatter, &parsed.body), bytes);
}

#[test]
fn patch_cycle_preserves_unknown_keys_and_order() {
    let original = "---\ncustom-plugin-field: keep\naliases:\n- GN\ntitle: Old\n---\nbody\n";
    let (yaml, body) = split_frontmatter(original).unwrap();
    let mut frontmatter = Frontmatter::from_yaml(yaml).unwrap();

    frontmatter.apply_patches(&[
        FrontmatterPatch::Set {
            key: "title".into(),
            value: serde_yaml::Value::String("New".into()),
        },
        FrontmatterPatch::Set {
            key: "tags".into(),
            value: serde_yaml::Value::Sequence(vec![serde_yaml::Value::String("x".into())]),
        },
    ]);

    let rewritten = serialize_note(&frontmatter, body);
    // Unknown keys survive, original order holds, engine keys append.
    let custom = rewritten.find("custom-plugin-field").unwrap();
    let aliases = rewritten.find("aliases").unwrap();
    let title = rewritten.find("title").unwrap();
    let tags = rewritten.find("tags").unwrap();
    assert!(custom < aliases && aliases < title && title < tags);
    assert!(rewritten.contains("title: New"));
    assert!(rewritten.ends_with("---\nbody\n"));
}

#[test]
fn reparsing_rewritten_notes_is_stable() {
    let parser = NoteParser::new();
    let original = "---\ntags: [a]\n---\nSee [[Other Note]] and #inline\n";
    let first = parser.parse("n.md", original.as_bytes());
    let rewritten = serialize_note(&first.frontmatter, &first.body);
    let second = parser.parse("n.md", rewritten.as_bytes());

    assert_eq!(first.tags, second.tags);
    assert_eq!(first.links, second.links);
    assert_eq!(first.body, second.body);
}
