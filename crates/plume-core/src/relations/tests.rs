use super::*;
use crate::{RecordKind, RecordSignature, Timestamp};

fn id(n: u8) -> RecordId {
    RecordId::from_bytes([n; 32])
}

fn author(n: u8) -> AuthorId {
    AuthorId::from_bytes([n; 32])
}

fn e_tag(n: u8, marker: &str) -> Tag {
    Tag::new(["e".to_owned(), id(n).to_string(), String::new(), marker.to_owned()])
}

fn p_tag(n: u8) -> Tag {
    Tag::new(["p".to_owned(), author(n).to_string()])
}

fn record(kind: RecordKind, tags: Vec<Tag>) -> Record {
    Record::builder()
        .id(id(0xaa))
        .author(author(0xbb))
        .created_at(Timestamp(10))
        .kind(kind)
        .tags(tags)
        .sig(RecordSignature::from_bytes([1; 64]))
        .build()
}

#[test]
fn explicit_reply_marker_wins_over_fallback() {
    let r = record(
        RecordKind::NOTE,
        vec![e_tag(1, "root"), e_tag(2, "reply"), e_tag(3, "")],
    );

    for fallback in [
        ReplyFallback::LastRelation,
        ReplyFallback::FirstRelation,
        ReplyFallback::Disabled,
    ] {
        assert_eq!(r.parent_id(fallback), Some(id(2)));
    }
    assert_eq!(r.root_id(), Some(id(1)));
}

#[test]
fn unmarked_relations_follow_fallback_policy() {
    let r = record(RecordKind::NOTE, vec![e_tag(1, ""), e_tag(2, ""), e_tag(3, "")]);

    assert_eq!(r.parent_id(ReplyFallback::LastRelation), Some(id(3)));
    assert_eq!(r.parent_id(ReplyFallback::FirstRelation), Some(id(1)));
    assert_eq!(r.parent_id(ReplyFallback::Disabled), None);
    assert_eq!(r.root_id(), Some(id(1)));
}

#[test]
fn mentions_are_not_reply_relations() {
    let r = record(RecordKind::NOTE, vec![e_tag(1, "mention"), p_tag(5)]);

    assert!(!r.is_reply());
    assert_eq!(r.parent_id(ReplyFallback::LastRelation), None);
    assert_eq!(r.reply_target_author(), None);
    assert_eq!(r.mentioned_authors(), vec![author(5)]);
}

#[test]
fn reply_target_author_is_first_mentioned_author() {
    let r = record(RecordKind::NOTE, vec![p_tag(5), e_tag(1, ""), p_tag(6)]);

    assert_eq!(r.reply_target_author(), Some(author(5)));
}

#[test]
fn unparsable_ids_are_skipped() {
    let r = record(
        RecordKind::NOTE,
        vec![e_tag(1, ""), Tag::new(["e", "not-hex"]), Tag::new(["e"])],
    );

    assert_eq!(r.parent_id(ReplyFallback::LastRelation), Some(id(1)));
}

#[test]
fn reposts_have_target_not_parent() {
    let r = record(RecordKind::REPOST, vec![e_tag(7, ""), p_tag(5)]);

    assert_eq!(r.repost_target(), Some(id(7)));
    assert_eq!(r.parent_id(ReplyFallback::LastRelation), None);
    assert!(!r.is_reply());
    assert_eq!(r.reply_target_author(), None);

    let note = record(RecordKind::NOTE, vec![e_tag(7, "")]);
    assert_eq!(note.repost_target(), None);
}

#[test]
fn topics_are_case_folded() {
    let r = record(
        RecordKind::NOTE,
        vec![
            Tag::new(["t", "Rust"]),
            Tag::new(["t", " "]),
            Tag::new(["t", "#NOSTR"]),
            Tag::new(["t", "#"]),
        ],
    );

    assert_eq!(r.topics(), vec!["rust".to_owned(), "nostr".to_owned()]);
}

#[test]
fn parent_relay_hint() {
    let r = record(
        RecordKind::NOTE,
        vec![Tag::new([
            "e".to_owned(),
            id(1).to_string(),
            "wss://r.example".to_owned(),
            "reply".to_owned(),
        ])],
    );

    assert_eq!(
        r.parent_relay_hint(ReplyFallback::LastRelation),
        Some("wss://r.example")
    );
}
