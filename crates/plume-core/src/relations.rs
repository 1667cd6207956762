//! Reply and repost structure derived from a record's tags
//!
//! Nothing here mutates the record; every accessor recomputes from `tags`.

use std::str::FromStr as _;

use serde::{Deserialize, Serialize};

use crate::{AuthorId, Record, RecordId, Tag};

const TAG_RECORD: &str = "e";
const TAG_AUTHOR: &str = "p";
const TAG_TOPIC: &str = "t";

const MARKER_REPLY: &str = "reply";
const MARKER_ROOT: &str = "root";
const MARKER_MENTION: &str = "mention";

/// Which reply relation counts as the parent when none is explicitly marked
/// `reply`
///
/// Clients in the wild disagree here. The older positional convention treats
/// the last `e` tag as the parent and the first as the thread root; some
/// clients only ever write a single `e` tag, and others write the parent
/// first. The choice is left to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyFallback {
    /// Last unmarked reply relation is the parent
    #[default]
    LastRelation,
    /// First unmarked reply relation is the parent
    FirstRelation,
    /// Only an explicitly marked relation is a parent
    Disabled,
}

fn tag_record_id(tag: &Tag) -> Option<RecordId> {
    tag.value().and_then(|v| RecordId::from_str(v).ok())
}

fn tag_author_id(tag: &Tag) -> Option<AuthorId> {
    tag.value().and_then(|v| AuthorId::from_str(v).ok())
}

/// Case-folded topic without a leading `#`, `None` if nothing is left
pub fn normalize_topic(topic: &str) -> Option<String> {
    let topic = topic.trim().trim_start_matches('#').trim();
    (!topic.is_empty()).then(|| topic.to_lowercase())
}

impl Record {
    /// `e` tags that point at a parent or thread root
    ///
    /// Tags marked `mention` and tags with an unparsable id are not reply
    /// relations.
    pub fn reply_relations(&self) -> impl Iterator<Item = (&Tag, RecordId)> + '_ {
        self.tags_named(TAG_RECORD)
            .filter(|t| t.marker() != Some(MARKER_MENTION))
            .filter_map(|t| tag_record_id(t).map(|id| (t, id)))
    }

    pub fn is_reply(&self) -> bool {
        !self.kind.is_repost() && self.reply_relations().next().is_some()
    }

    pub fn parent_id(&self, fallback: ReplyFallback) -> Option<RecordId> {
        if self.kind.is_repost() {
            return None;
        }

        if let Some((_, id)) = self
            .reply_relations()
            .find(|(t, _)| t.marker() == Some(MARKER_REPLY))
        {
            return Some(id);
        }

        match fallback {
            ReplyFallback::LastRelation => self.reply_relations().last().map(|(_, id)| id),
            ReplyFallback::FirstRelation => self.reply_relations().next().map(|(_, id)| id),
            ReplyFallback::Disabled => None,
        }
    }

    /// Relay hint attached to the parent relation, if any
    pub fn parent_relay_hint(&self, fallback: ReplyFallback) -> Option<&str> {
        let parent = self.parent_id(fallback)?;
        self.reply_relations()
            .find(|(_, id)| *id == parent)
            .and_then(|(t, _)| t.relay_hint())
    }

    /// First mentioned author, but only for records that are replies
    pub fn reply_target_author(&self) -> Option<AuthorId> {
        if !self.is_reply() {
            return None;
        }
        self.mentioned_authors().into_iter().next()
    }

    pub fn root_id(&self) -> Option<RecordId> {
        if self.kind.is_repost() {
            return None;
        }
        self.reply_relations()
            .find(|(t, _)| t.marker() == Some(MARKER_ROOT))
            .or_else(|| self.reply_relations().next())
            .map(|(_, id)| id)
    }

    /// The record a repost points at
    pub fn repost_target(&self) -> Option<RecordId> {
        if !self.kind.is_repost() {
            return None;
        }
        self.tags_named(TAG_RECORD).find_map(tag_record_id)
    }

    /// Topic tags, in [`normalize_topic`] form
    pub fn topics(&self) -> Vec<String> {
        self.tags_named(TAG_TOPIC)
            .filter_map(Tag::value)
            .filter_map(normalize_topic)
            .collect()
    }

    pub fn mentioned_authors(&self) -> Vec<AuthorId> {
        self.tags_named(TAG_AUTHOR).filter_map(tag_author_id).collect()
    }
}

#[cfg(test)]
mod tests;
