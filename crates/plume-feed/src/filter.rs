//! Visibility predicates
//!
//! Everything here is pure: same record and same [`FilterConfig`] always give
//! the same answer.

use std::collections::HashSet;
use std::str::FromStr as _;

use plume_core::relations::normalize_topic;
use plume_core::{AuthorId, Record, decode_reference};
use serde::{Deserialize, Serialize};
use tracing::debug;

const LOG_TARGET: &str = "plume::filter";

/// Shortest token that is considered a base64 blob
const MIN_BASE64_LEN: usize = 24;

/// Mute rules as stored by the host, in the host's field names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Hex or `npub` author ids
    pub muted_users: Vec<String>,
    pub muted_words: Vec<String>,
    pub muted_hashtags: Vec<String>,
    pub hide_unreadable: bool,
}

/// Normalized snapshot of the mute state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    muted_authors: HashSet<AuthorId>,
    /// Case-folded
    muted_words: Vec<String>,
    /// Case-folded, without a leading `#`
    muted_topics: HashSet<String>,
    hide_unreadable: bool,
}

#[bon::bon]
impl FilterConfig {
    #[builder(finish_fn(name = "build"))]
    pub fn new(
        #[builder(default)] muted_authors: Vec<AuthorId>,
        #[builder(default)] muted_words: Vec<String>,
        #[builder(default)] muted_topics: Vec<String>,
        #[builder(default)] hide_unreadable: bool,
    ) -> Self {
        Self {
            muted_authors: muted_authors.into_iter().collect(),
            muted_words: muted_words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
            muted_topics: muted_topics
                .iter()
                .filter_map(|t| normalize_topic(t))
                .collect(),
            hide_unreadable,
        }
    }
}

impl From<&FilterSettings> for FilterConfig {
    fn from(settings: &FilterSettings) -> Self {
        let muted_authors = settings
            .muted_users
            .iter()
            .filter_map(|s| {
                let parsed = parse_author(s);
                if parsed.is_none() {
                    debug!(target: LOG_TARGET, user = %s, "Ignoring unparsable muted user");
                }
                parsed
            })
            .collect();

        Self::builder()
            .muted_authors(muted_authors)
            .muted_words(settings.muted_words.clone())
            .muted_topics(settings.muted_hashtags.clone())
            .hide_unreadable(settings.hide_unreadable)
            .build()
    }
}

impl From<FilterSettings> for FilterConfig {
    fn from(settings: FilterSettings) -> Self {
        Self::from(&settings)
    }
}

fn parse_author(s: &str) -> Option<AuthorId> {
    let s = s.trim();
    AuthorId::from_str(s)
        .ok()
        .or_else(|| decode_reference(s).ok().and_then(|r| r.author_id()))
}

impl FilterConfig {
    pub fn hide_unreadable(&self) -> bool {
        self.hide_unreadable
    }

    pub fn is_author_muted(&self, author: &AuthorId) -> bool {
        self.muted_authors.contains(author)
    }

    /// Mute rules only
    ///
    /// Authors are muted for every kind; word and topic mutes apply to plain
    /// notes only.
    pub fn is_visible(&self, record: &Record) -> bool {
        if self.is_author_muted(&record.author) {
            return false;
        }

        if !record.kind.is_note() {
            return true;
        }

        if !self.muted_words.is_empty() {
            let content = record.content.to_lowercase();
            if self.muted_words.iter().any(|w| content.contains(w.as_str())) {
                return false;
            }
        }

        if !self.muted_topics.is_empty()
            && record
                .topics()
                .iter()
                .any(|t| self.muted_topics.contains(t))
        {
            return false;
        }

        true
    }

    /// Whether `record` may enter the store: mute rules, then the unreadable
    /// payload check if enabled
    pub fn admits(&self, record: &Record) -> bool {
        self.is_visible(record) && !(self.hide_unreadable && is_unreadable_payload(&record.content))
    }
}

/// Content meant for machines, not people: a bare base64 blob (optionally
/// with an `?iv=` suffix), a JSON object or array, or a JSON blob behind a
/// `[tag]` prefix
pub fn is_unreadable_payload(content: &str) -> bool {
    let content = content.trim();
    if content.is_empty() {
        return false;
    }

    is_base64_blob(content) || is_json_blob(content) || is_tagged_json_blob(content)
}

fn is_base64_blob(s: &str) -> bool {
    let body = match s.split_once("?iv=") {
        Some((body, iv)) if is_base64(iv) => body,
        Some(_) => return false,
        None => s,
    };

    body.len() >= MIN_BASE64_LEN
        && body
            .bytes()
            .any(|b| b.is_ascii_digit() || matches!(b, b'+' | b'/' | b'='))
        && is_base64(body)
}

fn is_base64(s: &str) -> bool {
    !s.is_empty()
        && (data_encoding::BASE64.decode(s.as_bytes()).is_ok()
            || data_encoding::BASE64_NOPAD.decode(s.as_bytes()).is_ok())
}

fn is_json_blob(s: &str) -> bool {
    (s.starts_with('{') || s.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(s)
            .is_ok_and(|v| v.is_object() || v.is_array())
}

fn is_tagged_json_blob(s: &str) -> bool {
    let Some(rest) = s.strip_prefix('[') else {
        return false;
    };
    let Some((tag, rest)) = rest.split_once(']') else {
        return false;
    };

    !tag.is_empty() && !tag.contains(char::is_whitespace) && is_json_blob(rest.trim_start())
}
