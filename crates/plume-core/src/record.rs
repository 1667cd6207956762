use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{AuthorId, RecordId, RecordSignature};

/// Unix time in seconds
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    pub fn now() -> Self {
        Self(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        )
    }

    pub fn as_secs(self) -> u64 {
        self.0
    }

    pub fn saturating_add_secs(self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Timestamp> for u64 {
    fn from(value: Timestamp) -> Self {
        value.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Discriminates plain notes, reposts and everything else
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKind(pub u32);

impl RecordKind {
    pub const METADATA: Self = Self(0);
    pub const NOTE: Self = Self(1);
    pub const CONTACTS: Self = Self(3);
    pub const ENCRYPTED_DM: Self = Self(4);
    pub const REPOST: Self = Self(6);
    pub const REACTION: Self = Self(7);
    pub const GENERIC_REPOST: Self = Self(16);
    pub const LONG_FORM: Self = Self(30023);

    pub fn is_note(self) -> bool {
        self == Self::NOTE
    }

    pub fn is_repost(self) -> bool {
        self == Self::REPOST || self == Self::GENERIC_REPOST
    }
}

impl From<u32> for RecordKind {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A typed relation: `["e", <id>, <relay>, <marker>]`, `["p", <author>]`,
/// `["t", <topic>]` and so on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(Vec<String>);

impl Tag {
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(items.into_iter().map(Into::into).collect())
    }

    pub fn name(&self) -> Option<&str> {
        self.get(0)
    }

    pub fn value(&self) -> Option<&str> {
        self.get(1)
    }

    /// Third element, when present and non-empty
    pub fn relay_hint(&self) -> Option<&str> {
        self.get(2).filter(|s| !s.is_empty())
    }

    /// Fourth element, when present and non-empty
    pub fn marker(&self) -> Option<&str> {
        self.get(3).filter(|s| !s.is_empty())
    }

    pub fn is(&self, name: &str) -> bool {
        self.name() == Some(name)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    fn get(&self, i: usize) -> Option<&str> {
        self.0.get(i).map(String::as_str)
    }
}

/// An immutable event as delivered by a source
///
/// Verification and profile state are never attached here; they live in
/// side indexes keyed by [`RecordId`] / [`AuthorId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(rename = "pubkey")]
    pub author: AuthorId,
    pub created_at: Timestamp,
    pub kind: RecordKind,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub content: String,
    pub sig: RecordSignature,
}

#[bon::bon]
impl Record {
    #[builder(finish_fn(name = "build"))]
    pub fn new(
        id: RecordId,
        author: AuthorId,
        #[builder(into)] created_at: Timestamp,
        #[builder(default = RecordKind::NOTE)] kind: RecordKind,
        #[builder(default)] tags: Vec<Tag>,
        #[builder(default, into)] content: String,
        sig: RecordSignature,
    ) -> Self {
        Self {
            id,
            author,
            created_at,
            kind,
            tags,
            content,
            sig,
        }
    }
}

impl Record {
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn from_value(v: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(v)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("Can't fail")
    }

    pub fn tags_named<'s>(&'s self, name: &'s str) -> impl Iterator<Item = &'s Tag> + 's {
        self.tags.iter().filter(move |t| t.is(name))
    }
}
