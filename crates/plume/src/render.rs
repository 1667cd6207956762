//! JSON rendering of the visible feed

use plume_core::{ProfileFields, Record, ReplyFallback, Timestamp};
use plume_feed::{BadgeState, ResolvedContent, Segment};
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const MONTH: u64 = 30 * DAY;

pub fn rfc3339(ts: Timestamp) -> String {
    i64::try_from(ts.as_secs())
        .ok()
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| ts.to_string())
}

/// `42s`, `5m`, `3h`, `12d`, or the full date for anything older than a month
pub fn relative_age(created_at: Timestamp, now: Timestamp) -> String {
    let secs = now.as_secs().saturating_sub(created_at.as_secs());
    if secs < MINUTE {
        format!("{secs}s")
    } else if secs < HOUR {
        format!("{}m", secs / MINUTE)
    } else if secs < DAY {
        format!("{}h", secs / HOUR)
    } else if secs < MONTH {
        format!("{}d", secs / DAY)
    } else {
        rfc3339(created_at)
    }
}

pub fn content_json(content: &ResolvedContent) -> Value {
    Value::Array(
        content
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Text(text) => json!({ "text": text }),
                Segment::Author {
                    token,
                    author,
                    profile,
                } => json!({
                    "token": token,
                    "author": author,
                    "display_name": profile.as_ref().and_then(|p| p.display_name.as_deref()),
                }),
                Segment::Record {
                    token,
                    record,
                    content,
                } => json!({
                    "token": token,
                    "record": record.id,
                    "author": record.author,
                    "created_at": record.created_at,
                    "content": content_json(content),
                }),
                Segment::NotFound { token } => json!({ "token": token, "not_found": true }),
            })
            .collect(),
    )
}

pub struct RenderedRecord<'r> {
    pub record: &'r Record,
    pub profile: Option<ProfileFields>,
    pub badge: Option<BadgeState>,
    pub embeds: Option<ResolvedContent>,
}

impl RenderedRecord<'_> {
    pub fn to_json(&self, now: Timestamp, fallback: ReplyFallback) -> Value {
        let record = self.record;
        json!({
            "id": record.id,
            "author": record.author,
            "display_name": self.profile.as_ref().and_then(|p| p.display_name.as_deref()),
            "verified_identifier": self.profile.as_ref().and_then(|p| p.verified_identifier.as_deref()),
            "kind": record.kind.0,
            "created_at": record.created_at,
            "created": rfc3339(record.created_at),
            "age": relative_age(record.created_at, now),
            "badge": self.badge,
            "reply_to": record.parent_id(fallback),
            "repost_of": record.repost_target(),
            "topics": record.topics(),
            "content": record.content,
            "embeds": self.embeds.as_ref().map(content_json),
        })
    }
}
