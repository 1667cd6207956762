//! Operations the pipeline consumes from its host
//!
//! Everything upstream (relay connections, signature checks, reference
//! decoding) is reached through the traits here, so a host can plug in a
//! real network stack, an archive, or a scripted fake.

use std::str::FromStr;
use std::{fmt, ops};

use async_trait::async_trait;
use plume_core::reference::ReferenceDecodeResult;
use plume_core::{AuthorId, DecodedReference, ProfileFields, Record, RecordId, RecordKind, Timestamp};
use serde::{Deserialize, Serialize};
use snafu::{OptionExt as _, ResultExt as _, ensure};
use tokio::sync::mpsc;

use crate::error::{
    MissingHostSnafu, ParseSnafu, RelayUrlError, RelayUrlResult, SchemeSnafu, SourceResult,
};

/// A `ws://` or `wss://` source address, normalized without a trailing slash
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelayUrl(String);

impl RelayUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RelayUrl {
    type Err = RelayUrlError;

    fn from_str(s: &str) -> RelayUrlResult<Self> {
        let url = url::Url::parse(s.trim()).context(ParseSnafu)?;
        ensure!(
            matches!(url.scheme(), "ws" | "wss"),
            SchemeSnafu {
                scheme: url.scheme()
            }
        );
        url.host_str().context(MissingHostSnafu)?;

        let s = url.as_str();
        Ok(Self(s.strip_suffix('/').unwrap_or(s).to_owned()))
    }
}

impl fmt::Display for RelayUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ops::Deref for RelayUrl {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Serialize for RelayUrl {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        s.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RelayUrl {
    fn deserialize<D>(d: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(d)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse relay hints, dropping the invalid ones, and append those not
/// already in `sources`
pub fn merge_relay_hints<'h>(
    sources: &[RelayUrl],
    hints: impl IntoIterator<Item = &'h str>,
) -> Vec<RelayUrl> {
    let mut merged = sources.to_vec();
    for hint in hints {
        if let Ok(relay) = RelayUrl::from_str(hint) {
            if !merged.contains(&relay) {
                merged.push(relay);
            }
        }
    }
    merged
}

/// Record selection, with relay filter semantics
///
/// Empty lists mean "any". `since` and `until` are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedQuery {
    pub sources: Vec<RelayUrl>,
    pub ids: Vec<RecordId>,
    pub authors: Vec<AuthorId>,
    pub kinds: Vec<RecordKind>,
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    pub limit: Option<usize>,
    /// Records carrying an `e` tag pointing at any of these
    pub references: Vec<RecordId>,
}

impl FeedQuery {
    /// Whether `record` is selected, ignoring `limit`
    pub fn matches(&self, record: &Record) -> bool {
        (self.ids.is_empty() || self.ids.contains(&record.id))
            && (self.authors.is_empty() || self.authors.contains(&record.author))
            && (self.kinds.is_empty() || self.kinds.contains(&record.kind))
            && self.since.is_none_or(|since| since <= record.created_at)
            && self.until.is_none_or(|until| record.created_at <= until)
            && (self.references.is_empty()
                || record
                    .tags_named("e")
                    .filter_map(|t| t.value())
                    .filter_map(|v| RecordId::from_str(v).ok())
                    .any(|id| self.references.contains(&id)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    Record(Record),
    /// Every source delivered its stored backlog; live records may follow
    EndOfStream,
}

/// Receiving end of a push subscription
///
/// Exists before any producer is started, so nothing pushed early is lost.
/// Dropping it (or [`Subscription::unsubscribe`]) makes producers stop at
/// their next send.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<StreamMessage>,
}

impl Subscription {
    pub fn channel(capacity: usize) -> (mpsc::Sender<StreamMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }

    /// `None` once every producer is gone
    pub async fn recv(&mut self) -> Option<StreamMessage> {
        self.rx.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.rx.close();
    }
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Whether [`RecordSource::subscribe_stream`] is usable; batch fetching
    /// is used otherwise
    fn supports_streaming(&self) -> bool {
        true
    }

    async fn fetch_records(&self, query: &FeedQuery) -> SourceResult<Vec<Record>>;

    async fn subscribe_stream(&self, query: &FeedQuery) -> SourceResult<Subscription>;

    async fn fetch_records_by_ids(
        &self,
        sources: &[RelayUrl],
        ids: &[RecordId],
    ) -> SourceResult<Vec<Record>>;

    async fn fetch_profile(
        &self,
        author: AuthorId,
        sources: &[RelayUrl],
    ) -> SourceResult<Option<ProfileFields>>;

    /// One [`RecordSource::fetch_profile`] per author, concurrently
    ///
    /// Sources able to look up many authors in one request should override
    /// this.
    async fn fetch_profiles(
        &self,
        authors: &[AuthorId],
        sources: &[RelayUrl],
    ) -> Vec<(AuthorId, SourceResult<Option<ProfileFields>>)> {
        futures::future::join_all(
            authors
                .iter()
                .map(|author| async move { (*author, self.fetch_profile(*author, sources).await) }),
        )
        .await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub valid: bool,
    pub reason: Option<String>,
}

impl Verification {
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Authenticity check of a single record
///
/// A check that can't be performed is reported as invalid with a reason.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, record: &Record) -> Verification;
}

#[async_trait]
pub trait ReferenceDecoder: Send + Sync {
    async fn decode_reference(&self, token: &str) -> ReferenceDecodeResult<DecodedReference>;
}

/// Local NIP-19 decoding
#[derive(Debug, Clone, Copy, Default)]
pub struct Nip19Decoder;

#[async_trait]
impl ReferenceDecoder for Nip19Decoder {
    async fn decode_reference(&self, token: &str) -> ReferenceDecodeResult<DecodedReference> {
        plume_core::decode_reference(token)
    }
}

#[cfg(test)]
mod tests;
