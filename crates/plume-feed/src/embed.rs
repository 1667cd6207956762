//! Depth-bounded expansion of references embedded in record content
//!
//! Resolution goes level by level. All tokens found at one level are decoded
//! together, their authors go through the [`ProfileCache`], and their
//! records are fetched in a single batch. Records found at level `n` have
//! their own content resolved at level `n + 1`. Tokens beyond `max_depth`
//! stay plain text, which also bounds self-referencing content.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::FutureExt as _;
use futures::future::BoxFuture;
use itertools::Itertools as _;
use plume_core::reference::find_reference_tokens;
use plume_core::{AuthorId, DecodedReference, ProfileFields, Record, RecordId, ToShort as _};
use plume_util_error::FmtCompact as _;
use tracing::{debug, trace};

use crate::profile_cache::ProfileCache;
use crate::source::{RecordSource, ReferenceDecoder, RelayUrl, merge_relay_hints};

const LOG_TARGET: &str = "plume::embed";

/// A piece of rendered content
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Author {
        token: String,
        author: AuthorId,
        profile: Option<ProfileFields>,
    },
    /// An expanded card, with its own content resolved one level deeper
    Record {
        token: String,
        record: Arc<Record>,
        content: ResolvedContent,
    },
    /// The reference decoded, but its record could not be fetched
    NotFound { token: String },
}

/// Content split into text and resolved references
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedContent {
    /// Level of the references in `segments`, starting at 1
    pub depth: usize,
    pub segments: Vec<Segment>,
}

impl ResolvedContent {
    /// Deepest level that was expanded into a record card
    pub fn expanded_depth(&self) -> usize {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Record { content, .. } => Some(content.expanded_depth().max(self.depth)),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }
}

/// Memo of one resolution pass
#[derive(Default)]
struct Pass {
    decoded: HashMap<String, Option<DecodedReference>>,
    records: HashMap<RecordId, Option<Arc<Record>>>,
}

pub struct EmbedResolver {
    source: Arc<dyn RecordSource>,
    decoder: Arc<dyn ReferenceDecoder>,
    profiles: ProfileCache,
    sources: Vec<RelayUrl>,
    max_depth: usize,
}

#[bon::bon]
impl EmbedResolver {
    #[builder(finish_fn(name = "build"))]
    pub fn new(
        source: Arc<dyn RecordSource>,
        decoder: Arc<dyn ReferenceDecoder>,
        #[builder(default)] profiles: ProfileCache,
        #[builder(default)] sources: Vec<RelayUrl>,
        #[builder(default = crate::config::DEFAULT_MAX_EMBED_DEPTH)] max_depth: usize,
    ) -> Self {
        Self {
            source,
            decoder,
            profiles,
            sources,
            max_depth,
        }
    }
}

impl EmbedResolver {
    /// Resolve the references in `record`'s content
    ///
    /// Never fails: undecodable tokens stay text, unfetchable records become
    /// [`Segment::NotFound`].
    pub async fn resolve(&self, record: &Record) -> ResolvedContent {
        let mut pass = Pass::default();
        self.resolve_level(&mut pass, vec![record.content.clone()], 1)
            .await
            .pop()
            .unwrap_or_default()
    }

    fn resolve_level<'a>(
        &'a self,
        pass: &'a mut Pass,
        contents: Vec<String>,
        depth: usize,
    ) -> BoxFuture<'a, Vec<ResolvedContent>> {
        async move {
            if self.max_depth < depth {
                trace!(target: LOG_TARGET, depth, "Depth limit reached, keeping tokens as text");
                return contents
                    .into_iter()
                    .map(|content| ResolvedContent {
                        depth,
                        segments: text_only(content),
                    })
                    .collect();
            }

            let tokens: Vec<String> = contents
                .iter()
                .flat_map(|c| find_reference_tokens(c))
                .map(|t| t.token.to_owned())
                .collect();

            self.decode_all(pass, &tokens).await;

            let (authors, wanted, relays) = {
                let decoded: Vec<&DecodedReference> = tokens
                    .iter()
                    .filter_map(|t| pass.decoded.get(t).and_then(Option::as_ref))
                    .collect();

                let authors: HashSet<AuthorId> =
                    decoded.iter().filter_map(|d| d.author_id()).collect();
                let wanted: Vec<RecordId> = decoded
                    .iter()
                    .filter_map(|d| d.record_id())
                    .filter(|id| !pass.records.contains_key(id))
                    .unique()
                    .collect();
                let relays = merge_relay_hints(
                    &self.sources,
                    decoded
                        .iter()
                        .flat_map(|d| d.relay_hints())
                        .map(String::as_str),
                );
                (authors, wanted, relays)
            };

            let (_, fetched) = tokio::join!(
                self.profiles
                    .ensure(self.source.as_ref(), authors, &relays, |_, _| {}),
                self.fetch_records(&relays, &wanted)
            );
            for id in wanted {
                let record = fetched.get(&id).cloned();
                pass.records.insert(id, record);
            }

            // records found at this level, each resolved once at the next one
            let mut nested_ids = vec![];
            for token in &tokens {
                if let Some(Some(DecodedReference::Record { id, .. })) = pass.decoded.get(token) {
                    if pass.records.get(id).is_some_and(Option::is_some) && !nested_ids.contains(id) {
                        nested_ids.push(*id);
                    }
                }
            }
            let nested_contents = nested_ids
                .iter()
                .filter_map(|id| pass.records.get(id).cloned().flatten())
                .map(|r| r.content.clone())
                .collect();
            let nested: HashMap<RecordId, ResolvedContent> = nested_ids
                .iter()
                .copied()
                .zip(self.resolve_level(pass, nested_contents, depth + 1).await)
                .collect();

            contents
                .iter()
                .map(|content| ResolvedContent {
                    depth,
                    segments: self.segments(pass, content, &nested),
                })
                .collect()
        }
        .boxed()
    }

    async fn decode_all(&self, pass: &mut Pass, tokens: &[String]) {
        let new: Vec<&String> = tokens
            .iter()
            .filter(|t| !pass.decoded.contains_key(*t))
            .unique()
            .collect();

        let results = futures::future::join_all(
            new.iter()
                .map(|token| async move { (*token, self.decoder.decode_reference(token).await) }),
        )
        .await;

        for (token, res) in results {
            let decoded = match res {
                Ok(decoded) => Some(decoded),
                Err(err) => {
                    debug!(target: LOG_TARGET, %token, err = %err.fmt_compact(), "Undecodable reference");
                    None
                }
            };
            pass.decoded.insert(token.clone(), decoded);
        }
    }

    async fn fetch_records(
        &self,
        relays: &[RelayUrl],
        ids: &[RecordId],
    ) -> HashMap<RecordId, Arc<Record>> {
        if ids.is_empty() {
            return HashMap::new();
        }

        match self.source.fetch_records_by_ids(relays, ids).await {
            Ok(records) => records
                .into_iter()
                .filter(|r| ids.contains(&r.id))
                .map(|r| (r.id, Arc::new(r)))
                .collect(),
            Err(err) => {
                debug!(
                    target: LOG_TARGET,
                    count = ids.len(),
                    err = %err.fmt_compact(),
                    "Failed to fetch embedded records"
                );
                HashMap::new()
            }
        }
    }

    fn segments(
        &self,
        pass: &Pass,
        content: &str,
        nested: &HashMap<RecordId, ResolvedContent>,
    ) -> Vec<Segment> {
        let mut segments = vec![];
        let mut pos = 0;

        for found in find_reference_tokens(content) {
            if pos < found.span.start {
                segments.push(Segment::Text(content[pos..found.span.start].to_owned()));
            }
            pos = found.span.end;
            let token = found.token.to_owned();

            let segment = match pass.decoded.get(&token).cloned().flatten() {
                None => Segment::Text(token),
                Some(DecodedReference::Author { author, .. }) => Segment::Author {
                    profile: self.profiles.get(&author),
                    token,
                    author,
                },
                Some(DecodedReference::Record { id, .. }) => {
                    match (pass.records.get(&id).cloned().flatten(), nested.get(&id)) {
                        (Some(record), Some(content)) => Segment::Record {
                            token,
                            record,
                            content: content.clone(),
                        },
                        _ => {
                            trace!(target: LOG_TARGET, id = %id.to_short(), "Embedded record not found");
                            Segment::NotFound { token }
                        }
                    }
                }
            };
            segments.push(segment);
        }

        if pos < content.len() {
            segments.push(Segment::Text(content[pos..].to_owned()));
        }
        segments
    }
}

fn text_only(content: String) -> Vec<Segment> {
    if content.is_empty() {
        vec![]
    } else {
        vec![Segment::Text(content)]
    }
}
