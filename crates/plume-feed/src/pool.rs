//! Fan-out of queries and subscriptions over many relays
//!
//! One relay failing (or sending garbage) only shrinks the result; the pool
//! reports an error only if no relay could be reached at all.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use itertools::Itertools as _;
use plume_core::{AuthorId, ProfileFields, Record, RecordId, RecordKind, ToShort as _};
use plume_util_error::{BoxedErrorResult, FmtCompact as _};
use snafu::{IntoError as _, ensure};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::{DecodeSnafu, NoSourcesSnafu, RelaySnafu, SourceResult, UnreachableSnafu};
use crate::source::{FeedQuery, RecordSource, RelayUrl, StreamMessage, Subscription};

const LOG_TARGET: &str = "plume::pool";

pub const DEFAULT_STREAM_CAPACITY: usize = 256;
pub const DEFAULT_END_OF_STREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// What a relay pushes over a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    /// Raw JSON of one event
    Event(String),
    EndOfStoredEvents,
    Notice(String),
}

/// Wire access to a single relay
#[async_trait]
pub trait RelayConnector: Send + Sync + 'static {
    /// Stored events matching `query`, as raw JSON payloads
    async fn query(&self, relay: &RelayUrl, query: &FeedQuery) -> BoxedErrorResult<Vec<String>>;

    /// Push frames into `frames` until the connection ends or `frames` is
    /// closed
    async fn stream(
        &self,
        relay: &RelayUrl,
        query: &FeedQuery,
        frames: mpsc::Sender<RelayFrame>,
    ) -> BoxedErrorResult<()>;
}

#[derive(Debug, Clone, Copy)]
enum RelayStatus {
    EndOfStoredEvents,
    Failed,
}

/// [`RecordSource`] over a set of relays reached through a [`RelayConnector`]
pub struct RelayPool<C> {
    connector: Arc<C>,
    stream_capacity: usize,
    end_of_stream_timeout: Duration,
}

#[bon::bon]
impl<C> RelayPool<C>
where
    C: RelayConnector,
{
    #[builder(finish_fn(name = "build"))]
    pub fn new(
        #[builder(into)] connector: Arc<C>,
        #[builder(default = DEFAULT_STREAM_CAPACITY)] stream_capacity: usize,
        #[builder(default = DEFAULT_END_OF_STREAM_TIMEOUT)] end_of_stream_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            stream_capacity,
            end_of_stream_timeout,
        }
    }
}

fn parse_payload(relay: &RelayUrl, payload: &str) -> Option<Record> {
    match Record::from_json(payload) {
        Ok(record) => Some(record),
        Err(source) => {
            let err = DecodeSnafu.into_error(source);
            debug!(
                target: LOG_TARGET,
                %relay,
                err = %err.fmt_compact(),
                "Skipping malformed payload"
            );
            None
        }
    }
}

impl<C> RelayPool<C>
where
    C: RelayConnector,
{
    async fn query_all(&self, query: &FeedQuery) -> SourceResult<Vec<Record>> {
        ensure!(!query.sources.is_empty(), NoSourcesSnafu);

        let results = futures::future::join_all(query.sources.iter().map(|relay| async move {
            (relay, self.connector.query(relay, query).await)
        }))
        .await;

        let mut failed = 0;
        let mut records = vec![];
        for (relay, res) in results {
            match res {
                Ok(payloads) => {
                    trace!(target: LOG_TARGET, %relay, count = payloads.len(), "Relay answered");
                    records.extend(payloads.iter().filter_map(|p| parse_payload(relay, p)));
                }
                Err(source) => {
                    failed += 1;
                    let err = RelaySnafu {
                        relay: relay.clone(),
                    }
                    .into_error(source);
                    debug!(target: LOG_TARGET, err = %err.fmt_compact(), "Relay query failed");
                }
            }
        }

        if failed == query.sources.len() {
            info!(target: LOG_TARGET, attempted = failed, "All relays unreachable");
            return UnreachableSnafu { attempted: failed }.fail();
        }

        let mut records: Vec<Record> = records.into_iter().unique_by(|r| r.id).collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    #[instrument(name = "relay-producer", skip_all, fields(%relay))]
    async fn relay_producer(
        connector: Arc<C>,
        relay: RelayUrl,
        query: FeedQuery,
        tx: mpsc::Sender<StreamMessage>,
        status_tx: mpsc::Sender<RelayStatus>,
        seen: Arc<Mutex<HashSet<RecordId>>>,
    ) {
        let (frames_tx, frames_rx) = mpsc::channel(64);

        let forward = async {
            // owned, so the connector notices once forwarding stops
            let mut frames_rx = frames_rx;
            let mut reached_end = false;
            while let Some(frame) = frames_rx.recv().await {
                match frame {
                    RelayFrame::Event(payload) => {
                        let Some(record) = parse_payload(&relay, &payload) else {
                            continue;
                        };
                        let is_new = seen
                            .lock()
                            .unwrap_or_else(std::sync::PoisonError::into_inner)
                            .insert(record.id);
                        if !is_new {
                            trace!(target: LOG_TARGET, id = %record.id.to_short(), "Already forwarded by another relay");
                            continue;
                        }
                        if tx.send(StreamMessage::Record(record)).await.is_err() {
                            trace!(target: LOG_TARGET, "Subscriber gone");
                            break;
                        }
                    }
                    RelayFrame::EndOfStoredEvents => {
                        if !reached_end {
                            reached_end = true;
                            let _ = status_tx.send(RelayStatus::EndOfStoredEvents).await;
                        }
                    }
                    RelayFrame::Notice(msg) => {
                        debug!(target: LOG_TARGET, %msg, "Relay notice");
                    }
                }
            }
            reached_end
        };

        let (res, reached_end) = tokio::join!(connector.stream(&relay, &query, frames_tx), forward);

        if let Err(source) = res {
            let err = RelaySnafu {
                relay: relay.clone(),
            }
            .into_error(source);
            debug!(target: LOG_TARGET, err = %err.fmt_compact(), "Relay stream failed");
        }
        if !reached_end {
            let _ = status_tx.send(RelayStatus::Failed).await;
        }
    }

    /// Emits the single [`StreamMessage::EndOfStream`] once every relay
    /// reached the end of its stored events or failed
    ///
    /// If all of them failed, `tx` is dropped instead, closing the
    /// subscription once the producers are gone.
    async fn end_of_stream_watcher(
        relay_count: usize,
        mut status_rx: mpsc::Receiver<RelayStatus>,
        tx: mpsc::Sender<StreamMessage>,
        timeout: Duration,
    ) {
        let mut ended = 0;
        let mut failed = 0;

        let count = async {
            while ended + failed < relay_count {
                match status_rx.recv().await {
                    Some(RelayStatus::EndOfStoredEvents) => ended += 1,
                    Some(RelayStatus::Failed) => failed += 1,
                    None => break,
                }
            }
        };

        if tokio::time::timeout(timeout, count).await.is_err() {
            warn!(
                target: LOG_TARGET,
                ended,
                failed,
                relay_count,
                "Timed out waiting for end of stored events"
            );
        } else if ended == 0 {
            info!(target: LOG_TARGET, attempted = relay_count, "All relays unreachable");
            return;
        }

        debug!(target: LOG_TARGET, ended, failed, "End of stored events");
        let _ = tx.send(StreamMessage::EndOfStream).await;
    }
}

#[async_trait]
impl<C> RecordSource for RelayPool<C>
where
    C: RelayConnector,
{
    async fn fetch_records(&self, query: &FeedQuery) -> SourceResult<Vec<Record>> {
        self.query_all(query).await
    }

    async fn subscribe_stream(&self, query: &FeedQuery) -> SourceResult<Subscription> {
        ensure!(!query.sources.is_empty(), NoSourcesSnafu);

        let (tx, subscription) = Subscription::channel(self.stream_capacity);
        let (status_tx, status_rx) = mpsc::channel(query.sources.len());
        let seen = Arc::new(Mutex::new(HashSet::new()));

        for relay in &query.sources {
            tokio::spawn(Self::relay_producer(
                self.connector.clone(),
                relay.clone(),
                query.clone(),
                tx.clone(),
                status_tx.clone(),
                seen.clone(),
            ));
        }

        tokio::spawn(Self::end_of_stream_watcher(
            query.sources.len(),
            status_rx,
            tx,
            self.end_of_stream_timeout,
        ));

        Ok(subscription)
    }

    async fn fetch_records_by_ids(
        &self,
        sources: &[RelayUrl],
        ids: &[RecordId],
    ) -> SourceResult<Vec<Record>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        self.query_all(&FeedQuery {
            sources: sources.to_vec(),
            ids: ids.to_vec(),
            ..Default::default()
        })
        .await
    }

    async fn fetch_profile(
        &self,
        author: AuthorId,
        sources: &[RelayUrl],
    ) -> SourceResult<Option<ProfileFields>> {
        let records = self
            .query_all(&FeedQuery {
                sources: sources.to_vec(),
                authors: vec![author],
                kinds: vec![RecordKind::METADATA],
                ..Default::default()
            })
            .await?;

        // newest first already
        Ok(records
            .iter()
            .filter(|r| r.kind == RecordKind::METADATA && r.author == author)
            .find_map(|r| match ProfileFields::from_metadata_json(&r.content) {
                Ok(fields) => Some(fields),
                Err(err) => {
                    debug!(
                        target: LOG_TARGET,
                        id = %r.id.to_short(),
                        err = %err.fmt_compact(),
                        "Skipping unparsable metadata"
                    );
                    None
                }
            }))
    }
}
