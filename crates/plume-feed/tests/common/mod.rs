#![allow(dead_code)]

use std::collections::HashMap;
use std::str::FromStr as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use plume_core::{
    AuthorId, ProfileFields, Record, RecordId, RecordKind, RecordSignature, Tag, Timestamp,
};
use plume_feed::{
    FeedConfig, FeedController, FeedEvent, FeedMode, FeedQuery, FeedTarget, FilterConfig,
    RecordSource, RelayUrl, SourceError, SourceResult, StreamMessage, StructuralVerifier,
    Subscription,
};
use tokio::sync::broadcast;

pub fn author(n: u8) -> AuthorId {
    AuthorId::from_bytes([n; 32])
}

pub fn record_id(n: u8) -> RecordId {
    RecordId::from_bytes([n; 32])
}

pub fn note(n: u8, author_n: u8, created_at: u64) -> Record {
    note_with(n, author_n, created_at, &format!("note {n}"), vec![])
}

pub fn note_with(n: u8, author_n: u8, created_at: u64, content: &str, tags: Vec<Tag>) -> Record {
    Record::builder()
        .id(record_id(n))
        .author(author(author_n))
        .created_at(Timestamp(created_at))
        .kind(RecordKind::NOTE)
        .tags(tags)
        .content(content)
        .sig(RecordSignature::from_bytes([7; 64]))
        .build()
}

pub fn reply_to(n: u8, author_n: u8, created_at: u64, parent: u8) -> Record {
    note_with(
        n,
        author_n,
        created_at,
        &format!("reply {n}"),
        vec![Tag::new([
            "e",
            record_id(parent).to_string().as_str(),
            "",
            "reply",
        ])],
    )
}

pub fn relays() -> Vec<RelayUrl> {
    vec![RelayUrl::from_str("wss://relay.example.com").expect("valid")]
}

pub fn target(mode: FeedMode) -> FeedTarget {
    FeedTarget {
        identity: Some(author(99)),
        mode,
        sources: relays(),
    }
}

pub fn created_ats(records: &[Arc<Record>]) -> Vec<u64> {
    records.iter().map(|r| r.created_at.0).collect()
}

/// Polling effectively off, no verification pacing
pub fn test_config() -> FeedConfig {
    FeedConfig::builder()
        .poll_interval(Duration::from_secs(3600))
        .verify_delay(Duration::ZERO)
        .build()
}

pub fn controller(source: &Arc<MemorySource>) -> Arc<FeedController> {
    controller_with(source, test_config(), FilterConfig::default())
}

pub fn controller_with(
    source: &Arc<MemorySource>,
    config: FeedConfig,
    filter: FilterConfig,
) -> Arc<FeedController> {
    FeedController::builder()
        .source(source.clone())
        .verifier(Arc::new(StructuralVerifier))
        .config(config)
        .filter(filter)
        .build()
}

/// Wait for the first event matching `f`, failing the test after a while
pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<FeedEvent>, mut f: F) -> FeedEvent
where
    F: FnMut(&FeedEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if f(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("event in time")
}

/// In-memory [`RecordSource`] with scriptable behavior
pub struct MemorySource {
    streaming: bool,
    records: Mutex<Vec<Record>>,
    stream_script: Mutex<Option<Vec<StreamMessage>>>,
    profiles: Mutex<HashMap<AuthorId, ProfileFields>>,
    unreachable: AtomicBool,
    delay: Mutex<Duration>,
    pub queries: Mutex<Vec<FeedQuery>>,
    pub id_requests: Mutex<Vec<Vec<RecordId>>>,
}

impl MemorySource {
    fn new(streaming: bool) -> Self {
        Self {
            streaming,
            records: Mutex::default(),
            stream_script: Mutex::default(),
            profiles: Mutex::default(),
            unreachable: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            queries: Mutex::default(),
            id_requests: Mutex::default(),
        }
    }

    pub fn streaming() -> Self {
        Self::new(true)
    }

    pub fn batch() -> Self {
        Self::new(false)
    }

    pub fn with_records(self, records: impl IntoIterator<Item = Record>) -> Self {
        self.records.lock().expect("locked").extend(records);
        self
    }

    /// Push exactly these messages to the next subscription
    pub fn with_stream(self, script: Vec<StreamMessage>) -> Self {
        *self.stream_script.lock().expect("locked") = Some(script);
        self
    }

    pub fn with_profile(self, author: AuthorId, profile: ProfileFields) -> Self {
        self.profiles.lock().expect("locked").insert(author, profile);
        self
    }

    pub fn push(&self, record: Record) {
        self.records.lock().expect("locked").push(record);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("locked") = delay;
    }

    pub fn last_query(&self) -> Option<FeedQuery> {
        self.queries.lock().expect("locked").last().cloned()
    }

    pub fn id_request_count(&self) -> usize {
        self.id_requests.lock().expect("locked").len()
    }

    fn check_reachable(&self, sources: &[RelayUrl]) -> SourceResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SourceError::Unreachable {
                attempted: sources.len(),
            });
        }
        Ok(())
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().expect("locked");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn fetch_records(&self, query: &FeedQuery) -> SourceResult<Vec<Record>> {
        self.queries.lock().expect("locked").push(query.clone());
        self.pause().await;
        self.check_reachable(&query.sources)?;

        let mut records: Vec<Record> = self
            .records
            .lock()
            .expect("locked")
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn subscribe_stream(&self, query: &FeedQuery) -> SourceResult<Subscription> {
        self.queries.lock().expect("locked").push(query.clone());
        self.check_reachable(&query.sources)?;

        let script = self.stream_script.lock().expect("locked").take();
        let script = script.unwrap_or_else(|| {
            self.records
                .lock()
                .expect("locked")
                .iter()
                .filter(|r| query.matches(r))
                .cloned()
                .map(StreamMessage::Record)
                .chain([StreamMessage::EndOfStream])
                .collect()
        });
        let delay = *self.delay.lock().expect("locked");

        let (tx, subscription) = Subscription::channel(16);
        tokio::spawn(async move {
            for msg in script {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
        });
        Ok(subscription)
    }

    async fn fetch_records_by_ids(
        &self,
        sources: &[RelayUrl],
        ids: &[RecordId],
    ) -> SourceResult<Vec<Record>> {
        self.id_requests.lock().expect("locked").push(ids.to_vec());
        self.pause().await;
        self.check_reachable(sources)?;

        Ok(self
            .records
            .lock()
            .expect("locked")
            .iter()
            .filter(|r| ids.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn fetch_profile(
        &self,
        author: AuthorId,
        sources: &[RelayUrl],
    ) -> SourceResult<Option<ProfileFields>> {
        self.check_reachable(sources)?;
        Ok(self.profiles.lock().expect("locked").get(&author).cloned())
    }
}
