//! Record archive served as a [`RecordSource`]

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use plume_core::{AuthorId, ProfileFields, Record, RecordId, RecordKind, ToShort as _};
use plume_feed::{
    FeedQuery, RecordSource, RelayUrl, SourceError, SourceResult, StreamMessage, Subscription,
};
use plume_util_error::FmtCompact as _;
use snafu::{ResultExt as _, Snafu};
use tracing::{debug, trace};

const LOG_TARGET: &str = "plume::archive";

const STREAM_CAPACITY: usize = 64;

#[derive(Debug, Snafu)]
pub enum ArchiveError {
    #[snafu(display("Failed to read archive {}", path.display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}
pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

/// Records from a JSON lines file, answered like a relay would
#[derive(Debug, Clone, Default)]
pub struct ArchiveSource {
    records: Vec<Record>,
    streaming: bool,
}

impl ArchiveSource {
    pub fn load(path: &Path) -> ArchiveResult<Self> {
        let content = std::fs::read_to_string(path).context(ReadSnafu { path })?;
        Ok(Self::parse(&content))
    }

    /// One event per line; blank and malformed lines are skipped
    pub fn parse(content: &str) -> Self {
        let mut records = vec![];
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match Record::from_json(line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    debug!(
                        target: LOG_TARGET,
                        line = line_no + 1,
                        err = %err.fmt_compact(),
                        "Skipping malformed archive line"
                    );
                }
            }
        }
        debug!(target: LOG_TARGET, count = records.len(), "Archive loaded");
        Self {
            records,
            streaming: true,
        }
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Unique matching records, newest first, up to `query.limit`
    fn select(&self, query: &FeedQuery) -> Vec<Record> {
        let mut records: Vec<Record> = vec![];
        for record in self.records.iter().filter(|r| query.matches(r)) {
            if !records.iter().any(|r| r.id == record.id) {
                records.push(record.clone());
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        records
    }

    fn check_sources(sources: &[RelayUrl]) -> SourceResult<()> {
        if sources.is_empty() {
            return Err(SourceError::NoSources);
        }
        Ok(())
    }
}

#[async_trait]
impl RecordSource for ArchiveSource {
    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn fetch_records(&self, query: &FeedQuery) -> SourceResult<Vec<Record>> {
        Self::check_sources(&query.sources)?;

        Ok(self.select(query))
    }

    async fn subscribe_stream(&self, query: &FeedQuery) -> SourceResult<Subscription> {
        Self::check_sources(&query.sources)?;

        let backlog = self.select(query);
        let (tx, subscription) = Subscription::channel(STREAM_CAPACITY);

        tokio::spawn(async move {
            for record in backlog {
                trace!(target: LOG_TARGET, id = %record.id.to_short(), "Streaming");
                if tx.send(StreamMessage::Record(record)).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(StreamMessage::EndOfStream).await;
        });

        Ok(subscription)
    }

    async fn fetch_records_by_ids(
        &self,
        sources: &[RelayUrl],
        ids: &[RecordId],
    ) -> SourceResult<Vec<Record>> {
        Self::check_sources(sources)?;

        Ok(self
            .records
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
        Self::check_sources(sources)?;

        let mut metadata: Vec<&Record> = self
            .records
            .iter()
            .filter(|r| r.author == author && r.kind == RecordKind::METADATA)
            .collect();
        metadata.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(metadata
            .into_iter()
            .find_map(|r| ProfileFields::from_metadata_json(&r.content).ok()))
    }
}
