//! Per-view ingestion state machine
//!
//! ```text
//! Idle -> Loading -> Streaming | BatchFetching -> Loaded <-> Polling
//! ```
//!
//! Every async operation captures the generation it started in and checks it
//! again before touching the store. Switching the target or deactivating
//! bumps the generation, which turns all in-flight completions into no-ops.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use plume_core::{AuthorId, ProfileFields, Record, RecordId, RecordKind, ToShort as _};
use plume_util_error::FmtCompact as _;
use snafu::{OptionExt as _, ensure};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::config::FeedConfig;
use crate::embed::{EmbedResolver, ResolvedContent};
use crate::error::{
    FeedError, FeedResult, NotLoadedSnafu, RecordNotFoundSnafu, SourceError, StaleSnafu,
};
use crate::events::{BadgeState, FailurePhase, FeedEvent, IngestState};
use crate::filter::FilterConfig;
use crate::profile_cache::ProfileCache;
use crate::source::{
    FeedQuery, Nip19Decoder, RecordSource, ReferenceDecoder, RelayUrl, StreamMessage, Verifier,
};
use crate::store::{MergeMode, NoteStore};
use crate::task::feed_poller::FeedPoller;
use crate::task::verification_worker::{VerificationJob, VerificationWorker};
use crate::thread::{self, Thread};

const LOG_TARGET: &str = "plume::feed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMode {
    /// Everything the sources have
    Global,
    /// Notes of these authors only; an empty list behaves like `Global`
    Follows(Vec<AuthorId>),
    /// Notes and reposts of a single author
    Profile(AuthorId),
}

/// What a view shows: whose view, which feed, from where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedTarget {
    pub identity: Option<AuthorId>,
    pub mode: FeedMode,
    pub sources: Vec<RelayUrl>,
}

impl FeedTarget {
    pub fn query(&self, limit: usize) -> FeedQuery {
        let (authors, kinds) = match &self.mode {
            FeedMode::Global => (vec![], vec![RecordKind::NOTE]),
            FeedMode::Follows(authors) => (authors.clone(), vec![RecordKind::NOTE]),
            FeedMode::Profile(author) => {
                (vec![*author], vec![RecordKind::NOTE, RecordKind::REPOST])
            }
        };
        FeedQuery {
            sources: self.sources.clone(),
            authors,
            kinds,
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// Global feeds only poll in the background, and catch up on focus
    /// instead
    pub fn polls_while_focused(&self) -> bool {
        !matches!(self.mode, FeedMode::Global)
    }
}

/// Weak handle to [`FeedController`], given to background tasks
#[derive(Debug, Clone)]
pub struct FeedHandle(Weak<FeedController>);

impl FeedHandle {
    pub fn controller_opt(&self) -> Option<Arc<FeedController>> {
        self.0.upgrade()
    }
}

impl From<Weak<FeedController>> for FeedHandle {
    fn from(value: Weak<FeedController>) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    Fetched(usize),
    Skipped,
    Failed,
    Stale,
}

#[derive(Debug, Default)]
struct ControllerState {
    target: Option<FeedTarget>,
    generation: u64,
    store: NoteStore,
    filter: Arc<FilterConfig>,
    badges: HashMap<RecordId, BadgeState>,
    focused: bool,
    poller: Option<JoinHandle<()>>,
}

impl ControllerState {
    fn reset(&mut self) {
        self.store.clear();
        self.badges.clear();
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }

    fn sources(&self) -> Vec<RelayUrl> {
        self.target
            .as_ref()
            .map(|t| t.sources.clone())
            .unwrap_or_default()
    }
}

fn default_decoder() -> Arc<dyn ReferenceDecoder> {
    Arc::new(Nip19Decoder)
}

/// Owns the record store of one view and drives everything that feeds it
///
/// All renderer-visible changes are announced as [`FeedEvent`]s; the current
/// [`IngestState`] is available as a watch channel.
pub struct FeedController {
    /// Weak self-reference that can be given out to tasks
    handle: FeedHandle,

    source: Arc<dyn RecordSource>,
    decoder: Arc<dyn ReferenceDecoder>,
    profiles: ProfileCache,
    config: FeedConfig,

    state: Mutex<ControllerState>,

    ingest_tx: watch::Sender<IngestState>,
    events_tx: broadcast::Sender<FeedEvent>,
    verify_tx: mpsc::UnboundedSender<VerificationJob>,
}

#[bon::bon]
impl FeedController {
    /// Must be called within a tokio runtime; spawns the verification worker
    #[builder(finish_fn(name = "build"))]
    pub fn new(
        source: Arc<dyn RecordSource>,
        verifier: Arc<dyn Verifier>,
        #[builder(default = default_decoder())] decoder: Arc<dyn ReferenceDecoder>,
        #[builder(default)] profiles: ProfileCache,
        #[builder(default)] config: FeedConfig,
        #[builder(default)] filter: FilterConfig,
    ) -> Arc<Self> {
        let (ingest_tx, _) = watch::channel(IngestState::Idle);
        let (events_tx, _) = broadcast::channel(config.event_capacity);
        let (verify_tx, verify_rx) = mpsc::unbounded_channel();
        let verify_delay = config.verify_delay;

        let controller = Arc::new_cyclic(|controller| Self {
            handle: controller.clone().into(),
            source,
            decoder,
            profiles,
            config,
            state: Mutex::new(ControllerState {
                filter: Arc::new(filter),
                ..Default::default()
            }),
            ingest_tx,
            events_tx,
            verify_tx,
        });

        tokio::spawn(
            VerificationWorker::new(controller.handle(), verifier, verify_rx, verify_delay).run(),
        );

        controller
    }
}

impl FeedController {
    pub fn handle(&self) -> FeedHandle {
        self.handle.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn emit(&self, event: FeedEvent) {
        // no subscribers is fine
        let _ = self.events_tx.send(event);
    }

    /// Run `f` on the state if `generation` is still the current one
    fn with_current<R>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut ControllerState) -> R,
    ) -> FeedResult<R> {
        let mut state = self.lock();
        ensure!(state.generation == generation, StaleSnafu);
        Ok(f(&mut state))
    }

    fn set_ingest(&self, generation: u64, ingest: IngestState) -> FeedResult<()> {
        self.with_current(generation, |_| {
            self.ingest_tx.send_replace(ingest);
        })
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn target(&self) -> Option<FeedTarget> {
        self.lock().target.clone()
    }

    pub fn state(&self) -> IngestState {
        *self.ingest_tx.borrow()
    }

    pub fn state_subscribe(&self) -> watch::Receiver<IngestState> {
        self.ingest_tx.subscribe()
    }

    pub fn events_subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.events_tx.subscribe()
    }

    pub fn profiles(&self) -> &ProfileCache {
        &self.profiles
    }

    pub fn profile(&self, author: &AuthorId) -> Option<ProfileFields> {
        self.profiles.get(author)
    }

    pub fn badge(&self, id: &RecordId) -> Option<BadgeState> {
        self.lock().badges.get(id).cloned()
    }

    /// The rendered list: stored records passing the current filter, newest
    /// first
    pub fn visible_records(&self) -> Vec<Arc<Record>> {
        let state = self.lock();
        state.store.visible(&state.filter)
    }

    /// Show `target`
    ///
    /// Re-activating the target that is already loaded re-renders the
    /// current store immediately and refreshes in the background. Any other
    /// target starts a fresh load cycle, which this call waits for (until the
    /// end of stored records when streaming). Failures are reported as
    /// [`FeedEvent::Failed`] and leave the controller `Idle`.
    pub async fn activate(&self, target: FeedTarget) {
        let (generation, reactivated) = {
            let mut state = self.lock();
            // an activated view is in front of the user until told otherwise
            state.focused = true;
            if state.target.as_ref() == Some(&target) && self.ingest_tx.borrow().is_loaded() {
                (state.generation, Some(state.store.visible(&state.filter)))
            } else {
                state.generation += 1;
                state.reset();
                state.target = Some(target.clone());
                self.ingest_tx.send_replace(IngestState::Loading);
                (state.generation, None)
            }
        };

        if let Some(records) = reactivated {
            debug!(target: LOG_TARGET, count = records.len(), "Feed already loaded, refreshing in background");
            self.emit(FeedEvent::StoreReplaced { records });
            let handle = self.handle();
            tokio::spawn(async move {
                if let Some(controller) = handle.controller_opt() {
                    // failures are reported as events
                    let _ = controller.refresh().await;
                }
            });
            return;
        }

        debug!(target: LOG_TARGET, generation, mode = ?target.mode, "Loading feed");
        self.emit(FeedEvent::Loading);

        let query = target.query(self.config.page_limit);
        let res = if self.source.supports_streaming() {
            self.load_streaming(generation, &query).await
        } else {
            self.load_batch(generation, &query).await
        };

        match res {
            Ok(count) => self.finish_loading(generation, count),
            Err(FeedError::Stale) => {
                trace!(target: LOG_TARGET, generation, "Dropping stale load");
            }
            Err(err) => self.fail_loading(generation, &err),
        }
    }

    async fn load_streaming(&self, generation: u64, query: &FeedQuery) -> FeedResult<usize> {
        self.set_ingest(generation, IngestState::Streaming)?;

        // the subscription exists before any producer starts
        let mut subscription = self.source.subscribe_stream(query).await?;

        let mut admitted = 0;
        let mut ended = false;
        while let Some(msg) = subscription.recv().await {
            match msg {
                StreamMessage::Record(record) => {
                    admitted += self
                        .admit(generation, [record], MergeMode::Append)?
                        .len();
                }
                StreamMessage::EndOfStream => {
                    ended = true;
                    break;
                }
            }
        }
        subscription.unsubscribe();

        if !ended && admitted == 0 {
            return Err(SourceError::Closed.into());
        }
        Ok(admitted)
    }

    async fn load_batch(&self, generation: u64, query: &FeedQuery) -> FeedResult<usize> {
        self.set_ingest(generation, IngestState::BatchFetching)?;

        let records = self.source.fetch_records(query).await?;

        Ok(self.admit(generation, records, MergeMode::Replace)?.len())
    }

    fn finish_loading(&self, generation: u64, count: usize) {
        if self
            .set_ingest(generation, IngestState::Loaded)
            .is_err()
        {
            return;
        }
        debug!(target: LOG_TARGET, generation, count, "Feed loaded");

        if count == 0 {
            self.emit(FeedEvent::Empty);
        }
        self.emit(FeedEvent::Loaded);
        self.start_poller(generation);
    }

    fn fail_loading(&self, generation: u64, err: &FeedError) {
        if self.set_ingest(generation, IngestState::Idle).is_err() {
            return;
        }
        info!(target: LOG_TARGET, generation, err = %err.fmt_compact(), "Feed load failed");
        self.emit(FeedEvent::Failed {
            phase: FailurePhase::Loading,
            message: err.fmt_compact().to_string(),
        });
    }

    fn start_poller(&self, generation: u64) {
        let poller = tokio::spawn(
            FeedPoller::new(self.handle(), generation, self.config.poll_interval).run(),
        );

        let res = self.with_current(generation, |state| {
            if let Some(prev) = state.poller.replace(poller) {
                prev.abort();
            }
        });
        if res.is_err() {
            trace!(target: LOG_TARGET, generation, "Not starting poller for stale feed");
        }
    }

    /// Merge into the store and announce whatever got in
    fn admit<I>(
        &self,
        generation: u64,
        records: I,
        mode: MergeMode,
    ) -> FeedResult<Vec<Arc<Record>>>
    where
        I: IntoIterator<Item = Record>,
    {
        let (admitted, replaced, sources) = self.with_current(generation, |state| {
            let filter = state.filter.clone();
            if mode == MergeMode::Replace {
                state.badges.clear();
            }
            let admitted = state.store.merge(records, mode, &filter);
            for record in &admitted {
                state.badges.insert(record.id, BadgeState::Pending);
            }
            let replaced = (mode == MergeMode::Replace).then(|| state.store.visible(&filter));
            (admitted, replaced, state.sources())
        })?;

        for record in &admitted {
            trace!(target: LOG_TARGET, id = %record.id.to_short(), created_at = %record.created_at, "Admitted");
        }

        if let Some(records) = replaced {
            self.emit(FeedEvent::StoreReplaced { records });
        } else if !admitted.is_empty() {
            self.emit(FeedEvent::RecordsAdmitted {
                records: admitted.clone(),
            });
        }

        for record in &admitted {
            let job = VerificationJob {
                generation,
                record: record.clone(),
            };
            if self.verify_tx.send(job).is_err() {
                debug!(target: LOG_TARGET, "Verification worker gone");
                break;
            }
        }

        if !admitted.is_empty() {
            self.hydrate_profiles(
                generation,
                admitted.iter().map(|r| r.author).collect(),
                sources,
            );
        }

        Ok(admitted)
    }

    fn hydrate_profiles(&self, generation: u64, authors: HashSet<AuthorId>, sources: Vec<RelayUrl>) {
        let source = self.source.clone();
        let profiles = self.profiles.clone();
        let handle = self.handle();
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            profiles
                .ensure(source.as_ref(), authors, &sources, |author, profile| {
                    let is_current = handle
                        .controller_opt()
                        .is_some_and(|c| c.is_current(generation));
                    if !is_current {
                        trace!(target: LOG_TARGET, author = %author.to_short(), "Dropping stale profile patch");
                        return;
                    }
                    let _ = events_tx.send(FeedEvent::ProfilePatched {
                        author,
                        profile: profile.clone(),
                    });
                })
                .await;
        });
    }

    pub(crate) fn apply_badge(&self, generation: u64, id: RecordId, badge: BadgeState) {
        let applied = self.with_current(generation, |state| {
            if !state.store.contains(&id) {
                return false;
            }
            state.badges.insert(id, badge.clone());
            true
        });

        match applied {
            Ok(true) => self.emit(FeedEvent::BadgeUpdated { id, badge }),
            Ok(false) | Err(_) => {
                trace!(target: LOG_TARGET, id = %id.to_short(), "Dropping stale badge");
            }
        }
    }

    /// Query for records newer than anything stored, for the given (or
    /// current) generation
    fn newer_records_query(&self, generation: Option<u64>) -> FeedResult<(u64, FeedQuery)> {
        let state = self.lock();
        if let Some(generation) = generation {
            ensure!(state.generation == generation, StaleSnafu);
        }
        ensure!(self.ingest_tx.borrow().is_loaded(), NotLoadedSnafu);
        let target = state.target.as_ref().context(NotLoadedSnafu)?;

        let mut query = target.query(self.config.page_limit);
        query.since = state.store.newest_timestamp();
        if query.since.is_some() {
            query.limit = None;
        }
        Ok((state.generation, query))
    }

    /// Incremental fetch of records newer than the newest stored one
    ///
    /// Returns the number of admitted records.
    pub async fn refresh(&self) -> FeedResult<usize> {
        let (generation, query) = self.newer_records_query(None)?;
        self.fetch_more(generation, query, FailurePhase::Polling).await
    }

    /// Fetch one page of records older than the oldest stored one
    pub async fn load_older(&self) -> FeedResult<usize> {
        let (generation, query) = {
            let state = self.lock();
            ensure!(self.ingest_tx.borrow().is_loaded(), NotLoadedSnafu);
            let target = state.target.as_ref().context(NotLoadedSnafu)?;

            // `until` is inclusive, so the page also returns what is already
            // stored at the oldest timestamp
            let mut query =
                target.query(self.config.page_limit + state.store.oldest_count());
            query.until = state.store.oldest_timestamp();
            (state.generation, query)
        };
        self.fetch_more(generation, query, FailurePhase::Paging).await
    }

    async fn fetch_more(
        &self,
        generation: u64,
        query: FeedQuery,
        phase: FailurePhase,
    ) -> FeedResult<usize> {
        if phase == FailurePhase::Polling {
            self.set_ingest(generation, IngestState::Polling)?;
        }

        let res = match self.source.fetch_records(&query).await {
            Ok(records) => self
                .admit(generation, records, MergeMode::Append)
                .map(|admitted| admitted.len()),
            Err(err) => Err(err.into()),
        };

        match &res {
            Ok(count) => {
                debug!(target: LOG_TARGET, generation, ?phase, count, "Fetched more records");
            }
            Err(FeedError::Stale) => {
                trace!(target: LOG_TARGET, generation, ?phase, "Dropping stale fetch");
            }
            Err(err) => {
                if self.is_current(generation) {
                    info!(target: LOG_TARGET, generation, ?phase, err = %err.fmt_compact(), "Fetch failed");
                    self.emit(FeedEvent::Failed {
                        phase,
                        message: err.fmt_compact().to_string(),
                    });
                }
            }
        }

        if phase == FailurePhase::Polling {
            // failures return to Loaded as well, with the store untouched
            let _ = self.set_ingest(generation, IngestState::Loaded);
        }

        res
    }

    pub(crate) async fn poll_tick(&self, generation: u64) -> PollOutcome {
        let skip = {
            let state = self.lock();
            if state.generation != generation {
                return PollOutcome::Stale;
            }
            state.focused
                && state
                    .target
                    .as_ref()
                    .is_some_and(|t| !t.polls_while_focused())
        };
        if skip {
            return PollOutcome::Skipped;
        }

        let res = match self.newer_records_query(Some(generation)) {
            Ok((generation, query)) => {
                self.fetch_more(generation, query, FailurePhase::Polling)
                    .await
            }
            Err(err) => Err(err),
        };

        match res {
            Ok(count) => PollOutcome::Fetched(count),
            Err(FeedError::Stale) => PollOutcome::Stale,
            Err(_) => PollOutcome::Failed,
        }
    }

    /// Track whether the view is in front of the user
    ///
    /// [`Self::activate`] counts as focusing. Regaining focus on a loaded
    /// global feed triggers an incremental fetch.
    pub async fn set_focused(&self, focused: bool) {
        let catch_up = {
            let mut state = self.lock();
            let was_focused = std::mem::replace(&mut state.focused, focused);
            focused
                && !was_focused
                && state
                    .target
                    .as_ref()
                    .is_some_and(|t| !t.polls_while_focused())
                && self.ingest_tx.borrow().is_loaded()
        };

        if catch_up {
            debug!(target: LOG_TARGET, "Focused, catching up");
            // failures are reported as events
            let _ = self.refresh().await;
        }
    }

    /// Tear the view down: store cleared, polling stopped, in-flight work
    /// invalidated
    pub fn deactivate(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.reset();
        state.target = None;
        self.ingest_tx.send_replace(IngestState::Idle);
        debug!(target: LOG_TARGET, generation = state.generation, "Feed deactivated");
    }

    /// Apply a new filter to the current view without touching the network
    ///
    /// Returns the new visible list, also announced as
    /// [`FeedEvent::ViewRefiltered`].
    pub fn refilter(&self, filter: FilterConfig) -> Vec<Arc<Record>> {
        let records = {
            let mut state = self.lock();
            state.filter = Arc::new(filter);
            state.store.visible(&state.filter)
        };
        self.emit(FeedEvent::ViewRefiltered {
            records: records.clone(),
        });
        records
    }

    fn stored_or_err(&self, id: RecordId) -> FeedResult<(Arc<Record>, Vec<RelayUrl>)> {
        let state = self.lock();
        let record = state
            .store
            .get(&id)
            .cloned()
            .context(RecordNotFoundSnafu { id })?;
        Ok((record, state.sources()))
    }

    /// Expand the references embedded in a stored record
    pub async fn resolve_embeds(&self, id: RecordId) -> FeedResult<ResolvedContent> {
        let (record, sources) = self.stored_or_err(id)?;

        let resolver = EmbedResolver::builder()
            .source(self.source.clone())
            .decoder(self.decoder.clone())
            .profiles(self.profiles.clone())
            .sources(sources)
            .max_depth(self.config.max_embed_depth)
            .build();

        Ok(resolver.resolve(&record).await)
    }

    /// Ancestors and replies of a record, stored or not
    pub async fn load_thread(&self, id: RecordId) -> FeedResult<Thread> {
        let (focus, sources, filter) = {
            let state = self.lock();
            let target = state.target.as_ref().context(NotLoadedSnafu)?;
            (
                state.store.get(&id).cloned(),
                target.sources.clone(),
                state.filter.clone(),
            )
        };

        let focus = match focus {
            Some(focus) => focus,
            None => self
                .source
                .fetch_records_by_ids(&sources, &[id])
                .await?
                .into_iter()
                .find(|r| r.id == id)
                .map(Arc::new)
                .context(RecordNotFoundSnafu { id })?,
        };

        Ok(thread::load_thread(
            self.source.as_ref(),
            &sources,
            focus,
            &filter,
            self.config.reply_fallback,
            self.config.max_thread_ancestors,
            self.config.page_limit,
        )
        .await)
    }
}
