use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use plume_core::{AuthorId, ProfileFields, ToShort as _};
use plume_util_error::FmtCompact as _;
use tracing::{debug, trace};

use crate::source::{RecordSource, RelayUrl};

const LOG_TARGET: &str = "plume::profiles";

#[derive(Debug, Default)]
struct ProfileCacheInner {
    /// An entry exists once a fetch for the author completed, even if it
    /// found nothing
    profiles: HashMap<AuthorId, ProfileFields>,
    in_flight: HashSet<AuthorId>,
}

/// Author display metadata for a whole session
///
/// Cheap to clone; clones share the same entries. Entries are never evicted,
/// and a field once set is never cleared by a later fetch.
#[derive(Debug, Clone, Default)]
pub struct ProfileCache {
    inner: Arc<Mutex<ProfileCacheInner>>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProfileCacheInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn get(&self, author: &AuthorId) -> Option<ProfileFields> {
        self.lock().profiles.get(author).cloned()
    }

    pub fn contains(&self, author: &AuthorId) -> bool {
        self.lock().profiles.contains_key(author)
    }

    pub fn len(&self) -> usize {
        self.lock().profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().profiles.is_empty()
    }

    /// Merge `fields` into the entry of `author`, returning the merged entry
    /// if anything changed
    pub fn merge(&self, author: AuthorId, fields: &ProfileFields) -> Option<ProfileFields> {
        let mut inner = self.lock();
        let entry = inner.profiles.entry(author).or_default();
        entry.merge_from(fields).then(|| entry.clone())
    }

    /// Fetch profiles of all `authors` not cached yet (nor being fetched)
    ///
    /// `on_patch` is called for every author whose entry gained or changed a
    /// field. Failed fetches leave no entry, so a later call retries them.
    pub async fn ensure<F>(
        &self,
        source: &dyn RecordSource,
        authors: impl IntoIterator<Item = AuthorId>,
        sources: &[RelayUrl],
        on_patch: F,
    ) where
        F: Fn(AuthorId, &ProfileFields) + Send,
    {
        let pending = {
            let mut inner = self.lock();
            let mut pending = vec![];
            for author in authors {
                if inner.profiles.contains_key(&author) || inner.in_flight.contains(&author) {
                    continue;
                }
                inner.in_flight.insert(author);
                pending.push(author);
            }
            InFlight {
                cache: self,
                authors: pending,
            }
        };

        if pending.authors.is_empty() {
            return;
        }
        trace!(target: LOG_TARGET, count = pending.authors.len(), "Fetching profiles");

        let results = source.fetch_profiles(&pending.authors, sources).await;

        for (author, res) in results {
            match res {
                Ok(Some(fields)) => {
                    if let Some(merged) = self.merge(author, &fields) {
                        on_patch(author, &merged);
                    }
                }
                Ok(None) => {
                    trace!(target: LOG_TARGET, author = %author.to_short(), "No profile found");
                    self.lock().profiles.entry(author).or_default();
                }
                Err(err) => {
                    debug!(
                        target: LOG_TARGET,
                        author = %author.to_short(),
                        err = %err.fmt_compact(),
                        "Failed to fetch profile"
                    );
                }
            }
            self.lock().in_flight.remove(&author);
        }
    }
}

/// Authors claimed by one `ensure` call
///
/// Released on drop, so a cancelled `ensure` doesn't block later fetches.
struct InFlight<'c> {
    cache: &'c ProfileCache,
    authors: Vec<AuthorId>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut inner = self.cache.lock();
        for author in &self.authors {
            inner.in_flight.remove(author);
        }
    }
}
