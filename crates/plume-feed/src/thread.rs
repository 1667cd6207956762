use std::collections::HashSet;
use std::sync::Arc;

use itertools::Itertools as _;
use plume_core::{Record, RecordKind, ReplyFallback, ToShort as _};
use plume_util_error::FmtCompact as _;
use tracing::{debug, trace};

use crate::filter::FilterConfig;
use crate::source::{FeedQuery, RecordSource, RelayUrl, merge_relay_hints};

const LOG_TARGET: &str = "plume::feed";

/// A record with its reply chain above and its replies below
#[derive(Debug, Clone)]
pub struct Thread {
    /// Root first, ending with the direct parent of `focus`
    pub ancestors: Vec<Arc<Record>>,
    pub focus: Arc<Record>,
    /// Records referencing `focus`, oldest first
    pub replies: Vec<Arc<Record>>,
}

/// Walk up the parent chain and fetch the replies of `focus`
///
/// The walk stops at a missing parent, at an id seen before, or after
/// `max_ancestors` steps. Source failures shorten the result instead of
/// failing it. Replies pass through `filter`; ancestors don't, so the chain
/// stays readable.
pub async fn load_thread(
    source: &dyn RecordSource,
    sources: &[RelayUrl],
    focus: Arc<Record>,
    filter: &FilterConfig,
    fallback: ReplyFallback,
    max_ancestors: usize,
    reply_limit: usize,
) -> Thread {
    let mut ancestors = vec![];
    let mut seen = HashSet::from([focus.id]);
    let mut current = focus.clone();

    while ancestors.len() < max_ancestors {
        let Some(parent_id) = current.parent_id(fallback) else {
            break;
        };
        if !seen.insert(parent_id) {
            debug!(target: LOG_TARGET, id = %parent_id.to_short(), "Reply chain loops");
            break;
        }

        let relays = merge_relay_hints(sources, current.parent_relay_hint(fallback));
        let parent = match source.fetch_records_by_ids(&relays, &[parent_id]).await {
            Ok(records) => records.into_iter().find(|r| r.id == parent_id),
            Err(err) => {
                debug!(
                    target: LOG_TARGET,
                    id = %parent_id.to_short(),
                    err = %err.fmt_compact(),
                    "Failed to fetch parent"
                );
                None
            }
        };
        let Some(parent) = parent else {
            trace!(target: LOG_TARGET, id = %parent_id.to_short(), "Parent not found");
            break;
        };

        let parent = Arc::new(parent);
        ancestors.push(parent.clone());
        current = parent;
    }
    ancestors.reverse();

    let query = FeedQuery {
        sources: sources.to_vec(),
        kinds: vec![RecordKind::NOTE],
        references: vec![focus.id],
        limit: Some(reply_limit),
        ..Default::default()
    };
    let replies = match source.fetch_records(&query).await {
        Ok(records) => records
            .into_iter()
            .filter(|r| r.id != focus.id && filter.admits(r))
            .unique_by(|r| r.id)
            .sorted_by_key(|r| r.created_at)
            .map(Arc::new)
            .collect(),
        Err(err) => {
            debug!(
                target: LOG_TARGET,
                id = %focus.id.to_short(),
                err = %err.fmt_compact(),
                "Failed to fetch replies"
            );
            vec![]
        }
    };

    Thread {
        ancestors,
        focus,
        replies,
    }
}
