use std::sync::Arc;

use plume_core::{AuthorId, ProfileFields, Record, RecordId};
use serde::Serialize;

/// Lifecycle of a [`crate::FeedController`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    #[default]
    Idle,
    Loading,
    Streaming,
    BatchFetching,
    Loaded,
    Polling,
}

impl IngestState {
    /// `true` once the initial load finished, including while polling
    pub fn is_loaded(self) -> bool {
        matches!(self, Self::Loaded | Self::Polling)
    }
}

/// Authenticity badge of a stored record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BadgeState {
    Pending,
    Verified,
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePhase {
    Loading,
    Polling,
    Paging,
}

/// What a renderer needs to know, in order
///
/// Events carry no presentation details. A renderer that lags behind the
/// channel capacity should re-read [`crate::FeedController::visible_records`].
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// A fresh load cycle started; the previous view is gone
    Loading,
    /// The whole visible list changed (initial batch load, reactivation)
    StoreReplaced { records: Vec<Arc<Record>> },
    /// New records were inserted at their sort position
    RecordsAdmitted { records: Vec<Arc<Record>> },
    /// The filter changed; this is the new visible list
    ViewRefiltered { records: Vec<Arc<Record>> },
    BadgeUpdated { id: RecordId, badge: BadgeState },
    ProfilePatched {
        author: AuthorId,
        profile: ProfileFields,
    },
    /// The initial load completed without a single record
    Empty,
    Loaded,
    /// Recoverable failure, meant for a dismissible banner
    Failed {
        phase: FailurePhase,
        message: String,
    },
}
