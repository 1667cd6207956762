use std::time::Duration;

use plume_core::ReplyFallback;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const DEFAULT_VERIFY_DELAY: Duration = Duration::from_millis(25);
pub const DEFAULT_MAX_EMBED_DEPTH: usize = 5;
pub const DEFAULT_MAX_THREAD_ANCESTORS: usize = 16;
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Tunables of a [`crate::FeedController`]
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Period of the incremental fetch once a feed is loaded
    pub poll_interval: Duration,
    /// `limit` of initial loads and of each older page
    pub page_limit: usize,
    /// Pause between two verification checks
    pub verify_delay: Duration,
    /// Deepest reference level that is still expanded
    pub max_embed_depth: usize,
    pub max_thread_ancestors: usize,
    pub reply_fallback: ReplyFallback,
    /// Capacity of the renderer event channel; slow subscribers lag
    pub event_capacity: usize,
}

#[bon::bon]
impl FeedConfig {
    #[builder(finish_fn(name = "build"))]
    pub fn new(
        #[builder(default = DEFAULT_POLL_INTERVAL)] poll_interval: Duration,
        #[builder(default = DEFAULT_PAGE_LIMIT)] page_limit: usize,
        #[builder(default = DEFAULT_VERIFY_DELAY)] verify_delay: Duration,
        #[builder(default = DEFAULT_MAX_EMBED_DEPTH)] max_embed_depth: usize,
        #[builder(default = DEFAULT_MAX_THREAD_ANCESTORS)] max_thread_ancestors: usize,
        #[builder(default)] reply_fallback: ReplyFallback,
        #[builder(default = DEFAULT_EVENT_CAPACITY)] event_capacity: usize,
    ) -> Self {
        Self {
            poll_interval,
            page_limit,
            verify_delay,
            max_embed_depth,
            max_thread_ancestors,
            reply_fallback,
            event_capacity: event_capacity.max(1),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
