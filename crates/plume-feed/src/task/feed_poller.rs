use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, instrument, trace};

use crate::controller::{FeedHandle, PollOutcome};

const LOG_TARGET: &str = "plume::feed";

/// Periodic incremental fetch of one loaded feed generation
///
/// Quits when the controller is gone or moved on to another generation.
pub(crate) struct FeedPoller {
    controller: FeedHandle,
    generation: u64,
    interval: Duration,
}

impl FeedPoller {
    pub(crate) fn new(controller: FeedHandle, generation: u64, interval: Duration) -> Self {
        debug!(target: LOG_TARGET, generation, ?interval, "Starting feed poller");
        Self {
            controller,
            generation,
            interval,
        }
    }

    #[instrument(name = "feed-poller", skip(self), fields(generation = self.generation), ret)]
    pub(crate) async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately, and the feed was just loaded
        interval.tick().await;

        loop {
            interval.tick().await;
            trace!(target: LOG_TARGET, "Woke up");

            let Some(controller) = self.controller.controller_opt() else {
                debug!(target: LOG_TARGET, "Controller gone, quitting");
                break;
            };

            match controller.poll_tick(self.generation).await {
                PollOutcome::Stale => {
                    debug!(target: LOG_TARGET, "Feed moved on, quitting");
                    break;
                }
                PollOutcome::Skipped => {
                    trace!(target: LOG_TARGET, "Feed focused, not polling");
                }
                PollOutcome::Fetched(count) => {
                    trace!(target: LOG_TARGET, count, "Poll finished");
                }
                PollOutcome::Failed => {}
            }
        }
    }
}
