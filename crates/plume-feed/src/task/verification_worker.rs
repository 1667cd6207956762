use std::sync::Arc;
use std::time::Duration;

use plume_core::{Record, ToShort as _};
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace};

use crate::controller::FeedHandle;
use crate::events::BadgeState;
use crate::source::Verifier;

const LOG_TARGET: &str = "plume::verify";

/// One admitted record waiting for its authenticity check
#[derive(Debug, Clone)]
pub(crate) struct VerificationJob {
    pub(crate) generation: u64,
    pub(crate) record: Arc<Record>,
}

/// Checks admitted records one at a time and reports badges back to the
/// controller
///
/// A failed check is final; nothing is retried.
pub(crate) struct VerificationWorker {
    controller: FeedHandle,
    verifier: Arc<dyn Verifier>,
    jobs_rx: mpsc::UnboundedReceiver<VerificationJob>,
    delay: Duration,
}

impl VerificationWorker {
    pub(crate) fn new(
        controller: FeedHandle,
        verifier: Arc<dyn Verifier>,
        jobs_rx: mpsc::UnboundedReceiver<VerificationJob>,
        delay: Duration,
    ) -> Self {
        debug!(target: LOG_TARGET, "Starting verification worker");
        Self {
            controller,
            verifier,
            jobs_rx,
            delay,
        }
    }

    #[instrument(name = "verification-worker", skip(self), ret)]
    pub(crate) async fn run(mut self) {
        while let Some(job) = self.jobs_rx.recv().await {
            let Some(controller) = self.controller.controller_opt() else {
                debug!(target: LOG_TARGET, "Controller gone, quitting");
                break;
            };
            if !controller.is_current(job.generation) {
                trace!(target: LOG_TARGET, id = %job.record.id.to_short(), "Dropping stale verification");
                continue;
            }
            // don't keep the controller alive during the check
            drop(controller);

            let verification = self.verifier.verify(&job.record).await;
            let badge = if verification.valid {
                BadgeState::Verified
            } else {
                BadgeState::Failed {
                    reason: verification
                        .reason
                        .unwrap_or_else(|| "Verification failed".to_owned()),
                }
            };
            trace!(target: LOG_TARGET, id = %job.record.id.to_short(), ?badge, "Verified");

            let Some(controller) = self.controller.controller_opt() else {
                debug!(target: LOG_TARGET, "Controller gone, quitting");
                break;
            };
            controller.apply_badge(job.generation, job.record.id, badge);
            drop(controller);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }
    }
}
