use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::service::ProcessingService;
use crate::{Error, Result};

/// Wire sentinel for finished processing. The service reports percentages as
/// strings and completion is string equality, not numeric comparison.
pub const PROCESSING_DONE: &str = "100";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_POLL_FAILURE_BUDGET: u32 = 8;

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    /// Consecutive poll failures tolerated before the task is declared
    /// stalled. A successful poll resets the count.
    pub failure_budget: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            failure_budget: DEFAULT_POLL_FAILURE_BUDGET,
        }
    }
}

/// Polls `/progress/{job}/{filename}` until the completion sentinel shows up.
/// Fires immediately, then every `settings.interval`. Returns as soon as the
/// sentinel is observed; the caller gets no further ticks after that.
pub async fn poll_until_complete<S: ProcessingService + ?Sized>(
    service: &S,
    job_code: &str,
    filename: &str,
    settings: &PollSettings,
    cancel: Option<&CancellationToken>,
    mut on_progress: impl FnMut(&str),
) -> Result<()> {
    let mut ticker = tokio::time::interval(settings.interval);
    let mut consecutive_failures = 0u32;

    loop {
        // Cancellation interrupts the wait for the next tick, it does not
        // wait out the interval. Biased so an already-cancelled token wins
        // over the immediately-ready first tick.
        if let Some(cancel) = cancel {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = ticker.tick() => {}
            }
        } else {
            ticker.tick().await;
        }

        match service.poll_progress(job_code, filename).await {
            Ok(raw) => {
                consecutive_failures = 0;
                on_progress(&raw);
                if raw == PROCESSING_DONE {
                    debug!(event = "poll.done", filename, "poll.done");
                    return Ok(());
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(
                    event = "poll.failed",
                    filename,
                    consecutive_failures,
                    budget = settings.failure_budget,
                    error = %e,
                    "poll.failed"
                );
                if consecutive_failures >= settings.failure_budget {
                    return Err(Error::ProcessingStalled {
                        filename: filename.to_string(),
                        polls_failed: consecutive_failures,
                    });
                }
            }
        }
    }
}
