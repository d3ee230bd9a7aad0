//! Fixed-cadence background tasks.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::error::EngineError;

/// Runs `task` every `period` until `shutdown` flips to `true`.
///
/// The first run happens immediately. A run that outlasts the period delays
/// the next one instead of queueing catch-up runs, so one task never runs
/// twice concurrently. Failures are logged and the loop carries on.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), EngineError>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(task = name, period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX), "periodic task started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = task().await {
                        tracing::warn!(task = name, error = %err, "periodic task failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(task = name, "periodic task stopped");
    })
}
