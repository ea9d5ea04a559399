use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use time::OffsetDateTime;
use tokio::sync::{watch, Notify};
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

use crate::services::attempts::{AttemptService, ExpireOutcome};

const SWEEP_BATCH: i64 = 200;

/// In-memory deadline queue for auto-submission, keyed by attempt end time.
/// Losing it is safe: every access to an attempt re-checks its deadline and
/// the run loop also sweeps the store for overdue attempts.
#[derive(Clone, Default)]
pub(crate) struct AutoSubmitScheduler {
    inner: Arc<SchedulerInner>,
}

#[derive(Default)]
struct SchedulerInner {
    queue: Mutex<DeadlineQueue>,
    wake: Notify,
}

#[derive(Default)]
struct DeadlineQueue {
    by_deadline: BTreeSet<(OffsetDateTime, String)>,
    by_attempt: HashMap<String, OffsetDateTime>,
}

impl AutoSubmitScheduler {
    fn queue(&self) -> MutexGuard<'_, DeadlineQueue> {
        self.inner.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn arm(&self, attempt_id: &str, end_time: OffsetDateTime) {
        let pending = {
            let mut queue = self.queue();
            if let Some(previous) = queue.by_attempt.insert(attempt_id.to_string(), end_time) {
                queue.by_deadline.remove(&(previous, attempt_id.to_string()));
            }
            queue.by_deadline.insert((end_time, attempt_id.to_string()));
            queue.by_attempt.len()
        };

        crate::core::metrics::auto_submit_armed(pending);
        self.inner.wake.notify_one();
    }

    /// Cancels a pending entry. Returns false when nothing was armed.
    pub(crate) fn disarm(&self, attempt_id: &str) -> bool {
        let (removed, pending) = {
            let mut queue = self.queue();
            let removed = match queue.by_attempt.remove(attempt_id) {
                Some(deadline) => queue.by_deadline.remove(&(deadline, attempt_id.to_string())),
                None => false,
            };
            (removed, queue.by_attempt.len())
        };

        if removed {
            crate::core::metrics::auto_submit_armed(pending);
        }
        removed
    }

    /// Removes and returns every entry whose deadline is at or before `now`.
    pub(crate) fn take_due(&self, now: OffsetDateTime) -> Vec<String> {
        let (due, pending) = {
            let mut queue = self.queue();
            let mut due = Vec::new();
            while let Some((deadline, attempt_id)) = queue.by_deadline.first().cloned() {
                if deadline > now {
                    break;
                }
                queue.by_deadline.pop_first();
                queue.by_attempt.remove(&attempt_id);
                due.push(attempt_id);
            }
            (due, queue.by_attempt.len())
        };

        if !due.is_empty() {
            crate::core::metrics::auto_submit_armed(pending);
        }
        due
    }

    pub(crate) fn next_deadline(&self) -> Option<OffsetDateTime> {
        self.queue().by_deadline.first().map(|(deadline, _)| *deadline)
    }

    #[cfg(test)]
    pub(crate) fn deadline_for(&self, attempt_id: &str) -> Option<OffsetDateTime> {
        self.queue().by_attempt.get(attempt_id).copied()
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue().by_attempt.len()
    }

    async fn wait_for_change(&self) {
        self.inner.wake.notified().await;
    }
}

pub(crate) async fn run(
    attempts: AttemptService,
    sweep_every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let scheduler = attempts.scheduler().clone();
    let mut sweep = interval(sweep_every);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        pending = scheduler.pending(),
        sweep_seconds = sweep_every.as_secs(),
        "Auto-submit scheduler started"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        fire_due(&attempts).await;

        let idle = scheduler
            .next_deadline()
            .map(|deadline| {
                let wait = (deadline - attempts.now()).max(time::Duration::ZERO);
                Duration::try_from(wait).unwrap_or(sweep_every).min(sweep_every)
            })
            .unwrap_or(sweep_every);

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = scheduler.wait_for_change() => {}
            _ = sleep(idle) => {}
            _ = sweep.tick() => {
                match attempts.sweep_due(SWEEP_BATCH).await {
                    Ok(0) => {}
                    Ok(count) => tracing::info!(count, "Timed out overdue attempts during sweep"),
                    Err(err) => tracing::error!(error = %err, "Overdue attempt sweep failed"),
                }
            }
        }
    }

    tracing::info!(pending = scheduler.pending(), "Auto-submit scheduler stopped");
}

/// Fires every queue entry that is due by the engine clock.
pub(crate) async fn fire_due(attempts: &AttemptService) -> usize {
    let due = attempts.scheduler().take_due(attempts.now());
    let mut fired = 0;

    for attempt_id in due {
        match attempts.expire(&attempt_id).await {
            Ok(ExpireOutcome::TimedOut(_)) => {
                crate::core::metrics::auto_submit_fired();
                fired += 1;
            }
            Ok(ExpireOutcome::NotDue(end_time)) => {
                tracing::debug!(
                    attempt_id = %attempt_id,
                    end_time = %end_time,
                    "Auto-submit re-armed"
                );
            }
            Ok(ExpireOutcome::AlreadyFinished | ExpireOutcome::Missing) => {}
            Err(err) => {
                tracing::error!(
                    attempt_id = %attempt_id,
                    error = %err,
                    "Auto-submit failed; left to the sweep"
                );
            }
        }
    }

    fired
}
