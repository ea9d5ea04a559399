use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::core::clock::{self, Clock};
use crate::core::metrics;
use crate::core::time::seconds_between;
use crate::db::models::{Answer, Attempt};
use crate::db::types::{AttemptStatus, SubmitCause};
use crate::services::answers::{self as answer_rules, AnswerPayload};
use crate::services::errors::EngineError;
use crate::services::locks::{attempt_key, start_key, KeyedLocks};
use crate::services::scoring;
use crate::store::{
    AnswerUpsert, AnswerWrite, AttemptStore, CreateAttempt, FinishAttempt, FinishOutcome,
    NewAttempt,
};
use crate::tasks::scheduler::AutoSubmitScheduler;

/// Client timers may lag the server by this much before the drift is logged.
const CLIENT_DRIFT_TOLERANCE_SECONDS: i64 = 5;

/// Who is reading an attempt.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Viewer<'a> {
    Learner(&'a str),
    Grader,
}

#[derive(Debug, Clone)]
pub(crate) struct AttemptView {
    pub(crate) attempt: Attempt,
    pub(crate) answers: Vec<Answer>,
    pub(crate) now: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub(crate) struct StartOutcome {
    pub(crate) view: AttemptView,
    /// The learner already had this attempt in progress.
    pub(crate) resumed: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct SubmitOutcome {
    pub(crate) attempt: Attempt,
    /// False when the attempt was already terminal and nothing changed.
    pub(crate) applied: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct SavedAnswer {
    pub(crate) answer: Answer,
    pub(crate) changed: bool,
    pub(crate) remaining_seconds: i64,
}

#[derive(Debug, Clone)]
pub(crate) enum ExpireOutcome {
    TimedOut(Attempt),
    /// Deadline not reached yet; the timer was re-armed for it.
    NotDue(OffsetDateTime),
    AlreadyFinished,
    Missing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RecoveryReport {
    pub(crate) timed_out: usize,
    pub(crate) rearmed: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct AttemptFilter {
    pub(crate) status: Option<AttemptStatus>,
    pub(crate) skip: i64,
    pub(crate) limit: i64,
}

/// The attempt state machine: `in_progress -> submitted | timed_out -> graded`.
#[derive(Clone)]
pub(crate) struct AttemptService {
    store: Arc<dyn AttemptStore>,
    clock: Arc<dyn Clock>,
    scheduler: AutoSubmitScheduler,
    locks: KeyedLocks,
}

impl AttemptService {
    pub(crate) fn new(
        store: Arc<dyn AttemptStore>,
        clock: Arc<dyn Clock>,
        scheduler: AutoSubmitScheduler,
    ) -> Self {
        Self { store, clock, scheduler, locks: KeyedLocks::default() }
    }

    pub(crate) fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    pub(crate) fn store(&self) -> &Arc<dyn AttemptStore> {
        &self.store
    }

    pub(crate) fn scheduler(&self) -> &AutoSubmitScheduler {
        &self.scheduler
    }

    pub(crate) async fn lock_attempt(&self, attempt_id: &str) -> OwnedMutexGuard<()> {
        self.locks.acquire(&attempt_key(attempt_id)).await
    }

    /// Loads an attempt and applies any overdue timeout first.
    /// The caller must hold the attempt lock.
    pub(crate) async fn load_settled(&self, attempt_id: &str) -> Result<Attempt, EngineError> {
        let attempt = self
            .store
            .find_attempt(attempt_id)
            .await?
            .ok_or_else(|| EngineError::AttemptNotFound(attempt_id.to_string()))?;
        self.expire_if_due(attempt).await
    }

    pub(crate) async fn start(
        &self,
        learner_id: &str,
        exam_id: &str,
    ) -> Result<StartOutcome, EngineError> {
        let _start_guard = self.locks.acquire(&start_key(exam_id, learner_id)).await;

        let exam = self
            .store
            .find_exam(exam_id)
            .await?
            .ok_or_else(|| EngineError::ExamNotFound(exam_id.to_string()))?;

        if let Some(active) = self.store.find_active_attempt(exam_id, learner_id).await? {
            let _guard = self.lock_attempt(&active.id).await;
            let active = self.load_settled(&active.id).await?;
            if active.status == AttemptStatus::InProgress {
                self.scheduler.arm(&active.id, active.end_time);
                let view = self.view(active).await?;
                return Ok(StartOutcome { view, resumed: true });
            }
        }

        let used = self.store.count_learner_attempts(exam_id, learner_id).await?;
        if used >= i64::from(exam.max_attempts) {
            return Err(EngineError::AlreadyAttempted);
        }

        let now = self.clock.now();
        if !exam.is_open_at(now) {
            return Err(EngineError::ExamNotActive);
        }

        let end_time = now.checked_add(exam.duration()).ok_or_else(|| {
            EngineError::InvalidExam(format!(
                "duration of {} minutes overflows the calendar",
                exam.duration_minutes
            ))
        })?;
        let created = self
            .store
            .create_attempt(NewAttempt {
                id: Uuid::new_v4().to_string(),
                exam,
                learner_id: learner_id.to_string(),
                start_time: now,
                end_time,
            })
            .await?;

        let (attempt, resumed) = match created {
            CreateAttempt::Created(attempt) => {
                metrics::attempt_started();
                tracing::info!(
                    attempt_id = %attempt.id,
                    exam_id,
                    learner_id,
                    end_time = %attempt.end_time,
                    "Attempt started"
                );
                (attempt, false)
            }
            CreateAttempt::Existing(attempt) => (attempt, true),
            CreateAttempt::LimitReached => return Err(EngineError::AlreadyAttempted),
        };

        self.scheduler.arm(&attempt.id, attempt.end_time);
        let view = self.view(attempt).await?;
        Ok(StartOutcome { view, resumed })
    }

    pub(crate) async fn get(
        &self,
        attempt_id: &str,
        viewer: Viewer<'_>,
    ) -> Result<AttemptView, EngineError> {
        let _guard = self.lock_attempt(attempt_id).await;
        let attempt = self.load_settled(attempt_id).await?;
        ensure_visible(&attempt, viewer)?;
        self.view(attempt).await
    }

    pub(crate) async fn save_answer(
        &self,
        attempt_id: &str,
        learner_id: &str,
        question_id: &str,
        payload: AnswerPayload,
        client_remaining_seconds: Option<i64>,
    ) -> Result<SavedAnswer, EngineError> {
        let _guard = self.lock_attempt(attempt_id).await;
        let attempt = self.load_owned_active(attempt_id, learner_id).await?;

        let question = attempt
            .exam()
            .question(question_id)
            .ok_or_else(|| EngineError::InvalidQuestion(question_id.to_string()))?;
        let normalized = answer_rules::normalize(question, payload)?;

        let now = self.clock.now();
        let remaining_seconds = clock::remaining_seconds(now, attempt.end_time);
        if let Some(client) = client_remaining_seconds {
            if client > remaining_seconds + CLIENT_DRIFT_TOLERANCE_SECONDS {
                tracing::warn!(
                    attempt_id,
                    client_remaining_seconds = client,
                    server_remaining_seconds = remaining_seconds,
                    "Client timer ahead of server deadline"
                );
            }
        }

        let write = self
            .store
            .save_answer(AnswerUpsert {
                attempt_id: attempt_id.to_string(),
                question_id: question_id.to_string(),
                selected_option_id: normalized.selected_option_id,
                free_text: normalized.free_text,
                file_reference: normalized.file_reference,
                status: normalized.status,
                now,
            })
            .await?
            .ok_or_else(|| EngineError::AttemptNotFound(attempt_id.to_string()))?;

        match write {
            AnswerWrite::Saved(answer) => {
                metrics::answer_saved();
                tracing::debug!(attempt_id, question_id, status = ?answer.status, "Answer saved");
                Ok(SavedAnswer { answer, changed: true, remaining_seconds })
            }
            AnswerWrite::Unchanged(answer) => {
                Ok(SavedAnswer { answer, changed: false, remaining_seconds })
            }
            AnswerWrite::AttemptInactive(status) => Err(EngineError::AttemptNotActive(status)),
        }
    }

    pub(crate) async fn mark_for_review(
        &self,
        attempt_id: &str,
        learner_id: &str,
        question_id: &str,
    ) -> Result<SavedAnswer, EngineError> {
        let _guard = self.lock_attempt(attempt_id).await;
        let attempt = self.load_owned_active(attempt_id, learner_id).await?;

        if attempt.exam().question(question_id).is_none() {
            return Err(EngineError::InvalidQuestion(question_id.to_string()));
        }

        let now = self.clock.now();
        let remaining_seconds = clock::remaining_seconds(now, attempt.end_time);
        let write = self
            .store
            .mark_for_review(attempt_id, question_id, now)
            .await?
            .ok_or_else(|| EngineError::AttemptNotFound(attempt_id.to_string()))?;

        match write {
            AnswerWrite::Saved(answer) => {
                Ok(SavedAnswer { answer, changed: true, remaining_seconds })
            }
            AnswerWrite::Unchanged(answer) => {
                Ok(SavedAnswer { answer, changed: false, remaining_seconds })
            }
            AnswerWrite::AttemptInactive(status) => Err(EngineError::AttemptNotActive(status)),
        }
    }

    /// Learner-initiated submit. A second call, or a call that loses the race
    /// against the timeout, returns the terminal attempt unchanged.
    pub(crate) async fn submit(
        &self,
        attempt_id: &str,
        learner_id: &str,
    ) -> Result<SubmitOutcome, EngineError> {
        let _guard = self.lock_attempt(attempt_id).await;
        let attempt = self
            .store
            .find_attempt(attempt_id)
            .await?
            .ok_or_else(|| EngineError::AttemptNotFound(attempt_id.to_string()))?;
        ensure_owner(&attempt, learner_id)?;

        if attempt.status != AttemptStatus::InProgress {
            return Ok(SubmitOutcome { attempt, applied: false });
        }

        let cause = if clock::is_expired(self.clock.now(), attempt.end_time) {
            SubmitCause::Timeout
        } else {
            SubmitCause::Learner
        };
        self.finish_locked(&attempt, cause).await
    }

    /// Timeout path used by the scheduler and the sweep.
    pub(crate) async fn expire(&self, attempt_id: &str) -> Result<ExpireOutcome, EngineError> {
        let _guard = self.lock_attempt(attempt_id).await;
        let Some(attempt) = self.store.find_attempt(attempt_id).await? else {
            self.scheduler.disarm(attempt_id);
            return Ok(ExpireOutcome::Missing);
        };

        if attempt.status != AttemptStatus::InProgress {
            return Ok(ExpireOutcome::AlreadyFinished);
        }

        if !clock::is_expired(self.clock.now(), attempt.end_time) {
            self.scheduler.arm(&attempt.id, attempt.end_time);
            return Ok(ExpireOutcome::NotDue(attempt.end_time));
        }

        let outcome = self.finish_locked(&attempt, SubmitCause::Timeout).await?;
        if outcome.applied {
            Ok(ExpireOutcome::TimedOut(outcome.attempt))
        } else {
            Ok(ExpireOutcome::AlreadyFinished)
        }
    }

    pub(crate) async fn list_for_exam(
        &self,
        exam_id: &str,
        filter: AttemptFilter,
    ) -> Result<(Vec<Attempt>, i64), EngineError> {
        let page = self
            .store
            .list_attempts_for_exam(exam_id, filter.status, filter.skip, filter.limit)
            .await?;
        let now = self.clock.now();

        let mut attempts = Vec::with_capacity(page.len());
        for attempt in page {
            if attempt.status == AttemptStatus::InProgress
                && clock::is_expired(now, attempt.end_time)
            {
                if let ExpireOutcome::TimedOut(expired) = self.expire(&attempt.id).await? {
                    if filter.status.map_or(true, |wanted| wanted == expired.status) {
                        attempts.push(expired);
                    }
                    continue;
                }
            }
            attempts.push(attempt);
        }

        let total = self.store.count_attempts_for_exam(exam_id, filter.status).await?;
        Ok((attempts, total))
    }

    pub(crate) async fn delete(&self, attempt_id: &str) -> Result<(), EngineError> {
        let _guard = self.lock_attempt(attempt_id).await;
        self.scheduler.disarm(attempt_id);
        if !self.store.delete_attempt(attempt_id).await? {
            return Err(EngineError::AttemptNotFound(attempt_id.to_string()));
        }

        tracing::info!(attempt_id, "Attempt deleted");
        Ok(())
    }

    /// Restart recovery: overdue attempts time out, live ones are re-armed.
    /// Runs before the service accepts requests.
    pub(crate) async fn recover(&self) -> Result<RecoveryReport, EngineError> {
        let mut report = RecoveryReport::default();
        let now = self.clock.now();

        for pending in self.store.list_in_progress().await? {
            if clock::is_expired(now, pending.end_time) {
                if let ExpireOutcome::TimedOut(_) = self.expire(&pending.id).await? {
                    report.timed_out += 1;
                }
            } else {
                self.scheduler.arm(&pending.id, pending.end_time);
                report.rearmed += 1;
            }
        }

        tracing::info!(
            timed_out = report.timed_out,
            rearmed = report.rearmed,
            "Recovered in-progress attempts"
        );
        Ok(report)
    }

    /// Times out overdue attempts found in the store, whether or not this
    /// process armed them.
    pub(crate) async fn sweep_due(&self, limit: i64) -> Result<usize, EngineError> {
        let mut timed_out = 0;
        for pending in self.store.list_due(self.clock.now(), limit).await? {
            if let ExpireOutcome::TimedOut(_) = self.expire(&pending.id).await? {
                timed_out += 1;
            }
        }
        Ok(timed_out)
    }

    async fn load_owned_active(
        &self,
        attempt_id: &str,
        learner_id: &str,
    ) -> Result<Attempt, EngineError> {
        let attempt = self.load_settled(attempt_id).await?;
        ensure_owner(&attempt, learner_id)?;
        if attempt.status != AttemptStatus::InProgress {
            return Err(EngineError::AttemptNotActive(attempt.status));
        }
        Ok(attempt)
    }

    async fn expire_if_due(&self, attempt: Attempt) -> Result<Attempt, EngineError> {
        if attempt.status != AttemptStatus::InProgress
            || !clock::is_expired(self.clock.now(), attempt.end_time)
        {
            return Ok(attempt);
        }

        Ok(self.finish_locked(&attempt, SubmitCause::Timeout).await?.attempt)
    }

    /// Caller holds the attempt lock.
    async fn finish_locked(
        &self,
        attempt: &Attempt,
        cause: SubmitCause,
    ) -> Result<SubmitOutcome, EngineError> {
        let now = self.clock.now();
        let submitted_at = now.min(attempt.end_time);
        let allotted = attempt.exam().duration().whole_seconds().max(0);
        let time_spent_seconds = seconds_between(attempt.start_time, submitted_at).min(allotted);

        let outcome = self
            .store
            .finish_attempt(
                &attempt.id,
                FinishAttempt { cause, submitted_at, time_spent_seconds, now },
                scoring::auto_grade,
            )
            .await?
            .ok_or_else(|| EngineError::AttemptNotFound(attempt.id.clone()))?;

        self.scheduler.disarm(&attempt.id);

        match outcome {
            FinishOutcome::Finished(finished) => {
                metrics::attempt_submitted(cause);
                tracing::info!(
                    attempt_id = %finished.id,
                    exam_id = %finished.exam_id,
                    learner_id = %finished.learner_id,
                    cause = cause.as_str(),
                    time_spent_seconds,
                    "Attempt submitted"
                );
                Ok(SubmitOutcome { attempt: finished, applied: true })
            }
            FinishOutcome::AlreadyFinished(current) => {
                Ok(SubmitOutcome { attempt: current, applied: false })
            }
        }
    }

    async fn view(&self, attempt: Attempt) -> Result<AttemptView, EngineError> {
        let answers = self.store.list_answers(&attempt.id).await?;
        Ok(AttemptView { attempt, answers, now: self.clock.now() })
    }
}

pub(crate) fn ensure_owner(attempt: &Attempt, learner_id: &str) -> Result<(), EngineError> {
    if attempt.learner_id != learner_id {
        return Err(EngineError::NotAttemptOwner);
    }
    Ok(())
}

pub(crate) fn ensure_visible(attempt: &Attempt, viewer: Viewer<'_>) -> Result<(), EngineError> {
    match viewer {
        Viewer::Grader => Ok(()),
        Viewer::Learner(learner_id) => ensure_owner(attempt, learner_id),
    }
}
