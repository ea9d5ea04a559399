use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::db::models::{Answer, Attempt, ExamDefinition, StoredExam};
use crate::db::types::{AnswerStatus, AttemptStatus};
use crate::repositories::{answers, attempts, exams, health};

use super::{
    AnswerUpsert, AnswerWrite, AttemptStore, AutoGrader, CreateAttempt, FinishAttempt,
    FinishOutcome, GuardedWrite, ManualGrade, NewAttempt, PendingAttempt, StoreResult,
};

#[derive(Clone)]
pub(crate) struct PgAttemptStore {
    pool: PgPool,
}

impl PgAttemptStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn apply_marks<'c>(
        tx: &mut sqlx::Transaction<'c, sqlx::Postgres>,
        attempt: &Attempt,
        grader: AutoGrader,
        now: OffsetDateTime,
    ) -> Result<bool, sqlx::Error> {
        let current = answers::list_by_attempt(&mut **tx, &attempt.id).await?;
        let marks = grader(attempt.exam(), &current);
        for mark in &marks {
            answers::set_auto_marks(&mut **tx, &attempt.id, &mark.question_id, mark.marks, now)
                .await?;
        }
        Ok(!marks.is_empty())
    }
}

#[async_trait]
impl AttemptStore for PgAttemptStore {
    async fn ping(&self) -> StoreResult<()> {
        health::ping(&self.pool).await?;
        Ok(())
    }

    async fn upsert_exam(
        &self,
        exam: &ExamDefinition,
        now: OffsetDateTime,
    ) -> StoreResult<StoredExam> {
        Ok(exams::upsert(&self.pool, exam, now).await?)
    }

    async fn find_exam(&self, exam_id: &str) -> StoreResult<Option<ExamDefinition>> {
        let stored = exams::find_by_id(&self.pool, exam_id).await?;
        Ok(stored.map(|row| row.definition.0))
    }

    async fn create_attempt(&self, attempt: NewAttempt) -> StoreResult<CreateAttempt> {
        let mut tx = self.pool.begin().await?;
        attempts::lock_exam_learner(&mut *tx, &attempt.exam.id, &attempt.learner_id).await?;

        if let Some(existing) =
            attempts::find_active(&mut *tx, &attempt.exam.id, &attempt.learner_id).await?
        {
            tx.commit().await?;
            return Ok(CreateAttempt::Existing(existing));
        }

        let used =
            attempts::count_by_exam_and_learner(&mut *tx, &attempt.exam.id, &attempt.learner_id)
                .await?;
        if used >= i64::from(attempt.exam.max_attempts) {
            tx.commit().await?;
            return Ok(CreateAttempt::LimitReached);
        }

        let inserted = attempts::create(
            &mut *tx,
            attempts::CreateAttempt {
                id: &attempt.id,
                exam: &attempt.exam,
                learner_id: &attempt.learner_id,
                start_time: attempt.start_time,
                end_time: attempt.end_time,
            },
        )
        .await?;

        let outcome = if inserted {
            let created = attempts::find_by_id(&mut *tx, &attempt.id)
                .await?
                .ok_or(sqlx::Error::RowNotFound)?;
            CreateAttempt::Created(created)
        } else {
            // Unique index hit by a writer outside the advisory lock.
            let existing = attempts::find_active(&mut *tx, &attempt.exam.id, &attempt.learner_id)
                .await?
                .ok_or(sqlx::Error::RowNotFound)?;
            CreateAttempt::Existing(existing)
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn find_attempt(&self, attempt_id: &str) -> StoreResult<Option<Attempt>> {
        Ok(attempts::find_by_id(&self.pool, attempt_id).await?)
    }

    async fn find_active_attempt(
        &self,
        exam_id: &str,
        learner_id: &str,
    ) -> StoreResult<Option<Attempt>> {
        Ok(attempts::find_active(&self.pool, exam_id, learner_id).await?)
    }

    async fn count_learner_attempts(&self, exam_id: &str, learner_id: &str) -> StoreResult<i64> {
        Ok(attempts::count_by_exam_and_learner(&self.pool, exam_id, learner_id).await?)
    }

    async fn list_attempts_for_exam(
        &self,
        exam_id: &str,
        status: Option<AttemptStatus>,
        skip: i64,
        limit: i64,
    ) -> StoreResult<Vec<Attempt>> {
        Ok(attempts::list_by_exam(&self.pool, exam_id, status, skip, limit).await?)
    }

    async fn count_attempts_for_exam(
        &self,
        exam_id: &str,
        status: Option<AttemptStatus>,
    ) -> StoreResult<i64> {
        Ok(attempts::count_by_exam(&self.pool, exam_id, status).await?)
    }

    async fn list_in_progress(&self) -> StoreResult<Vec<PendingAttempt>> {
        Ok(attempts::list_in_progress(&self.pool).await?)
    }

    async fn list_due(&self, now: OffsetDateTime, limit: i64) -> StoreResult<Vec<PendingAttempt>> {
        Ok(attempts::list_due(&self.pool, now, limit).await?)
    }

    async fn list_answers(&self, attempt_id: &str) -> StoreResult<Vec<Answer>> {
        Ok(answers::list_by_attempt(&self.pool, attempt_id).await?)
    }

    async fn save_answer(&self, answer: AnswerUpsert) -> StoreResult<Option<AnswerWrite>> {
        let mut tx = self.pool.begin().await?;
        let Some(status) = attempts::find_status_for_share(&mut *tx, &answer.attempt_id).await?
        else {
            return Ok(None);
        };

        if status != AttemptStatus::InProgress {
            return Ok(Some(AnswerWrite::AttemptInactive(status)));
        }

        if let Some(existing) =
            answers::find(&mut *tx, &answer.attempt_id, &answer.question_id).await?
        {
            if answer.matches(&existing) {
                return Ok(Some(AnswerWrite::Unchanged(existing)));
            }
        }

        let saved = answers::upsert_payload(&mut *tx, &answer).await?;
        tx.commit().await?;
        Ok(Some(AnswerWrite::Saved(saved)))
    }

    async fn mark_for_review(
        &self,
        attempt_id: &str,
        question_id: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<AnswerWrite>> {
        let mut tx = self.pool.begin().await?;
        let Some(status) = attempts::find_status_for_share(&mut *tx, attempt_id).await? else {
            return Ok(None);
        };

        if status != AttemptStatus::InProgress {
            return Ok(Some(AnswerWrite::AttemptInactive(status)));
        }

        if let Some(existing) = answers::find(&mut *tx, attempt_id, question_id).await? {
            if existing.status == AnswerStatus::MarkedForReview {
                return Ok(Some(AnswerWrite::Unchanged(existing)));
            }
        }

        let status = AnswerStatus::MarkedForReview;
        let saved = answers::set_status(&mut *tx, attempt_id, question_id, status, now).await?;
        tx.commit().await?;
        Ok(Some(AnswerWrite::Saved(saved)))
    }

    async fn finish_attempt(
        &self,
        attempt_id: &str,
        finish: FinishAttempt,
        grader: AutoGrader,
    ) -> StoreResult<Option<FinishOutcome>> {
        let mut tx = self.pool.begin().await?;
        let Some(attempt) = attempts::find_by_id_for_update(&mut *tx, attempt_id).await? else {
            return Ok(None);
        };

        if attempt.status != AttemptStatus::InProgress {
            tx.commit().await?;
            return Ok(Some(FinishOutcome::AlreadyFinished(attempt)));
        }

        Self::apply_marks(&mut tx, &attempt, grader, finish.now).await?;

        let finished = attempts::finish(
            &mut *tx,
            attempts::FinishParams {
                id: attempt_id,
                cause: finish.cause,
                submitted_at: finish.submitted_at,
                time_spent_seconds: finish.time_spent_seconds,
                now: finish.now,
            },
        )
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;

        tx.commit().await?;
        Ok(Some(FinishOutcome::Finished(finished)))
    }

    async fn apply_auto_marks(
        &self,
        attempt_id: &str,
        grader: AutoGrader,
        now: OffsetDateTime,
    ) -> StoreResult<Option<GuardedWrite>> {
        let mut tx = self.pool.begin().await?;
        let Some(attempt) = attempts::find_by_id_for_update(&mut *tx, attempt_id).await? else {
            return Ok(None);
        };

        if !attempt.status.is_gradable() {
            return Ok(Some(GuardedWrite::Rejected(attempt.status)));
        }

        if !Self::apply_marks(&mut tx, &attempt, grader, now).await? {
            tx.commit().await?;
            return Ok(Some(GuardedWrite::Applied(attempt)));
        }
        let touched = attempts::touch(&mut *tx, attempt_id, now).await?.unwrap_or(attempt);
        tx.commit().await?;
        Ok(Some(GuardedWrite::Applied(touched)))
    }

    async fn record_grades(
        &self,
        attempt_id: &str,
        grades: &[ManualGrade],
        grader_id: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<GuardedWrite>> {
        let mut tx = self.pool.begin().await?;
        let Some(attempt) = attempts::find_by_id_for_update(&mut *tx, attempt_id).await? else {
            return Ok(None);
        };

        if !attempt.status.is_gradable() {
            return Ok(Some(GuardedWrite::Rejected(attempt.status)));
        }

        for grade in grades {
            answers::upsert_grade(&mut *tx, attempt_id, grade, grader_id, now).await?;
        }

        let touched = attempts::touch(&mut *tx, attempt_id, now).await?.unwrap_or(attempt);
        tx.commit().await?;
        Ok(Some(GuardedWrite::Applied(touched)))
    }

    async fn mark_graded(
        &self,
        attempt_id: &str,
        grader_id: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<GuardedWrite>> {
        if let Some(graded) = attempts::mark_graded(&self.pool, attempt_id, grader_id, now).await? {
            return Ok(Some(GuardedWrite::Applied(graded)));
        }

        let status = attempts::find_status(&self.pool, attempt_id).await?;
        Ok(status.map(GuardedWrite::Rejected))
    }

    async fn delete_attempt(&self, attempt_id: &str) -> StoreResult<bool> {
        Ok(attempts::delete(&self.pool, attempt_id).await?)
    }
}
