//! Persistence boundary for exam definitions, attempts and their answers.
//!
//! Every method that changes an attempt or its answers is atomic with respect
//! to the attempt's status: the status check and the write happen under the
//! same lock (row lock in Postgres, the state mutex in memory).

pub(crate) mod memory;
pub(crate) mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::core::config::{Settings, StoreBackend};
use crate::db::models::{Answer, Attempt, ExamDefinition, StoredExam};
use crate::db::types::{AnswerStatus, AttemptStatus, SubmitCause};

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub(crate) type StoreResult<T> = Result<T, StoreError>;

/// Computes objective marks for an attempt's answers against its snapshot.
pub(crate) type AutoGrader = fn(&ExamDefinition, &[Answer]) -> Vec<AutoMark>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AutoMark {
    pub(crate) question_id: String,
    pub(crate) marks: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct NewAttempt {
    pub(crate) id: String,
    pub(crate) exam: ExamDefinition,
    pub(crate) learner_id: String,
    pub(crate) start_time: OffsetDateTime,
    pub(crate) end_time: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub(crate) enum CreateAttempt {
    Created(Attempt),
    /// An in-progress attempt already exists for the (exam, learner) pair.
    Existing(Attempt),
    LimitReached,
}

#[derive(Debug, Clone)]
pub(crate) struct FinishAttempt {
    pub(crate) cause: SubmitCause,
    pub(crate) submitted_at: OffsetDateTime,
    pub(crate) time_spent_seconds: i64,
    pub(crate) now: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub(crate) enum FinishOutcome {
    Finished(Attempt),
    AlreadyFinished(Attempt),
}

#[derive(Debug, Clone)]
pub(crate) struct AnswerUpsert {
    pub(crate) attempt_id: String,
    pub(crate) question_id: String,
    pub(crate) selected_option_id: Option<String>,
    pub(crate) free_text: Option<String>,
    pub(crate) file_reference: Option<String>,
    pub(crate) status: AnswerStatus,
    pub(crate) now: OffsetDateTime,
}

impl AnswerUpsert {
    pub(crate) fn matches(&self, answer: &Answer) -> bool {
        answer.selected_option_id == self.selected_option_id
            && answer.free_text == self.free_text
            && answer.file_reference == self.file_reference
            && answer.status == self.status
    }

    pub(crate) fn into_answer(self) -> Answer {
        Answer {
            attempt_id: self.attempt_id,
            question_id: self.question_id,
            selected_option_id: self.selected_option_id,
            free_text: self.free_text,
            file_reference: self.file_reference,
            status: self.status,
            marks: None,
            feedback: None,
            graded_by: None,
            created_at: self.now,
            updated_at: self.now,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum AnswerWrite {
    Saved(Answer),
    /// Stored record already equals the requested state; nothing was written.
    Unchanged(Answer),
    AttemptInactive(AttemptStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ManualGrade {
    pub(crate) question_id: String,
    pub(crate) marks: f64,
    pub(crate) feedback: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) enum GuardedWrite {
    Applied(Attempt),
    Rejected(AttemptStatus),
}

#[async_trait]
pub(crate) trait AttemptStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    async fn upsert_exam(
        &self,
        exam: &ExamDefinition,
        now: OffsetDateTime,
    ) -> StoreResult<StoredExam>;

    async fn find_exam(&self, exam_id: &str) -> StoreResult<Option<ExamDefinition>>;

    async fn create_attempt(&self, attempt: NewAttempt) -> StoreResult<CreateAttempt>;

    async fn find_attempt(&self, attempt_id: &str) -> StoreResult<Option<Attempt>>;

    async fn find_active_attempt(
        &self,
        exam_id: &str,
        learner_id: &str,
    ) -> StoreResult<Option<Attempt>>;

    async fn count_learner_attempts(&self, exam_id: &str, learner_id: &str) -> StoreResult<i64>;

    async fn list_attempts_for_exam(
        &self,
        exam_id: &str,
        status: Option<AttemptStatus>,
        skip: i64,
        limit: i64,
    ) -> StoreResult<Vec<Attempt>>;

    async fn count_attempts_for_exam(
        &self,
        exam_id: &str,
        status: Option<AttemptStatus>,
    ) -> StoreResult<i64>;

    /// Every in-progress attempt with its fixed deadline, earliest first.
    async fn list_in_progress(&self) -> StoreResult<Vec<PendingAttempt>>;

    /// In-progress attempts whose deadline is at or before `now`.
    async fn list_due(&self, now: OffsetDateTime, limit: i64) -> StoreResult<Vec<PendingAttempt>>;

    async fn list_answers(&self, attempt_id: &str) -> StoreResult<Vec<Answer>>;

    /// `None` when the attempt does not exist.
    async fn save_answer(&self, answer: AnswerUpsert) -> StoreResult<Option<AnswerWrite>>;

    async fn mark_for_review(
        &self,
        attempt_id: &str,
        question_id: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<AnswerWrite>>;

    /// Moves an in-progress attempt to its terminal status and auto-grades it in
    /// one step. `None` when the attempt does not exist.
    async fn finish_attempt(
        &self,
        attempt_id: &str,
        finish: FinishAttempt,
        grader: AutoGrader,
    ) -> StoreResult<Option<FinishOutcome>>;

    /// Re-runs objective marking on a submitted or timed-out attempt.
    async fn apply_auto_marks(
        &self,
        attempt_id: &str,
        grader: AutoGrader,
        now: OffsetDateTime,
    ) -> StoreResult<Option<GuardedWrite>>;

    async fn record_grades(
        &self,
        attempt_id: &str,
        grades: &[ManualGrade],
        grader_id: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<GuardedWrite>>;

    /// Compare-and-set from submitted/timed out to graded.
    async fn mark_graded(
        &self,
        attempt_id: &str,
        grader_id: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<GuardedWrite>>;

    async fn delete_attempt(&self, attempt_id: &str) -> StoreResult<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub(crate) struct PendingAttempt {
    pub(crate) id: String,
    pub(crate) end_time: OffsetDateTime,
}

pub(crate) async fn connect(settings: &Settings) -> anyhow::Result<Arc<dyn AttemptStore>> {
    match settings.store().backend {
        StoreBackend::Postgres => {
            let pool = crate::db::init_pool(settings).await?;
            crate::db::run_migrations(&pool, &settings.database().migrations_dir).await?;
            tracing::info!(backend = StoreBackend::Postgres.as_str(), "Attempt store ready");
            Ok(Arc::new(postgres::PgAttemptStore::new(pool)))
        }
        StoreBackend::Memory => {
            tracing::warn!(
                backend = StoreBackend::Memory.as_str(),
                "Attempt store is in-memory; attempts are lost on restart"
            );
            Ok(Arc::new(memory::MemoryAttemptStore::default()))
        }
    }
}
