use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::db::models::{Attempt, ExamDefinition};
use crate::db::types::{AttemptStatus, SubmitCause};
use crate::store::PendingAttempt;

pub(crate) const COLUMNS: &str = "\
    id, exam_id, learner_id, exam_snapshot, status, submit_cause, \
    start_time, end_time, submitted_at, time_spent_seconds, \
    graded_at, graded_by, created_at, updated_at";

pub(crate) struct CreateAttempt<'a> {
    pub(crate) id: &'a str,
    pub(crate) exam: &'a ExamDefinition,
    pub(crate) learner_id: &'a str,
    pub(crate) start_time: OffsetDateTime,
    pub(crate) end_time: OffsetDateTime,
}

pub(crate) struct FinishParams<'a> {
    pub(crate) id: &'a str,
    pub(crate) cause: SubmitCause,
    pub(crate) submitted_at: OffsetDateTime,
    pub(crate) time_spent_seconds: i64,
    pub(crate) now: OffsetDateTime,
}

/// Serialises `start` for one (exam, learner) pair until the transaction ends.
pub(crate) async fn lock_exam_learner(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    learner_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), hashtext($2))")
        .bind(exam_id)
        .bind(learner_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!("SELECT {COLUMNS} FROM exam_attempts WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub(crate) async fn find_by_id_for_update(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM exam_attempts WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// Status under a shared row lock: answer writes run concurrently with each
/// other but never alongside a status transition.
pub(crate) async fn find_status_for_share(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<AttemptStatus>, sqlx::Error> {
    sqlx::query_scalar("SELECT status FROM exam_attempts WHERE id = $1 FOR SHARE")
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub(crate) async fn find_status(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<AttemptStatus>, sqlx::Error> {
    sqlx::query_scalar("SELECT status FROM exam_attempts WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub(crate) async fn find_active(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    learner_id: &str,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM exam_attempts \
         WHERE exam_id = $1 AND learner_id = $2 AND status = $3"
    ))
    .bind(exam_id)
    .bind(learner_id)
    .bind(AttemptStatus::InProgress)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn count_by_exam_and_learner(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    learner_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM exam_attempts WHERE exam_id = $1 AND learner_id = $2")
        .bind(exam_id)
        .bind(learner_id)
        .fetch_one(executor)
        .await
}

pub(crate) async fn create(
    executor: impl sqlx::PgExecutor<'_>,
    attempt: CreateAttempt<'_>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO exam_attempts (
            id, exam_id, learner_id, exam_snapshot, status,
            start_time, end_time, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$6,$6)
        ON CONFLICT DO NOTHING",
    )
    .bind(attempt.id)
    .bind(&attempt.exam.id)
    .bind(attempt.learner_id)
    .bind(Json(attempt.exam))
    .bind(AttemptStatus::InProgress)
    .bind(attempt.start_time)
    .bind(attempt.end_time)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn list_by_exam(
    pool: &PgPool,
    exam_id: &str,
    status: Option<AttemptStatus>,
    skip: i64,
    limit: i64,
) -> Result<Vec<Attempt>, sqlx::Error> {
    let mut builder = QueryBuilder::<Postgres>::new(format!(
        "SELECT {COLUMNS} FROM exam_attempts WHERE exam_id = "
    ));
    builder.push_bind(exam_id);

    if let Some(status) = status {
        builder.push(" AND status = ");
        builder.push_bind(status);
    }

    builder.push(" ORDER BY created_at, id OFFSET ");
    builder.push_bind(skip.max(0));
    builder.push(" LIMIT ");
    builder.push_bind(limit.clamp(1, 1000));

    builder.build_query_as::<Attempt>().fetch_all(pool).await
}

pub(crate) async fn count_by_exam(
    pool: &PgPool,
    exam_id: &str,
    status: Option<AttemptStatus>,
) -> Result<i64, sqlx::Error> {
    let mut builder =
        QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM exam_attempts WHERE exam_id = ");
    builder.push_bind(exam_id);

    if let Some(status) = status {
        builder.push(" AND status = ");
        builder.push_bind(status);
    }

    builder.build_query_scalar::<i64>().fetch_one(pool).await
}

pub(crate) async fn list_in_progress(
    executor: impl sqlx::PgExecutor<'_>,
) -> Result<Vec<PendingAttempt>, sqlx::Error> {
    sqlx::query_as::<_, PendingAttempt>(
        "SELECT id, end_time FROM exam_attempts WHERE status = $1 ORDER BY end_time, id",
    )
    .bind(AttemptStatus::InProgress)
    .fetch_all(executor)
    .await
}

pub(crate) async fn list_due(
    executor: impl sqlx::PgExecutor<'_>,
    now: OffsetDateTime,
    limit: i64,
) -> Result<Vec<PendingAttempt>, sqlx::Error> {
    sqlx::query_as::<_, PendingAttempt>(
        "SELECT id, end_time FROM exam_attempts
         WHERE status = $1 AND end_time <= $2
         ORDER BY end_time, id
         LIMIT $3",
    )
    .bind(AttemptStatus::InProgress)
    .bind(now)
    .bind(limit.max(1))
    .fetch_all(executor)
    .await
}

/// Compare-and-set `in_progress` to the cause's terminal status.
pub(crate) async fn finish(
    executor: impl sqlx::PgExecutor<'_>,
    params: FinishParams<'_>,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "UPDATE exam_attempts
         SET status = $1,
             submit_cause = $2,
             submitted_at = $3,
             time_spent_seconds = $4,
             updated_at = $5
         WHERE id = $6 AND status = $7
         RETURNING {COLUMNS}"
    ))
    .bind(params.cause.terminal_status())
    .bind(params.cause)
    .bind(params.submitted_at)
    .bind(params.time_spent_seconds)
    .bind(params.now)
    .bind(params.id)
    .bind(AttemptStatus::InProgress)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn touch(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    now: OffsetDateTime,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "UPDATE exam_attempts SET updated_at = $1 WHERE id = $2 RETURNING {COLUMNS}"
    ))
    .bind(now)
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// Compare-and-set `submitted`/`timed_out` to `graded`.
pub(crate) async fn mark_graded(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    grader_id: &str,
    now: OffsetDateTime,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "UPDATE exam_attempts
         SET status = $1, graded_at = $2, graded_by = $3, updated_at = $2
         WHERE id = $4 AND status IN ($5, $6)
         RETURNING {COLUMNS}"
    ))
    .bind(AttemptStatus::Graded)
    .bind(now)
    .bind(grader_id)
    .bind(id)
    .bind(AttemptStatus::Submitted)
    .bind(AttemptStatus::TimedOut)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn delete(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<bool, sqlx::Error> {
    let result =
        sqlx::query("DELETE FROM exam_attempts WHERE id = $1").bind(id).execute(executor).await?;
    Ok(result.rows_affected() > 0)
}
