use time::OffsetDateTime;

use crate::db::models::Answer;
use crate::db::types::AnswerStatus;
use crate::store::{AnswerUpsert, ManualGrade};

pub(crate) const COLUMNS: &str = "\
    attempt_id, question_id, selected_option_id, free_text, file_reference, \
    status, marks, feedback, graded_by, created_at, updated_at";

pub(crate) async fn list_by_attempt(
    executor: impl sqlx::PgExecutor<'_>,
    attempt_id: &str,
) -> Result<Vec<Answer>, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!(
        "SELECT {COLUMNS} FROM attempt_answers \
         WHERE attempt_id = $1 ORDER BY created_at, question_id"
    ))
    .bind(attempt_id)
    .fetch_all(executor)
    .await
}

pub(crate) async fn find(
    executor: impl sqlx::PgExecutor<'_>,
    attempt_id: &str,
    question_id: &str,
) -> Result<Option<Answer>, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!(
        "SELECT {COLUMNS} FROM attempt_answers WHERE attempt_id = $1 AND question_id = $2"
    ))
    .bind(attempt_id)
    .bind(question_id)
    .fetch_optional(executor)
    .await
}

/// Last write wins per question; marks and feedback are left untouched.
pub(crate) async fn upsert_payload(
    executor: impl sqlx::PgExecutor<'_>,
    answer: &AnswerUpsert,
) -> Result<Answer, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!(
        "INSERT INTO attempt_answers (
            attempt_id, question_id, selected_option_id, free_text, file_reference,
            status, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$7)
        ON CONFLICT (attempt_id, question_id) DO UPDATE
        SET selected_option_id = EXCLUDED.selected_option_id,
            free_text = EXCLUDED.free_text,
            file_reference = EXCLUDED.file_reference,
            status = EXCLUDED.status,
            updated_at = EXCLUDED.updated_at
        RETURNING {COLUMNS}"
    ))
    .bind(&answer.attempt_id)
    .bind(&answer.question_id)
    .bind(&answer.selected_option_id)
    .bind(&answer.free_text)
    .bind(&answer.file_reference)
    .bind(answer.status)
    .bind(answer.now)
    .fetch_one(executor)
    .await
}

pub(crate) async fn set_status(
    executor: impl sqlx::PgExecutor<'_>,
    attempt_id: &str,
    question_id: &str,
    status: AnswerStatus,
    now: OffsetDateTime,
) -> Result<Answer, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!(
        "INSERT INTO attempt_answers (attempt_id, question_id, status, created_at, updated_at)
         VALUES ($1,$2,$3,$4,$4)
         ON CONFLICT (attempt_id, question_id) DO UPDATE
         SET status = EXCLUDED.status,
             updated_at = EXCLUDED.updated_at
         RETURNING {COLUMNS}"
    ))
    .bind(attempt_id)
    .bind(question_id)
    .bind(status)
    .bind(now)
    .fetch_one(executor)
    .await
}

/// Objective marks only touch answers that exist; unanswered questions stay absent.
pub(crate) async fn set_auto_marks(
    executor: impl sqlx::PgExecutor<'_>,
    attempt_id: &str,
    question_id: &str,
    marks: f64,
    now: OffsetDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE attempt_answers SET marks = $1, updated_at = $2
         WHERE attempt_id = $3 AND question_id = $4 AND graded_by IS NULL",
    )
    .bind(marks)
    .bind(now)
    .bind(attempt_id)
    .bind(question_id)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn upsert_grade(
    executor: impl sqlx::PgExecutor<'_>,
    attempt_id: &str,
    grade: &ManualGrade,
    grader_id: &str,
    now: OffsetDateTime,
) -> Result<Answer, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!(
        "INSERT INTO attempt_answers (
            attempt_id, question_id, status, marks, feedback, graded_by, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$7)
        ON CONFLICT (attempt_id, question_id) DO UPDATE
        SET marks = EXCLUDED.marks,
            feedback = EXCLUDED.feedback,
            graded_by = EXCLUDED.graded_by,
            updated_at = EXCLUDED.updated_at
        RETURNING {COLUMNS}"
    ))
    .bind(attempt_id)
    .bind(&grade.question_id)
    .bind(AnswerStatus::NotAnswered)
    .bind(grade.marks)
    .bind(&grade.feedback)
    .bind(grader_id)
    .bind(now)
    .fetch_one(executor)
    .await
}
