use sqlx::types::Json;
use time::OffsetDateTime;

use crate::db::models::{ExamDefinition, StoredExam};

pub(crate) const COLUMNS: &str = "id, definition, created_at, updated_at";

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<StoredExam>, sqlx::Error> {
    sqlx::query_as::<_, StoredExam>(&format!(
        "SELECT {COLUMNS} FROM exam_definitions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// Inserts or replaces the definition. Attempts already started keep their snapshot.
pub(crate) async fn upsert(
    executor: impl sqlx::PgExecutor<'_>,
    exam: &ExamDefinition,
    now: OffsetDateTime,
) -> Result<StoredExam, sqlx::Error> {
    sqlx::query_as::<_, StoredExam>(&format!(
        "INSERT INTO exam_definitions (id, definition, created_at, updated_at)
         VALUES ($1, $2, $3, $3)
         ON CONFLICT (id) DO UPDATE
         SET definition = EXCLUDED.definition,
             updated_at = EXCLUDED.updated_at
         RETURNING {COLUMNS}"
    ))
    .bind(&exam.id)
    .bind(Json(exam))
    .bind(now)
    .fetch_one(executor)
    .await
}
