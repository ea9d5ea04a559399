use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{post, put},
    Json, Router,
};
use serde::Deserialize;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::{CurrentAdmin, CurrentGrader, CurrentStudent};
use crate::api::pagination::{page_bounds, PaginatedResponse};
use crate::core::state::AppState;
use crate::db::types::AttemptStatus;
use crate::schemas::attempt::{AttemptResponse, AttemptSummaryResponse};
use crate::schemas::exam::{ExamImportRequest, ExamImportResponse};
use crate::services::attempts::AttemptFilter;
use crate::services::exams;

#[derive(Debug, Deserialize)]
pub(crate) struct ListAttemptsQuery {
    #[serde(default)]
    status: Option<AttemptStatus>,
    #[serde(default)]
    skip: Option<i64>,
    #[serde(default)]
    limit: Option<i64>,
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:exam_id", put(import_exam))
        .route("/:exam_id/attempts", post(start_attempt).get(list_attempts))
}

async fn import_exam(
    Path(exam_id): Path<String>,
    CurrentAdmin(admin): CurrentAdmin,
    State(state): State<AppState>,
    Json(payload): Json<ExamImportRequest>,
) -> Result<Json<ExamImportResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let now = state.attempts().now();
    let stored =
        exams::import_exam(state.store(), &exam_id, payload.into_definition(&exam_id), now)
            .await?;

    tracing::info!(exam_id = %exam_id, admin_id = %admin.id, "Exam definition stored");
    Ok(Json(ExamImportResponse::from(stored)))
}

async fn start_attempt(
    Path(exam_id): Path<String>,
    CurrentStudent(student): CurrentStudent,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<AttemptResponse>), ApiError> {
    let outcome = state.attempts().start(&student.id, &exam_id).await?;
    let status = if outcome.resumed { StatusCode::OK } else { StatusCode::CREATED };

    let mut response = AttemptResponse::from_view(outcome.view, false);
    response.resumed = Some(outcome.resumed);
    Ok((status, Json(response)))
}

async fn list_attempts(
    Path(exam_id): Path<String>,
    Query(params): Query<ListAttemptsQuery>,
    CurrentGrader(_grader): CurrentGrader,
    State(state): State<AppState>,
) -> Result<Json<PaginatedResponse<AttemptSummaryResponse>>, ApiError> {
    let (skip, limit) =
        page_bounds(params.skip, params.limit, state.settings().api().default_list_limit);

    let filter = AttemptFilter { status: params.status, skip, limit };
    let (attempts, total_count) = state.attempts().list_for_exam(&exam_id, filter).await?;

    let items = attempts.iter().map(AttemptSummaryResponse::from).collect();
    Ok(Json(PaginatedResponse { items, total_count, skip, limit }))
}
