use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentGrader;
use crate::core::state::AppState;
use crate::schemas::grading::{GradeSummaryResponse, ManualGradeRequest};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:attempt_id/auto-grade", post(auto_grade))
        .route("/:attempt_id/grades", post(record_grades))
        .route("/:attempt_id/finalize", post(finalize))
}

async fn auto_grade(
    Path(attempt_id): Path<String>,
    CurrentGrader(_grader): CurrentGrader,
    State(state): State<AppState>,
) -> Result<Json<GradeSummaryResponse>, ApiError> {
    let report = state.grading().auto_grade(&attempt_id).await?;
    Ok(Json(GradeSummaryResponse::from(report)))
}

async fn record_grades(
    Path(attempt_id): Path<String>,
    CurrentGrader(grader): CurrentGrader,
    State(state): State<AppState>,
    Json(payload): Json<ManualGradeRequest>,
) -> Result<Json<GradeSummaryResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let report = state
        .grading()
        .record_manual_grade(&attempt_id, &grader.id, payload.into_grades())
        .await?;
    Ok(Json(GradeSummaryResponse::from(report)))
}

async fn finalize(
    Path(attempt_id): Path<String>,
    CurrentGrader(grader): CurrentGrader,
    State(state): State<AppState>,
) -> Result<Json<GradeSummaryResponse>, ApiError> {
    let report = state.grading().finalize(&attempt_id, &grader.id).await?;
    Ok(Json(GradeSummaryResponse::from(report)))
}
