use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::{AuthUser, CurrentAdmin, CurrentStudent, CurrentUser};
use crate::core::state::AppState;
use crate::schemas::attempt::{
    AttemptResponse, AttemptSummaryResponse, SaveAnswerRequest, SavedAnswerResponse,
    SubmitResponse,
};
use crate::schemas::grading::GradeSummaryResponse;
use crate::services::attempts::Viewer;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:attempt_id", get(get_attempt).delete(delete_attempt))
        .route("/:attempt_id/answers/:question_id", put(save_answer))
        .route("/:attempt_id/answers/:question_id/review", post(mark_for_review))
        .route("/:attempt_id/submit", post(submit_attempt))
        .route("/:attempt_id/summary", get(grade_summary))
}

fn viewer(user: &AuthUser) -> Viewer<'_> {
    if user.role.is_grader() {
        Viewer::Grader
    } else {
        Viewer::Learner(&user.id)
    }
}

async fn get_attempt(
    Path(attempt_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<AttemptResponse>, ApiError> {
    let viewer = viewer(&user);
    let view = state.attempts().get(&attempt_id, viewer).await?;
    Ok(Json(AttemptResponse::from_view(view, matches!(viewer, Viewer::Grader))))
}

async fn save_answer(
    Path((attempt_id, question_id)): Path<(String, String)>,
    CurrentStudent(student): CurrentStudent,
    State(state): State<AppState>,
    Json(payload): Json<SaveAnswerRequest>,
) -> Result<Json<SavedAnswerResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let saved = state
        .attempts()
        .save_answer(
            &attempt_id,
            &student.id,
            &question_id,
            payload.answer,
            payload.client_remaining_seconds,
        )
        .await?;

    let now = state.attempts().now();
    Ok(Json(SavedAnswerResponse::new(saved.answer, saved.changed, now, saved.remaining_seconds)))
}

async fn mark_for_review(
    Path((attempt_id, question_id)): Path<(String, String)>,
    CurrentStudent(student): CurrentStudent,
    State(state): State<AppState>,
) -> Result<Json<SavedAnswerResponse>, ApiError> {
    let saved =
        state.attempts().mark_for_review(&attempt_id, &student.id, &question_id).await?;

    let now = state.attempts().now();
    Ok(Json(SavedAnswerResponse::new(saved.answer, saved.changed, now, saved.remaining_seconds)))
}

async fn submit_attempt(
    Path(attempt_id): Path<String>,
    CurrentStudent(student): CurrentStudent,
    State(state): State<AppState>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let outcome = state.attempts().submit(&attempt_id, &student.id).await?;

    Ok(Json(SubmitResponse {
        attempt: AttemptSummaryResponse::from(&outcome.attempt),
        already_submitted: !outcome.applied,
    }))
}

async fn grade_summary(
    Path(attempt_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<GradeSummaryResponse>, ApiError> {
    let report = state.grading().summary(&attempt_id, viewer(&user)).await?;
    Ok(Json(GradeSummaryResponse::from(report)))
}

async fn delete_attempt(
    Path(attempt_id): Path<String>,
    CurrentAdmin(admin): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state.attempts().delete(&attempt_id).await?;
    tracing::info!(attempt_id = %attempt_id, admin_id = %admin.id, "Attempt removed by admin");
    Ok(StatusCode::NO_CONTENT)
}
