use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::errors::EngineError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unmarked_questions: Option<Vec<String>>,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(&'static str),
    Forbidden(&'static str),
    BadRequest(String),
    /// A domain rule rejected the call; `code` is stable for clients.
    Domain {
        status: StatusCode,
        code: &'static str,
        detail: String,
        unmarked_questions: Option<Vec<String>>,
    },
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }

    fn domain(status: StatusCode, code: &'static str, err: &EngineError) -> Self {
        Self::Domain { status, code, detail: err.to_string(), unmarked_questions: None }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match &err {
            EngineError::ExamNotFound(_) => {
                Self::domain(StatusCode::NOT_FOUND, "exam_not_found", &err)
            }
            EngineError::AttemptNotFound(_) => {
                Self::domain(StatusCode::NOT_FOUND, "attempt_not_found", &err)
            }
            EngineError::ExamNotActive => {
                Self::domain(StatusCode::CONFLICT, "exam_not_active", &err)
            }
            EngineError::AlreadyAttempted => {
                Self::domain(StatusCode::CONFLICT, "already_attempted", &err)
            }
            EngineError::AttemptNotActive(_) => {
                Self::domain(StatusCode::CONFLICT, "attempt_not_active", &err)
            }
            EngineError::AttemptNotGradable(_) => {
                Self::domain(StatusCode::CONFLICT, "attempt_not_gradable", &err)
            }
            EngineError::IncompleteGrading { question_ids } => Self::Domain {
                status: StatusCode::CONFLICT,
                code: "incomplete_grading",
                detail: err.to_string(),
                unmarked_questions: Some(question_ids.clone()),
            },
            EngineError::NotAttemptOwner => {
                Self::domain(StatusCode::FORBIDDEN, "not_attempt_owner", &err)
            }
            EngineError::MarksOutOfRange { .. } => {
                Self::domain(StatusCode::BAD_REQUEST, "marks_out_of_range", &err)
            }
            EngineError::InvalidQuestion(_) => {
                Self::domain(StatusCode::BAD_REQUEST, "invalid_question", &err)
            }
            EngineError::InvalidAnswer(_) => {
                Self::domain(StatusCode::BAD_REQUEST, "invalid_answer", &err)
            }
            EngineError::InvalidGrade(_) => {
                Self::domain(StatusCode::BAD_REQUEST, "invalid_grade", &err)
            }
            EngineError::InvalidExam(_) => {
                Self::domain(StatusCode::BAD_REQUEST, "invalid_exam", &err)
            }
            EngineError::Storage(source) => Self::internal(source, "Attempt store failure"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(message) => {
                let mut response = plain(StatusCode::UNAUTHORIZED, message.to_string());
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                response
            }
            ApiError::Forbidden(message) => plain(StatusCode::FORBIDDEN, message.to_string()),
            ApiError::BadRequest(message) => plain(StatusCode::BAD_REQUEST, message),
            ApiError::Domain { status, code, detail, unmarked_questions } => (
                status,
                Json(ErrorResponse {
                    status: status.as_u16(),
                    detail,
                    code: Some(code),
                    unmarked_questions,
                }),
            )
                .into_response(),
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                plain(StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        }
    }
}

fn plain(status: StatusCode, detail: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            status: status.as_u16(),
            detail,
            code: None,
            unmarked_questions: None,
        }),
    )
        .into_response()
}
