use thiserror::Error;

use crate::db::types::AttemptStatus;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub(crate) enum EngineError {
    #[error("exam {0} not found")]
    ExamNotFound(String),
    #[error("attempt {0} not found")]
    AttemptNotFound(String),
    #[error("exam is outside its availability window")]
    ExamNotActive,
    #[error("no attempts left for this exam")]
    AlreadyAttempted,
    #[error("attempt belongs to another learner")]
    NotAttemptOwner,
    #[error("attempt is {}, not in progress", .0.as_str())]
    AttemptNotActive(AttemptStatus),
    #[error("attempt is {}, not open for grading", .0.as_str())]
    AttemptNotGradable(AttemptStatus),
    #[error("marks {marks} for question {question_id} must be between 0 and {max}")]
    MarksOutOfRange { question_id: String, marks: f64, max: f64 },
    #[error("question {0} is not part of this exam")]
    InvalidQuestion(String),
    #[error("invalid answer: {0}")]
    InvalidAnswer(String),
    #[error("invalid grade request: {0}")]
    InvalidGrade(String),
    #[error("invalid exam definition: {0}")]
    InvalidExam(String),
    #[error("{} answered question(s) still need marks", .question_ids.len())]
    IncompleteGrading { question_ids: Vec<String> },
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(StoreError::Database(err))
    }
}
