use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "attemptstatus", rename_all = "snake_case")]
pub(crate) enum AttemptStatus {
    InProgress,
    Submitted,
    TimedOut,
    Graded,
}

impl AttemptStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Submitted => "submitted",
            Self::TimedOut => "timed_out",
            Self::Graded => "graded",
        }
    }

    /// Submitted or timed out: marks may still change.
    pub(crate) fn is_gradable(self) -> bool {
        matches!(self, Self::Submitted | Self::TimedOut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "submitcause", rename_all = "snake_case")]
pub(crate) enum SubmitCause {
    Learner,
    Timeout,
}

impl SubmitCause {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Learner => "learner",
            Self::Timeout => "timeout",
        }
    }

    pub(crate) fn terminal_status(self) -> AttemptStatus {
        match self {
            Self::Learner => AttemptStatus::Submitted,
            Self::Timeout => AttemptStatus::TimedOut,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "answerstatus", rename_all = "snake_case")]
pub(crate) enum AnswerStatus {
    NotAnswered,
    Answered,
    MarkedForReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum QuestionType {
    MultipleChoice,
    Subjective,
    FileUpload,
}

impl QuestionType {
    pub(crate) fn is_auto_gradable(self) -> bool {
        matches!(self, Self::MultipleChoice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum UserRole {
    Student,
    Teacher,
    Admin,
}

impl UserRole {
    pub(crate) fn is_grader(self) -> bool {
        matches!(self, Self::Teacher | Self::Admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_maps_to_terminal_status() {
        assert_eq!(SubmitCause::Learner.terminal_status(), AttemptStatus::Submitted);
        assert_eq!(SubmitCause::Timeout.terminal_status(), AttemptStatus::TimedOut);
    }

    #[test]
    fn only_submitted_and_timed_out_are_gradable() {
        assert!(!AttemptStatus::InProgress.is_gradable());
        assert!(AttemptStatus::Submitted.is_gradable());
        assert!(AttemptStatus::TimedOut.is_gradable());
        assert!(!AttemptStatus::Graded.is_gradable());
    }

    #[test]
    fn statuses_serialize_snake_case() {
        assert_eq!(serde_json::to_value(AttemptStatus::TimedOut).unwrap(), "timed_out");
        let status = serde_json::to_value(AnswerStatus::MarkedForReview).unwrap();
        assert_eq!(status, "marked_for_review");
        let kind: QuestionType = serde_json::from_value("file_upload".into()).unwrap();
        assert_eq!(kind, QuestionType::FileUpload);
    }
}
