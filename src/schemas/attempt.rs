use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use validator::Validate;

use crate::core::clock;
use crate::core::time::format_offset;
use crate::db::models::{Answer, Attempt, ExamDefinition, Question};
use crate::db::types::{AnswerStatus, AttemptStatus, QuestionType, SubmitCause};
use crate::services::answers::AnswerPayload;
use crate::services::attempts::AttemptView;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SaveAnswerRequest {
    pub(crate) answer: AnswerPayload,
    /// Client countdown, used only to log drift.
    #[serde(default, alias = "clientRemainingSeconds")]
    #[validate(range(min = 0, message = "client_remaining_seconds must be non-negative"))]
    pub(crate) client_remaining_seconds: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PaperOption {
    pub(crate) id: String,
    pub(crate) text: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct PaperQuestion {
    pub(crate) id: String,
    #[serde(rename = "type")]
    pub(crate) kind: QuestionType,
    pub(crate) marks: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) prompt: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) options: Vec<PaperOption>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PaperSection {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) questions: Vec<PaperQuestion>,
}

/// The exam as a learner sees it: no correctness flags.
#[derive(Debug, Serialize)]
pub(crate) struct ExamPaper {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) duration_minutes: i64,
    pub(crate) passing_percentage: f64,
    pub(crate) total_marks: f64,
    pub(crate) sections: Vec<PaperSection>,
}

impl From<&Question> for PaperQuestion {
    fn from(question: &Question) -> Self {
        Self {
            id: question.id.clone(),
            kind: question.kind,
            marks: question.marks,
            prompt: question.prompt.clone(),
            options: question
                .options
                .iter()
                .map(|option| PaperOption { id: option.id.clone(), text: option.text.clone() })
                .collect(),
        }
    }
}

impl From<&ExamDefinition> for ExamPaper {
    fn from(exam: &ExamDefinition) -> Self {
        Self {
            id: exam.id.clone(),
            title: exam.title.clone(),
            duration_minutes: exam.duration_minutes,
            passing_percentage: exam.passing_percentage,
            total_marks: exam.total_marks(),
            sections: exam
                .sections
                .iter()
                .map(|section| PaperSection {
                    id: section.id.clone(),
                    title: section.title.clone(),
                    questions: section.questions.iter().map(PaperQuestion::from).collect(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerResponse {
    pub(crate) question_id: String,
    pub(crate) status: AnswerStatus,
    pub(crate) selected_option_id: Option<String>,
    pub(crate) free_text: Option<String>,
    pub(crate) file_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) marks: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) feedback: Option<String>,
    pub(crate) updated_at: String,
}

impl AnswerResponse {
    /// `with_marks` is false for learners until the attempt is graded.
    pub(crate) fn from_answer(answer: Answer, with_marks: bool) -> Self {
        Self {
            question_id: answer.question_id,
            status: answer.status,
            selected_option_id: answer.selected_option_id,
            free_text: answer.free_text,
            file_reference: answer.file_reference,
            marks: answer.marks.filter(|_| with_marks),
            feedback: answer.feedback.filter(|_| with_marks),
            updated_at: format_offset(answer.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptSummaryResponse {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) learner_id: String,
    pub(crate) status: AttemptStatus,
    pub(crate) submit_cause: Option<SubmitCause>,
    pub(crate) start_time: String,
    pub(crate) end_time: String,
    pub(crate) submitted_at: Option<String>,
    pub(crate) time_spent_seconds: Option<i64>,
    pub(crate) graded_at: Option<String>,
    pub(crate) graded_by: Option<String>,
}

impl From<&Attempt> for AttemptSummaryResponse {
    fn from(attempt: &Attempt) -> Self {
        Self {
            id: attempt.id.clone(),
            exam_id: attempt.exam_id.clone(),
            learner_id: attempt.learner_id.clone(),
            status: attempt.status,
            submit_cause: attempt.submit_cause,
            start_time: format_offset(attempt.start_time),
            end_time: format_offset(attempt.end_time),
            submitted_at: attempt.submitted_at.map(format_offset),
            time_spent_seconds: attempt.time_spent_seconds,
            graded_at: attempt.graded_at.map(format_offset),
            graded_by: attempt.graded_by.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptResponse {
    #[serde(flatten)]
    pub(crate) attempt: AttemptSummaryResponse,
    pub(crate) server_time: String,
    pub(crate) remaining_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) resumed: Option<bool>,
    pub(crate) paper: ExamPaper,
    pub(crate) answers: Vec<AnswerResponse>,
}

impl AttemptResponse {
    pub(crate) fn from_view(view: AttemptView, with_marks: bool) -> Self {
        let remaining_seconds = if view.attempt.status == AttemptStatus::InProgress {
            clock::remaining_seconds(view.now, view.attempt.end_time)
        } else {
            0
        };
        let with_marks = with_marks || view.attempt.status == AttemptStatus::Graded;

        Self {
            attempt: AttemptSummaryResponse::from(&view.attempt),
            server_time: format_offset(view.now),
            remaining_seconds,
            resumed: None,
            paper: ExamPaper::from(view.attempt.exam()),
            answers: view
                .answers
                .into_iter()
                .map(|answer| AnswerResponse::from_answer(answer, with_marks))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SavedAnswerResponse {
    pub(crate) answer: AnswerResponse,
    /// False when the stored answer already matched and nothing was written.
    pub(crate) changed: bool,
    pub(crate) server_time: String,
    pub(crate) remaining_seconds: i64,
}

impl SavedAnswerResponse {
    pub(crate) fn new(
        answer: Answer,
        changed: bool,
        now: OffsetDateTime,
        remaining_seconds: i64,
    ) -> Self {
        Self {
            answer: AnswerResponse::from_answer(answer, false),
            changed,
            server_time: format_offset(now),
            remaining_seconds,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmitResponse {
    #[serde(flatten)]
    pub(crate) attempt: AttemptSummaryResponse,
    /// True when the attempt was already finished before this call.
    pub(crate) already_submitted: bool,
}
