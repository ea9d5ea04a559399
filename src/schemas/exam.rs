use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use validator::Validate;

use crate::core::time::format_offset;
use crate::db::models::{ExamDefinition, Section, StoredExam};

fn default_max_attempts() -> u32 {
    1
}

/// Catalog feed payload. Deep checks (question ids, options, marks) happen in
/// the exam service; these are the shape checks.
#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ExamImportRequest {
    #[serde(default)]
    pub(crate) title: String,
    #[validate(length(min = 1, message = "sections must not be empty"))]
    pub(crate) sections: Vec<Section>,
    #[serde(alias = "durationMinutes")]
    #[validate(range(min = 1, message = "duration_minutes must be positive"))]
    pub(crate) duration_minutes: i64,
    #[serde(alias = "windowStart", with = "time::serde::rfc3339")]
    pub(crate) window_start: OffsetDateTime,
    #[serde(alias = "windowEnd", with = "time::serde::rfc3339")]
    pub(crate) window_end: OffsetDateTime,
    #[serde(alias = "passingPercentage")]
    #[validate(range(min = 0.0, max = 100.0, message = "passing_percentage must be 0-100"))]
    pub(crate) passing_percentage: f64,
    #[serde(default = "default_max_attempts", alias = "maxAttempts")]
    #[validate(range(min = 1, message = "max_attempts must be positive"))]
    pub(crate) max_attempts: u32,
}

impl ExamImportRequest {
    pub(crate) fn into_definition(self, exam_id: &str) -> ExamDefinition {
        ExamDefinition {
            id: exam_id.to_string(),
            title: self.title,
            sections: self.sections,
            duration_minutes: self.duration_minutes,
            window_start: self.window_start,
            window_end: self.window_end,
            passing_percentage: self.passing_percentage,
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ExamImportResponse {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) question_count: usize,
    pub(crate) total_marks: f64,
    pub(crate) duration_minutes: i64,
    pub(crate) window_start: String,
    pub(crate) window_end: String,
    pub(crate) passing_percentage: f64,
    pub(crate) max_attempts: u32,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl From<StoredExam> for ExamImportResponse {
    fn from(stored: StoredExam) -> Self {
        let exam = stored.definition.0;
        Self {
            question_count: exam.questions().count(),
            total_marks: exam.total_marks(),
            id: stored.id,
            title: exam.title,
            duration_minutes: exam.duration_minutes,
            window_start: format_offset(exam.window_start),
            window_end: format_offset(exam.window_end),
            passing_percentage: exam.passing_percentage,
            max_attempts: exam.max_attempts,
            created_at: format_offset(stored.created_at),
            updated_at: format_offset(stored.updated_at),
        }
    }
}
