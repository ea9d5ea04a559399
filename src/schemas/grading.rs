use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_offset;
use crate::db::types::{AttemptStatus, QuestionType};
use crate::services::grading::GradeReport;
use crate::store::ManualGrade;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub(crate) struct GradeEntry {
    #[serde(alias = "questionId")]
    #[validate(length(min = 1, message = "question_id must not be empty"))]
    pub(crate) question_id: String,
    pub(crate) marks: f64,
    #[serde(default)]
    #[validate(length(max = 10000, message = "feedback is too long"))]
    pub(crate) feedback: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ManualGradeRequest {
    #[validate(length(min = 1, message = "grades must not be empty"))]
    #[validate(nested)]
    pub(crate) grades: Vec<GradeEntry>,
}

impl ManualGradeRequest {
    pub(crate) fn into_grades(self) -> Vec<ManualGrade> {
        self.grades
            .into_iter()
            .map(|entry| ManualGrade {
                question_id: entry.question_id,
                marks: entry.marks,
                feedback: entry.feedback,
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct QuestionGrade {
    pub(crate) question_id: String,
    #[serde(rename = "type")]
    pub(crate) kind: QuestionType,
    pub(crate) max_marks: f64,
    pub(crate) answered: bool,
    pub(crate) marks: Option<f64>,
    pub(crate) feedback: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct GradeSummaryResponse {
    pub(crate) attempt_id: String,
    pub(crate) exam_id: String,
    pub(crate) learner_id: String,
    pub(crate) status: AttemptStatus,
    /// False while marks may still change.
    #[serde(rename = "final")]
    pub(crate) is_final: bool,
    pub(crate) total: f64,
    pub(crate) max: f64,
    pub(crate) percentage: f64,
    pub(crate) passed: bool,
    pub(crate) passing_percentage: f64,
    pub(crate) unmarked_questions: Vec<String>,
    pub(crate) graded_at: Option<String>,
    pub(crate) graded_by: Option<String>,
    pub(crate) questions: Vec<QuestionGrade>,
}

impl From<GradeReport> for GradeSummaryResponse {
    fn from(report: GradeReport) -> Self {
        let is_final = report.is_final();
        let exam = report.attempt.exam();
        let by_question: HashMap<&str, _> =
            report.answers.iter().map(|answer| (answer.question_id.as_str(), answer)).collect();

        let questions = exam
            .questions()
            .map(|question| {
                let answer = by_question.get(question.id.as_str());
                QuestionGrade {
                    question_id: question.id.clone(),
                    kind: question.kind,
                    max_marks: question.marks,
                    answered: answer.is_some_and(|answer| answer.has_payload()),
                    marks: answer.and_then(|answer| answer.marks),
                    feedback: answer.and_then(|answer| answer.feedback.clone()),
                }
            })
            .collect();

        Self {
            attempt_id: report.attempt.id.clone(),
            exam_id: report.attempt.exam_id.clone(),
            learner_id: report.attempt.learner_id.clone(),
            status: report.attempt.status,
            is_final,
            total: report.summary.total,
            max: report.summary.max,
            percentage: report.summary.percentage,
            passed: report.summary.passed,
            passing_percentage: exam.passing_percentage,
            unmarked_questions: report.unmarked.clone(),
            graded_at: report.attempt.graded_at.map(format_offset),
            graded_by: report.attempt.graded_by.clone(),
            questions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_request_requires_at_least_one_entry() {
        let empty: ManualGradeRequest =
            serde_json::from_value(serde_json::json!({ "grades": [] })).expect("request");
        assert!(empty.validate().is_err());

        let request: ManualGradeRequest = serde_json::from_value(serde_json::json!({
            "grades": [{ "questionId": "q3", "marks": 4.5, "feedback": "ok" }]
        }))
        .expect("request");
        assert!(request.validate().is_ok());

        let grades = request.into_grades();
        assert_eq!(grades[0].question_id, "q3");
        assert_eq!(grades[0].marks, 4.5);
    }

    #[test]
    fn nested_entries_are_validated() {
        let request: ManualGradeRequest = serde_json::from_value(serde_json::json!({
            "grades": [{ "question_id": "", "marks": 1.0 }]
        }))
        .expect("request");
        assert!(request.validate().is_err());
    }
}
