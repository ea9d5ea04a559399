use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};

use crate::db::types::{AnswerStatus, AttemptStatus, QuestionType, SubmitCause};

fn default_max_attempts() -> u32 {
    1
}

/// Exam as supplied by the catalog. Copied whole into each attempt at start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ExamDefinition {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) title: String,
    pub(crate) sections: Vec<Section>,
    pub(crate) duration_minutes: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) window_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) window_end: OffsetDateTime,
    pub(crate) passing_percentage: f64,
    #[serde(default = "default_max_attempts")]
    pub(crate) max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Section {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) title: String,
    pub(crate) questions: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Question {
    pub(crate) id: String,
    #[serde(rename = "type")]
    pub(crate) kind: QuestionType,
    pub(crate) marks: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) options: Vec<QuestionOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct QuestionOption {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) is_correct: bool,
}

impl ExamDefinition {
    pub(crate) fn questions(&self) -> impl Iterator<Item = &Question> {
        self.sections.iter().flat_map(|section| section.questions.iter())
    }

    pub(crate) fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions().find(|question| question.id == question_id)
    }

    pub(crate) fn total_marks(&self) -> f64 {
        self.questions().map(|question| question.marks).sum()
    }

    pub(crate) fn duration(&self) -> Duration {
        Duration::seconds(self.duration_minutes.saturating_mul(60))
    }

    pub(crate) fn is_open_at(&self, now: OffsetDateTime) -> bool {
        now >= self.window_start && now <= self.window_end
    }
}

impl Question {
    pub(crate) fn option(&self, option_id: &str) -> Option<&QuestionOption> {
        self.options.iter().find(|option| option.id == option_id)
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct StoredExam {
    pub(crate) id: String,
    pub(crate) definition: Json<ExamDefinition>,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct Attempt {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) learner_id: String,
    pub(crate) exam_snapshot: Json<ExamDefinition>,
    pub(crate) status: AttemptStatus,
    pub(crate) submit_cause: Option<SubmitCause>,
    pub(crate) start_time: OffsetDateTime,
    pub(crate) end_time: OffsetDateTime,
    pub(crate) submitted_at: Option<OffsetDateTime>,
    pub(crate) time_spent_seconds: Option<i64>,
    pub(crate) graded_at: Option<OffsetDateTime>,
    pub(crate) graded_by: Option<String>,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
}

impl Attempt {
    pub(crate) fn exam(&self) -> &ExamDefinition {
        &self.exam_snapshot.0
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub(crate) struct Answer {
    pub(crate) attempt_id: String,
    pub(crate) question_id: String,
    pub(crate) selected_option_id: Option<String>,
    pub(crate) free_text: Option<String>,
    pub(crate) file_reference: Option<String>,
    pub(crate) status: AnswerStatus,
    pub(crate) marks: Option<f64>,
    pub(crate) feedback: Option<String>,
    pub(crate) graded_by: Option<String>,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
}

impl Answer {
    pub(crate) fn has_payload(&self) -> bool {
        self.selected_option_id.is_some()
            || self.free_text.is_some()
            || self.file_reference.is_some()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use time::macros::datetime;

    use super::*;

    pub(crate) fn mcq(id: &str, marks: f64, correct: &str, options: &[&str]) -> Question {
        Question {
            id: id.to_string(),
            kind: QuestionType::MultipleChoice,
            marks,
            prompt: None,
            options: options
                .iter()
                .map(|option| QuestionOption {
                    id: option.to_string(),
                    text: option.to_uppercase(),
                    is_correct: *option == correct,
                })
                .collect(),
        }
    }

    pub(crate) fn open_question(id: &str, kind: QuestionType, marks: f64) -> Question {
        let prompt = Some(format!("{id}?"));
        Question { id: id.to_string(), kind, marks, prompt, options: vec![] }
    }

    /// Two 5-mark MCQs, one 10-mark subjective question, 60 minutes, pass at 60%.
    pub(crate) fn sample_exam(id: &str) -> ExamDefinition {
        ExamDefinition {
            id: id.to_string(),
            title: "Thermodynamics midterm".to_string(),
            sections: vec![
                Section {
                    id: "s1".to_string(),
                    title: "Choice".to_string(),
                    questions: vec![
                        mcq("q1", 5.0, "a", &["a", "b", "c"]),
                        mcq("q2", 5.0, "c", &["a", "b", "c"]),
                    ],
                },
                Section {
                    id: "s2".to_string(),
                    title: "Essay".to_string(),
                    questions: vec![open_question("q3", QuestionType::Subjective, 10.0)],
                },
            ],
            duration_minutes: 60,
            window_start: datetime!(2025-03-01 08:00:00 UTC),
            window_end: datetime!(2025-03-01 20:00:00 UTC),
            passing_percentage: 60.0,
            max_attempts: 1,
        }
    }

    /// `sample_exam` plus a 4-mark file-upload question `q4`.
    pub(crate) fn exam_with_upload(id: &str) -> ExamDefinition {
        let mut exam = sample_exam(id);
        exam.sections[1].questions.push(open_question("q4", QuestionType::FileUpload, 4.0));
        exam
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::sample_exam;
    use super::*;
    use time::macros::datetime;

    #[test]
    fn definition_parses_with_defaults() {
        let raw = serde_json::json!({
            "id": "exam-1",
            "sections": [{
                "id": "s1",
                "questions": [{
                    "id": "q1",
                    "type": "multiple_choice",
                    "marks": 2.0,
                    "options": [{"id": "a", "is_correct": true}, {"id": "b"}]
                }]
            }],
            "duration_minutes": 30,
            "window_start": "2025-03-01T08:00:00Z",
            "window_end": "2025-03-01T20:00:00+03:00",
            "passing_percentage": 50.0
        });

        let exam: ExamDefinition = serde_json::from_value(raw).expect("definition");
        assert_eq!(exam.max_attempts, 1);
        assert_eq!(exam.total_marks(), 2.0);
        let question = exam.question("q1").expect("question");
        assert!(question.option("a").expect("option").is_correct);
        assert!(!question.option("b").expect("option").is_correct);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let exam = sample_exam("exam-1");
        assert!(exam.is_open_at(datetime!(2025-03-01 08:00:00 UTC)));
        assert!(exam.is_open_at(datetime!(2025-03-01 20:00:00 UTC)));
        assert!(!exam.is_open_at(datetime!(2025-03-01 07:59:59 UTC)));
        assert!(!exam.is_open_at(datetime!(2025-03-01 20:00:01 UTC)));
    }

    #[test]
    fn questions_are_ordered_across_sections() {
        let exam = sample_exam("exam-1");
        let ids: Vec<&str> = exam.questions().map(|question| question.id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q2", "q3"]);
        assert_eq!(exam.total_marks(), 20.0);
        assert_eq!(super::fixtures::exam_with_upload("exam-2").total_marks(), 24.0);
    }
}
