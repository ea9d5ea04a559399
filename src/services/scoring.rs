use std::collections::HashMap;

use serde::Serialize;

use crate::db::models::{Answer, ExamDefinition};
use crate::store::AutoMark;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub(crate) struct GradeSummary {
    pub(crate) total: f64,
    pub(crate) max: f64,
    pub(crate) percentage: f64,
    pub(crate) passed: bool,
}

/// Full marks for the correct option, zero otherwise. Only multiple-choice
/// answers that exist are marked; the result depends on nothing but the
/// stored selection, so re-running it is a no-op.
/// Marks to write for multiple-choice answers. Answers a grader has overridden
/// and answers already carrying the computed marks are left out.
pub(crate) fn auto_grade(exam: &ExamDefinition, answers: &[Answer]) -> Vec<AutoMark> {
    answers
        .iter()
        .filter(|answer| answer.graded_by.is_none())
        .filter_map(|answer| {
            let question = exam.question(&answer.question_id)?;
            if !question.kind.is_auto_gradable() {
                return None;
            }

            let correct = answer
                .selected_option_id
                .as_deref()
                .and_then(|option_id| question.option(option_id))
                .is_some_and(|option| option.is_correct);

            let marks = if correct { question.marks } else { 0.0 };
            (answer.marks != Some(marks))
                .then(|| AutoMark { question_id: answer.question_id.clone(), marks })
        })
        .collect()
}

pub(crate) fn summarize(exam: &ExamDefinition, answers: &[Answer]) -> GradeSummary {
    let total: f64 = answers
        .iter()
        .filter(|answer| exam.question(&answer.question_id).is_some())
        .filter_map(|answer| answer.marks)
        .sum();
    let max = exam.total_marks();
    let percentage = if max > 0.0 { total / max * 100.0 } else { 0.0 };

    GradeSummary { total, max, percentage, passed: percentage >= exam.passing_percentage }
}

/// Answered non-objective questions that still lack marks, in paper order.
pub(crate) fn ungraded_questions(exam: &ExamDefinition, answers: &[Answer]) -> Vec<String> {
    let by_question: HashMap<&str, &Answer> =
        answers.iter().map(|answer| (answer.question_id.as_str(), answer)).collect();

    exam.questions()
        .filter(|question| !question.kind.is_auto_gradable())
        .filter(|question| {
            by_question
                .get(question.id.as_str())
                .is_some_and(|answer| answer.has_payload() && answer.marks.is_none())
        })
        .map(|question| question.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::fixtures::{exam_with_upload, sample_exam};
    use crate::db::types::AnswerStatus;
    use time::macros::datetime;

    fn answer(question_id: &str, option: Option<&str>, text: Option<&str>) -> Answer {
        let now = datetime!(2025-03-01 09:10:00 UTC);
        let answered = option.is_some() || text.is_some();
        Answer {
            attempt_id: "a1".to_string(),
            question_id: question_id.to_string(),
            selected_option_id: option.map(str::to_string),
            free_text: text.map(str::to_string),
            file_reference: None,
            status: if answered { AnswerStatus::Answered } else { AnswerStatus::NotAnswered },
            marks: None,
            feedback: None,
            graded_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn with_marks(mut answers: Vec<Answer>, marks: &[AutoMark]) -> Vec<Answer> {
        for mark in marks {
            if let Some(answer) = answers.iter_mut().find(|a| a.question_id == mark.question_id) {
                answer.marks = Some(mark.marks);
            }
        }
        answers
    }

    #[test]
    fn auto_grade_marks_only_multiple_choice() {
        let exam = sample_exam("exam-1");
        let answers = vec![
            answer("q1", Some("a"), None),
            answer("q2", Some("a"), None),
            answer("q3", None, Some("essay")),
        ];

        let marks = auto_grade(&exam, &answers);
        assert_eq!(
            marks,
            vec![
                AutoMark { question_id: "q1".into(), marks: 5.0 },
                AutoMark { question_id: "q2".into(), marks: 0.0 },
            ]
        );
    }

    #[test]
    fn auto_grade_is_idempotent() {
        let exam = sample_exam("exam-1");
        let answers = vec![answer("q1", Some("a"), None), answer("q2", None, None)];

        let first = auto_grade(&exam, &answers);
        assert_eq!(first.len(), 2);
        let graded = with_marks(answers, &first);
        assert!(auto_grade(&exam, &graded).is_empty());
    }

    #[test]
    fn auto_grade_skips_manual_overrides() {
        let exam = sample_exam("exam-1");
        let mut overridden = answer("q2", Some("a"), None);
        overridden.marks = Some(3.0);
        overridden.graded_by = Some("grader-1".to_string());
        let answers = vec![answer("q1", Some("a"), None), overridden];

        let marks = auto_grade(&exam, &answers);
        assert_eq!(marks, vec![AutoMark { question_id: "q1".into(), marks: 5.0 }]);
    }

    #[test]
    fn summary_before_manual_grading_matches_objective_score() {
        let exam = sample_exam("exam-1");
        let answers = vec![answer("q1", Some("a"), None), answer("q2", Some("c"), None)];
        let answers = with_marks(answers.clone(), &auto_grade(&exam, &answers));

        let summary = summarize(&exam, &answers);
        assert_eq!(summary.total, 10.0);
        assert_eq!(summary.max, 20.0);
        assert_eq!(summary.percentage, 50.0);
        assert!(!summary.passed);
    }

    #[test]
    fn passing_threshold_is_inclusive() {
        let exam = sample_exam("exam-1");
        let mut answers = vec![answer("q1", Some("a"), None), answer("q3", None, Some("x"))];
        answers[0].marks = Some(5.0);
        answers[1].marks = Some(7.0);

        let summary = summarize(&exam, &answers);
        assert_eq!(summary.percentage, 60.0);
        assert!(summary.passed);
    }

    #[test]
    fn ungraded_lists_answered_open_questions_without_marks() {
        let exam = exam_with_upload("exam-1");
        let mut upload = answer("q4", None, None);
        upload.file_reference = Some("uploads/1.png".into());
        upload.status = AnswerStatus::Answered;
        let answers =
            vec![answer("q1", Some("b"), None), answer("q3", None, Some("essay")), upload];

        assert_eq!(ungraded_questions(&exam, &answers), vec!["q3".to_string(), "q4".to_string()]);

        let blank_only = vec![answer("q3", None, None)];
        assert!(ungraded_questions(&exam, &blank_only).is_empty());
    }
}
