use std::collections::HashSet;

use time::OffsetDateTime;

use crate::db::models::{ExamDefinition, StoredExam};
use crate::db::types::QuestionType;
use crate::services::errors::EngineError;
use crate::store::AttemptStore;

/// One year.
pub(crate) const MAX_DURATION_MINUTES: i64 = 525_600;

/// Stores a catalog definition under `exam_id`. Attempts already started keep
/// their own snapshot and are not affected.
pub(crate) async fn import_exam(
    store: &dyn AttemptStore,
    exam_id: &str,
    mut definition: ExamDefinition,
    now: OffsetDateTime,
) -> Result<StoredExam, EngineError> {
    definition.id = exam_id.to_string();
    validate_definition(&definition)?;

    let stored = store.upsert_exam(&definition, now).await?;
    tracing::info!(
        exam_id,
        questions = definition.questions().count(),
        duration_minutes = definition.duration_minutes,
        max_attempts = definition.max_attempts,
        "Exam definition imported"
    );
    Ok(stored)
}

pub(crate) fn validate_definition(definition: &ExamDefinition) -> Result<(), EngineError> {
    let mut problems = Vec::new();

    if definition.id.trim().is_empty() {
        problems.push("exam id is empty".to_string());
    }
    if !(1..=MAX_DURATION_MINUTES).contains(&definition.duration_minutes) {
        problems.push(format!("duration_minutes must be between 1 and {MAX_DURATION_MINUTES}"));
    }
    if definition.window_start >= definition.window_end {
        problems.push("window_start must be before window_end".to_string());
    }
    if !(0.0..=100.0).contains(&definition.passing_percentage) {
        problems.push("passing_percentage must be between 0 and 100".to_string());
    }
    if definition.max_attempts == 0 {
        problems.push("max_attempts must be at least 1".to_string());
    }

    let mut question_ids = HashSet::new();
    for question in definition.questions() {
        if !question_ids.insert(question.id.as_str()) {
            problems.push(format!("question id {} is repeated", question.id));
        }
        if !question.marks.is_finite() || question.marks <= 0.0 {
            problems.push(format!("question {} must carry positive marks", question.id));
        }

        match question.kind {
            QuestionType::MultipleChoice => {
                if question.options.is_empty() {
                    problems.push(format!("question {} has no options", question.id));
                }
                let mut option_ids = HashSet::new();
                if question.options.iter().any(|option| !option_ids.insert(option.id.as_str())) {
                    problems.push(format!("question {} repeats an option id", question.id));
                }
            }
            QuestionType::Subjective | QuestionType::FileUpload => {
                if !question.options.is_empty() {
                    problems.push(format!("question {} cannot carry options", question.id));
                }
            }
        }
    }
    if question_ids.is_empty() {
        problems.push("exam has no questions".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(EngineError::InvalidExam(problems.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::fixtures::{mcq, sample_exam};
    use crate::store::memory::MemoryAttemptStore;
    use time::macros::datetime;

    #[test]
    fn sample_definition_is_valid() {
        assert!(validate_definition(&sample_exam("exam-1")).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut exam = sample_exam("exam-1");
        exam.duration_minutes = 0;
        exam.passing_percentage = 120.0;
        exam.sections[0].questions.push(mcq("q1", 0.0, "a", &["a", "a"]));

        let Err(EngineError::InvalidExam(detail)) = validate_definition(&exam) else {
            panic!("expected invalid exam");
        };
        assert!(detail.contains("duration_minutes"));
        assert!(detail.contains("passing_percentage"));
        assert!(detail.contains("q1 is repeated"));
        assert!(detail.contains("positive marks"));
        assert!(detail.contains("repeats an option id"));
    }

    #[tokio::test]
    async fn oversized_duration_is_rejected_on_import() {
        let store = MemoryAttemptStore::default();
        let mut exam = sample_exam("exam-1");
        exam.duration_minutes = 1_000_000_000_000;

        let now = datetime!(2025-02-01 12:00:00 UTC);
        let result = import_exam(&store, "exam-1", exam, now).await;
        assert!(matches!(
            result,
            Err(EngineError::InvalidExam(detail)) if detail.contains("525600")
        ));
        assert!(store.find_exam("exam-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn import_uses_path_id_and_replaces() {
        let store = MemoryAttemptStore::default();
        let now = datetime!(2025-02-01 12:00:00 UTC);

        let mut exam = sample_exam("ignored");
        import_exam(&store, "exam-7", exam.clone(), now).await.expect("import");
        exam.duration_minutes = 90;
        import_exam(&store, "exam-7", exam, now).await.expect("replace");

        let stored = store.find_exam("exam-7").await.unwrap().expect("stored");
        assert_eq!(stored.id, "exam-7");
        assert_eq!(stored.duration_minutes, 90);
        assert!(store.find_exam("ignored").await.unwrap().is_none());
    }
}
