//! Scoring operations on finished attempts: objective re-marking, incremental
//! manual grading and the final `graded` transition.

use std::collections::HashSet;

use crate::core::metrics;
use crate::db::models::{Answer, Attempt};
use crate::db::types::AttemptStatus;
use crate::services::attempts::{ensure_owner, AttemptService, Viewer};
use crate::services::errors::EngineError;
use crate::services::scoring::{self, GradeSummary};
use crate::store::{GuardedWrite, ManualGrade};

#[derive(Debug, Clone)]
pub(crate) struct GradeReport {
    pub(crate) attempt: Attempt,
    pub(crate) answers: Vec<Answer>,
    pub(crate) summary: GradeSummary,
    /// Answered non-objective questions still waiting for marks.
    pub(crate) unmarked: Vec<String>,
}

impl GradeReport {
    pub(crate) fn is_final(&self) -> bool {
        self.attempt.status == AttemptStatus::Graded
    }
}

#[derive(Clone)]
pub(crate) struct GradingService {
    attempts: AttemptService,
}

impl GradingService {
    pub(crate) fn new(attempts: AttemptService) -> Self {
        Self { attempts }
    }

    /// Re-runs objective marking. Marks depend only on the frozen selection, and
    /// answers a grader has already marked keep the grader's value.
    pub(crate) async fn auto_grade(&self, attempt_id: &str) -> Result<GradeReport, EngineError> {
        let _guard = self.attempts.lock_attempt(attempt_id).await;
        let attempt = self.attempts.load_settled(attempt_id).await?;

        match attempt.status {
            AttemptStatus::InProgress => Err(EngineError::AttemptNotGradable(attempt.status)),
            AttemptStatus::Graded => self.report(attempt).await,
            AttemptStatus::Submitted | AttemptStatus::TimedOut => {
                let now = self.attempts.now();
                let write = self
                    .attempts
                    .store()
                    .apply_auto_marks(attempt_id, scoring::auto_grade, now)
                    .await?;
                let attempt = applied(attempt_id, write)?;
                self.report(attempt).await
            }
        }
    }

    pub(crate) async fn record_manual_grade(
        &self,
        attempt_id: &str,
        grader_id: &str,
        grades: Vec<ManualGrade>,
    ) -> Result<GradeReport, EngineError> {
        if grades.is_empty() {
            return Err(EngineError::InvalidGrade("at least one grade is required".to_string()));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) =
            grades.iter().find(|grade| !seen.insert(grade.question_id.as_str()))
        {
            return Err(EngineError::InvalidGrade(format!(
                "question {} is graded more than once",
                duplicate.question_id
            )));
        }

        let _guard = self.attempts.lock_attempt(attempt_id).await;
        let attempt = self.attempts.load_settled(attempt_id).await?;
        if !attempt.status.is_gradable() {
            return Err(EngineError::AttemptNotGradable(attempt.status));
        }

        let exam = attempt.exam();
        let mut cleaned = Vec::with_capacity(grades.len());
        for grade in grades {
            let question = exam
                .question(&grade.question_id)
                .ok_or_else(|| EngineError::InvalidQuestion(grade.question_id.clone()))?;
            if !grade.marks.is_finite() || grade.marks < 0.0 || grade.marks > question.marks {
                return Err(EngineError::MarksOutOfRange {
                    question_id: grade.question_id,
                    marks: grade.marks,
                    max: question.marks,
                });
            }

            let feedback = grade
                .feedback
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty());
            cleaned.push(ManualGrade {
                question_id: grade.question_id,
                marks: grade.marks,
                feedback,
            });
        }

        let now = self.attempts.now();
        let write =
            self.attempts.store().record_grades(attempt_id, &cleaned, grader_id, now).await?;
        let attempt = applied(attempt_id, write)?;

        tracing::info!(
            attempt_id,
            grader_id,
            questions = cleaned.len(),
            "Manual grades recorded"
        );
        self.report(attempt).await
    }

    pub(crate) async fn finalize(
        &self,
        attempt_id: &str,
        grader_id: &str,
    ) -> Result<GradeReport, EngineError> {
        let _guard = self.attempts.lock_attempt(attempt_id).await;
        let attempt = self.attempts.load_settled(attempt_id).await?;

        match attempt.status {
            AttemptStatus::Graded => return self.report(attempt).await,
            AttemptStatus::InProgress => {
                return Err(EngineError::AttemptNotGradable(attempt.status));
            }
            AttemptStatus::Submitted | AttemptStatus::TimedOut => {}
        }

        let answers = self.attempts.store().list_answers(attempt_id).await?;
        let unmarked = scoring::ungraded_questions(attempt.exam(), &answers);
        if !unmarked.is_empty() {
            tracing::warn!(attempt_id, unmarked = ?unmarked, "Finalize rejected");
            return Err(EngineError::IncompleteGrading { question_ids: unmarked });
        }

        let now = self.attempts.now();
        let write = self.attempts.store().mark_graded(attempt_id, grader_id, now).await?;
        let attempt = applied(attempt_id, write)?;
        let report = self.report(attempt).await?;

        metrics::attempt_graded();
        tracing::info!(
            attempt_id,
            exam_id = %report.attempt.exam_id,
            learner_id = %report.attempt.learner_id,
            grader_id,
            total = report.summary.total,
            percentage = report.summary.percentage,
            passed = report.summary.passed,
            "Attempt graded"
        );
        Ok(report)
    }

    /// Learners only see a summary once grading is final; graders also get the
    /// provisional one.
    pub(crate) async fn summary(
        &self,
        attempt_id: &str,
        viewer: Viewer<'_>,
    ) -> Result<GradeReport, EngineError> {
        let _guard = self.attempts.lock_attempt(attempt_id).await;
        let attempt = self.attempts.load_settled(attempt_id).await?;

        if let Viewer::Learner(learner_id) = viewer {
            ensure_owner(&attempt, learner_id)?;
            if attempt.status != AttemptStatus::Graded {
                return Err(EngineError::AttemptNotGradable(attempt.status));
            }
        }

        self.report(attempt).await
    }

    async fn report(&self, attempt: Attempt) -> Result<GradeReport, EngineError> {
        let answers = self.attempts.store().list_answers(&attempt.id).await?;
        let summary = scoring::summarize(attempt.exam(), &answers);
        let unmarked = scoring::ungraded_questions(attempt.exam(), &answers);
        Ok(GradeReport { attempt, answers, summary, unmarked })
    }
}

fn applied(attempt_id: &str, write: Option<GuardedWrite>) -> Result<Attempt, EngineError> {
    match write {
        Some(GuardedWrite::Applied(attempt)) => Ok(attempt),
        Some(GuardedWrite::Rejected(status)) => {
            tracing::warn!(attempt_id, status = status.as_str(), "Grading write rejected");
            Err(EngineError::AttemptNotGradable(status))
        }
        None => Err(EngineError::AttemptNotFound(attempt_id.to_string())),
    }
}
