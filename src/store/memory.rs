use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use sqlx::types::Json;
use time::OffsetDateTime;

use crate::db::models::{Answer, Attempt, ExamDefinition, StoredExam};
use crate::db::types::{AnswerStatus, AttemptStatus};

use super::{
    AnswerUpsert, AnswerWrite, AttemptStore, AutoGrader, CreateAttempt, FinishAttempt,
    FinishOutcome, GuardedWrite, ManualGrade, NewAttempt, PendingAttempt, StoreResult,
};

/// Single-process store. One mutex guards everything, so each method is atomic.
#[derive(Default)]
pub(crate) struct MemoryAttemptStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    exams: HashMap<String, StoredExam>,
    attempts: HashMap<String, Attempt>,
    answers: BTreeMap<(String, String), Answer>,
}

impl MemoryAttemptStore {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MemoryState {
    fn answers_for(&self, attempt_id: &str) -> Vec<Answer> {
        let mut answers: Vec<Answer> = self
            .answers
            .values()
            .filter(|answer| answer.attempt_id == attempt_id)
            .cloned()
            .collect();
        answers.sort_by(|a, b| {
            a.created_at.cmp(&b.created_at).then_with(|| a.question_id.cmp(&b.question_id))
        });
        answers
    }

    fn active_for(&self, exam_id: &str, learner_id: &str) -> Option<&Attempt> {
        self.attempts.values().find(|attempt| {
            attempt.exam_id == exam_id
                && attempt.learner_id == learner_id
                && attempt.status == AttemptStatus::InProgress
        })
    }

    /// Returns whether any answer changed.
    fn apply_marks(&mut self, attempt_id: &str, grader: AutoGrader, now: OffsetDateTime) -> bool {
        let Some(exam) = self.attempts.get(attempt_id).map(|attempt| attempt.exam().clone()) else {
            return false;
        };
        let current = self.answers_for(attempt_id);
        let mut changed = false;
        for mark in grader(&exam, &current) {
            let key = (attempt_id.to_string(), mark.question_id);
            if let Some(answer) = self.answers.get_mut(&key) {
                answer.marks = Some(mark.marks);
                answer.updated_at = now;
                changed = true;
            }
        }
        changed
    }

    fn pending(&self, filter: impl Fn(&Attempt) -> bool) -> Vec<PendingAttempt> {
        let mut pending: Vec<PendingAttempt> = self
            .attempts
            .values()
            .filter(|attempt| attempt.status == AttemptStatus::InProgress && filter(attempt))
            .map(|attempt| PendingAttempt { id: attempt.id.clone(), end_time: attempt.end_time })
            .collect();
        pending.sort_by(|a, b| a.end_time.cmp(&b.end_time).then_with(|| a.id.cmp(&b.id)));
        pending
    }

    fn for_exam(&self, exam_id: &str, status: Option<AttemptStatus>) -> Vec<&Attempt> {
        let mut attempts: Vec<&Attempt> = self
            .attempts
            .values()
            .filter(|attempt| attempt.exam_id == exam_id)
            .filter(|attempt| status.map_or(true, |wanted| attempt.status == wanted))
            .collect();
        attempts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        attempts
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn ping(&self) -> StoreResult<()> {
        drop(self.state());
        Ok(())
    }

    async fn upsert_exam(
        &self,
        exam: &ExamDefinition,
        now: OffsetDateTime,
    ) -> StoreResult<StoredExam> {
        let mut state = self.state();
        let created_at = state.exams.get(&exam.id).map_or(now, |existing| existing.created_at);
        let stored = StoredExam {
            id: exam.id.clone(),
            definition: Json(exam.clone()),
            created_at,
            updated_at: now,
        };
        state.exams.insert(exam.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn find_exam(&self, exam_id: &str) -> StoreResult<Option<ExamDefinition>> {
        Ok(self.state().exams.get(exam_id).map(|stored| stored.definition.0.clone()))
    }

    async fn create_attempt(&self, attempt: NewAttempt) -> StoreResult<CreateAttempt> {
        let mut state = self.state();
        if let Some(existing) = state.active_for(&attempt.exam.id, &attempt.learner_id) {
            return Ok(CreateAttempt::Existing(existing.clone()));
        }

        let used = state
            .attempts
            .values()
            .filter(|row| row.exam_id == attempt.exam.id && row.learner_id == attempt.learner_id)
            .count();
        if used as u64 >= u64::from(attempt.exam.max_attempts) {
            return Ok(CreateAttempt::LimitReached);
        }

        let created = Attempt {
            id: attempt.id.clone(),
            exam_id: attempt.exam.id.clone(),
            learner_id: attempt.learner_id,
            exam_snapshot: Json(attempt.exam),
            status: AttemptStatus::InProgress,
            submit_cause: None,
            start_time: attempt.start_time,
            end_time: attempt.end_time,
            submitted_at: None,
            time_spent_seconds: None,
            graded_at: None,
            graded_by: None,
            created_at: attempt.start_time,
            updated_at: attempt.start_time,
        };
        state.attempts.insert(attempt.id, created.clone());
        Ok(CreateAttempt::Created(created))
    }

    async fn find_attempt(&self, attempt_id: &str) -> StoreResult<Option<Attempt>> {
        Ok(self.state().attempts.get(attempt_id).cloned())
    }

    async fn find_active_attempt(
        &self,
        exam_id: &str,
        learner_id: &str,
    ) -> StoreResult<Option<Attempt>> {
        Ok(self.state().active_for(exam_id, learner_id).cloned())
    }

    async fn count_learner_attempts(&self, exam_id: &str, learner_id: &str) -> StoreResult<i64> {
        let state = self.state();
        let count = state
            .attempts
            .values()
            .filter(|attempt| attempt.exam_id == exam_id && attempt.learner_id == learner_id)
            .count();
        Ok(count as i64)
    }

    async fn list_attempts_for_exam(
        &self,
        exam_id: &str,
        status: Option<AttemptStatus>,
        skip: i64,
        limit: i64,
    ) -> StoreResult<Vec<Attempt>> {
        let state = self.state();
        Ok(state
            .for_exam(exam_id, status)
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(limit.clamp(1, 1000) as usize)
            .cloned()
            .collect())
    }

    async fn count_attempts_for_exam(
        &self,
        exam_id: &str,
        status: Option<AttemptStatus>,
    ) -> StoreResult<i64> {
        Ok(self.state().for_exam(exam_id, status).len() as i64)
    }

    async fn list_in_progress(&self) -> StoreResult<Vec<PendingAttempt>> {
        Ok(self.state().pending(|_| true))
    }

    async fn list_due(&self, now: OffsetDateTime, limit: i64) -> StoreResult<Vec<PendingAttempt>> {
        let mut due = self.state().pending(|attempt| attempt.end_time <= now);
        due.truncate(limit.max(1) as usize);
        Ok(due)
    }

    async fn list_answers(&self, attempt_id: &str) -> StoreResult<Vec<Answer>> {
        Ok(self.state().answers_for(attempt_id))
    }

    async fn save_answer(&self, answer: AnswerUpsert) -> StoreResult<Option<AnswerWrite>> {
        let mut state = self.state();
        let Some(status) = state.attempts.get(&answer.attempt_id).map(|attempt| attempt.status)
        else {
            return Ok(None);
        };

        if status != AttemptStatus::InProgress {
            return Ok(Some(AnswerWrite::AttemptInactive(status)));
        }

        let key = (answer.attempt_id.clone(), answer.question_id.clone());
        let saved = match state.answers.get_mut(&key) {
            Some(existing) if answer.matches(existing) => {
                return Ok(Some(AnswerWrite::Unchanged(existing.clone())));
            }
            Some(existing) => {
                existing.selected_option_id = answer.selected_option_id;
                existing.free_text = answer.free_text;
                existing.file_reference = answer.file_reference;
                existing.status = answer.status;
                existing.updated_at = answer.now;
                existing.clone()
            }
            None => {
                let created = answer.into_answer();
                state.answers.insert(key, created.clone());
                created
            }
        };

        Ok(Some(AnswerWrite::Saved(saved)))
    }

    async fn mark_for_review(
        &self,
        attempt_id: &str,
        question_id: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<AnswerWrite>> {
        let mut state = self.state();
        let Some(status) = state.attempts.get(attempt_id).map(|attempt| attempt.status) else {
            return Ok(None);
        };

        if status != AttemptStatus::InProgress {
            return Ok(Some(AnswerWrite::AttemptInactive(status)));
        }

        let key = (attempt_id.to_string(), question_id.to_string());
        let saved = match state.answers.get_mut(&key) {
            Some(existing) if existing.status == AnswerStatus::MarkedForReview => {
                return Ok(Some(AnswerWrite::Unchanged(existing.clone())));
            }
            Some(existing) => {
                existing.status = AnswerStatus::MarkedForReview;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let created = AnswerUpsert {
                    attempt_id: attempt_id.to_string(),
                    question_id: question_id.to_string(),
                    selected_option_id: None,
                    free_text: None,
                    file_reference: None,
                    status: AnswerStatus::MarkedForReview,
                    now,
                }
                .into_answer();
                state.answers.insert(key, created.clone());
                created
            }
        };

        Ok(Some(AnswerWrite::Saved(saved)))
    }

    async fn finish_attempt(
        &self,
        attempt_id: &str,
        finish: FinishAttempt,
        grader: AutoGrader,
    ) -> StoreResult<Option<FinishOutcome>> {
        let mut state = self.state();
        let Some(current) = state.attempts.get(attempt_id).cloned() else {
            return Ok(None);
        };

        if current.status != AttemptStatus::InProgress {
            return Ok(Some(FinishOutcome::AlreadyFinished(current)));
        }

        state.apply_marks(attempt_id, grader, finish.now);

        let Some(attempt) = state.attempts.get_mut(attempt_id) else {
            return Ok(None);
        };
        attempt.status = finish.cause.terminal_status();
        attempt.submit_cause = Some(finish.cause);
        attempt.submitted_at = Some(finish.submitted_at);
        attempt.time_spent_seconds = Some(finish.time_spent_seconds);
        attempt.updated_at = finish.now;

        Ok(Some(FinishOutcome::Finished(attempt.clone())))
    }

    async fn apply_auto_marks(
        &self,
        attempt_id: &str,
        grader: AutoGrader,
        now: OffsetDateTime,
    ) -> StoreResult<Option<GuardedWrite>> {
        let mut state = self.state();
        let Some(status) = state.attempts.get(attempt_id).map(|attempt| attempt.status) else {
            return Ok(None);
        };

        if !status.is_gradable() {
            return Ok(Some(GuardedWrite::Rejected(status)));
        }

        let changed = state.apply_marks(attempt_id, grader, now);
        Ok(state.attempts.get_mut(attempt_id).map(|attempt| {
            if changed {
                attempt.updated_at = now;
            }
            GuardedWrite::Applied(attempt.clone())
        }))
    }

    async fn record_grades(
        &self,
        attempt_id: &str,
        grades: &[ManualGrade],
        grader_id: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<GuardedWrite>> {
        let mut state = self.state();
        let Some(status) = state.attempts.get(attempt_id).map(|attempt| attempt.status) else {
            return Ok(None);
        };

        if !status.is_gradable() {
            return Ok(Some(GuardedWrite::Rejected(status)));
        }

        for grade in grades {
            let key = (attempt_id.to_string(), grade.question_id.clone());
            let answer = state.answers.entry(key).or_insert_with(|| {
                AnswerUpsert {
                    attempt_id: attempt_id.to_string(),
                    question_id: grade.question_id.clone(),
                    selected_option_id: None,
                    free_text: None,
                    file_reference: None,
                    status: AnswerStatus::NotAnswered,
                    now,
                }
                .into_answer()
            });
            answer.marks = Some(grade.marks);
            answer.feedback = grade.feedback.clone();
            answer.graded_by = Some(grader_id.to_string());
            answer.updated_at = now;
        }

        Ok(state.attempts.get_mut(attempt_id).map(|attempt| {
            attempt.updated_at = now;
            GuardedWrite::Applied(attempt.clone())
        }))
    }

    async fn mark_graded(
        &self,
        attempt_id: &str,
        grader_id: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<GuardedWrite>> {
        let mut state = self.state();
        let Some(attempt) = state.attempts.get_mut(attempt_id) else {
            return Ok(None);
        };

        if !attempt.status.is_gradable() {
            return Ok(Some(GuardedWrite::Rejected(attempt.status)));
        }

        attempt.status = AttemptStatus::Graded;
        attempt.graded_at = Some(now);
        attempt.graded_by = Some(grader_id.to_string());
        attempt.updated_at = now;
        Ok(Some(GuardedWrite::Applied(attempt.clone())))
    }

    async fn delete_attempt(&self, attempt_id: &str) -> StoreResult<bool> {
        let mut state = self.state();
        let removed = state.attempts.remove(attempt_id).is_some();
        state.answers.retain(|(owner, _), _| owner != attempt_id);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::fixtures::sample_exam;
    use crate::db::types::SubmitCause;
    use crate::store::AutoMark;
    use time::{macros::datetime, Duration};

    const T0: OffsetDateTime = datetime!(2025-03-01 09:00:00 UTC);

    fn new_attempt(id: &str, learner: &str) -> NewAttempt {
        NewAttempt {
            id: id.to_string(),
            exam: sample_exam("exam-1"),
            learner_id: learner.to_string(),
            start_time: T0,
            end_time: T0 + Duration::minutes(60),
        }
    }

    fn upsert(attempt_id: &str, question_id: &str, option: &str) -> AnswerUpsert {
        AnswerUpsert {
            attempt_id: attempt_id.to_string(),
            question_id: question_id.to_string(),
            selected_option_id: Some(option.to_string()),
            free_text: None,
            file_reference: None,
            status: AnswerStatus::Answered,
            now: T0 + Duration::minutes(1),
        }
    }

    fn full_marks(_: &ExamDefinition, answers: &[Answer]) -> Vec<AutoMark> {
        answers
            .iter()
            .map(|answer| AutoMark { question_id: answer.question_id.clone(), marks: 5.0 })
            .collect()
    }

    fn finish(cause: SubmitCause) -> FinishAttempt {
        let at = T0 + Duration::minutes(10);
        FinishAttempt { cause, submitted_at: at, time_spent_seconds: 600, now: at }
    }

    #[tokio::test]
    async fn create_returns_existing_in_progress_attempt() {
        let store = MemoryAttemptStore::default();
        let first = store.create_attempt(new_attempt("a1", "learner")).await.unwrap();
        let second = store.create_attempt(new_attempt("a2", "learner")).await.unwrap();

        assert!(matches!(first, CreateAttempt::Created(ref attempt) if attempt.id == "a1"));
        assert!(matches!(second, CreateAttempt::Existing(ref attempt) if attempt.id == "a1"));
        assert_eq!(store.count_learner_attempts("exam-1", "learner").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn create_respects_attempt_limit() {
        let store = MemoryAttemptStore::default();
        store.create_attempt(new_attempt("a1", "learner")).await.unwrap();
        store.finish_attempt("a1", finish(SubmitCause::Learner), full_marks).await.unwrap();

        let again = store.create_attempt(new_attempt("a2", "learner")).await.unwrap();
        assert!(matches!(again, CreateAttempt::LimitReached));
    }

    #[tokio::test]
    async fn identical_answer_is_not_rewritten() {
        let store = MemoryAttemptStore::default();
        store.create_attempt(new_attempt("a1", "learner")).await.unwrap();

        let first = store.save_answer(upsert("a1", "q1", "a")).await.unwrap();
        let mut retry = upsert("a1", "q1", "a");
        retry.now = T0 + Duration::minutes(5);
        let second = store.save_answer(retry).await.unwrap();

        let Some(AnswerWrite::Saved(saved)) = first else { panic!("expected save") };
        let Some(AnswerWrite::Unchanged(unchanged)) = second else { panic!("expected no-op") };
        assert_eq!(saved, unchanged);
    }

    #[tokio::test]
    async fn finish_is_compare_and_set() {
        let store = MemoryAttemptStore::default();
        store.create_attempt(new_attempt("a1", "learner")).await.unwrap();
        store.save_answer(upsert("a1", "q1", "a")).await.unwrap();

        let first = store.finish_attempt("a1", finish(SubmitCause::Learner), full_marks).await;
        let second = store.finish_attempt("a1", finish(SubmitCause::Timeout), full_marks).await;

        let Some(FinishOutcome::Finished(done)) = first.unwrap() else { panic!("finished") };
        let Some(FinishOutcome::AlreadyFinished(again)) = second.unwrap() else {
            panic!("already finished")
        };
        assert_eq!(done.status, AttemptStatus::Submitted);
        assert_eq!(again.submit_cause, Some(SubmitCause::Learner));
        let answers = store.list_answers("a1").await.unwrap();
        assert_eq!(answers[0].marks, Some(5.0));
    }

    #[tokio::test]
    async fn answers_rejected_after_finish() {
        let store = MemoryAttemptStore::default();
        store.create_attempt(new_attempt("a1", "learner")).await.unwrap();
        store.finish_attempt("a1", finish(SubmitCause::Timeout), full_marks).await.unwrap();

        let write = store.save_answer(upsert("a1", "q1", "b")).await.unwrap();
        assert!(matches!(write, Some(AnswerWrite::AttemptInactive(AttemptStatus::TimedOut))));
        assert!(store.save_answer(upsert("missing", "q1", "b")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_cascades_to_answers() {
        let store = MemoryAttemptStore::default();
        store.create_attempt(new_attempt("a1", "learner")).await.unwrap();
        store.save_answer(upsert("a1", "q1", "a")).await.unwrap();

        assert!(store.delete_attempt("a1").await.unwrap());
        assert!(store.list_answers("a1").await.unwrap().is_empty());
        assert!(!store.delete_attempt("a1").await.unwrap());
    }

    #[tokio::test]
    async fn due_attempts_are_ordered_by_deadline() {
        let store = MemoryAttemptStore::default();
        let mut late = new_attempt("late", "learner-1");
        late.end_time = T0 + Duration::minutes(90);
        store.create_attempt(late).await.unwrap();
        store.create_attempt(new_attempt("early", "learner-2")).await.unwrap();

        let due = store.list_due(T0 + Duration::minutes(60), 10).await.unwrap();
        assert_eq!(due.iter().map(|row| row.id.as_str()).collect::<Vec<_>>(), vec!["early"]);

        let pending = store.list_in_progress().await.unwrap();
        assert_eq!(pending[0].id, "early");
        assert_eq!(pending[1].id, "late");
    }
}
