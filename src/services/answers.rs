//! Answer payload rules: which payload kind each question type accepts and how
//! a payload is normalised before it reaches the store.

use serde::{Deserialize, Serialize};

use crate::db::models::Question;
use crate::db::types::{AnswerStatus, QuestionType};
use crate::services::errors::EngineError;

const MAX_TEXT_CHARS: usize = 20_000;
const MAX_REFERENCE_CHARS: usize = 1_024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum AnswerPayload {
    Choice {
        #[serde(default)]
        option_id: Option<String>,
    },
    Text {
        #[serde(default)]
        text: Option<String>,
    },
    File {
        #[serde(default)]
        reference: Option<String>,
    },
}

impl AnswerPayload {
    fn kind(&self) -> &'static str {
        match self {
            Self::Choice { .. } => "choice",
            Self::Text { .. } => "text",
            Self::File { .. } => "file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NormalizedAnswer {
    pub(crate) selected_option_id: Option<String>,
    pub(crate) free_text: Option<String>,
    pub(crate) file_reference: Option<String>,
    pub(crate) status: AnswerStatus,
}

fn expected_kind(kind: QuestionType) -> &'static str {
    match kind {
        QuestionType::MultipleChoice => "choice",
        QuestionType::Subjective => "text",
        QuestionType::FileUpload => "file",
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|item| !item.trim().is_empty())
}

pub(crate) fn normalize(
    question: &Question,
    payload: AnswerPayload,
) -> Result<NormalizedAnswer, EngineError> {
    let mut normalized = NormalizedAnswer {
        selected_option_id: None,
        free_text: None,
        file_reference: None,
        status: AnswerStatus::NotAnswered,
    };

    match (question.kind, payload) {
        (QuestionType::MultipleChoice, AnswerPayload::Choice { option_id }) => {
            let option_id = non_blank(option_id).map(|value| value.trim().to_string());
            if let Some(option_id) = &option_id {
                if question.option(option_id).is_none() {
                    return Err(EngineError::InvalidAnswer(format!(
                        "option {option_id} is not offered by question {}",
                        question.id
                    )));
                }
            }
            normalized.selected_option_id = option_id;
        }
        (QuestionType::Subjective, AnswerPayload::Text { text }) => {
            let text = non_blank(text);
            if text.as_ref().is_some_and(|value| value.chars().count() > MAX_TEXT_CHARS) {
                return Err(EngineError::InvalidAnswer(format!(
                    "text answers are limited to {MAX_TEXT_CHARS} characters"
                )));
            }
            normalized.free_text = text;
        }
        (QuestionType::FileUpload, AnswerPayload::File { reference }) => {
            let reference = non_blank(reference).map(|value| value.trim().to_string());
            if reference.as_ref().is_some_and(|value| value.len() > MAX_REFERENCE_CHARS) {
                return Err(EngineError::InvalidAnswer("file reference is too long".to_string()));
            }
            normalized.file_reference = reference;
        }
        (kind, payload) => {
            return Err(EngineError::InvalidAnswer(format!(
                "question {} expects a {} answer, got {}",
                question.id,
                expected_kind(kind),
                payload.kind()
            )));
        }
    }

    if normalized.selected_option_id.is_some()
        || normalized.free_text.is_some()
        || normalized.file_reference.is_some()
    {
        normalized.status = AnswerStatus::Answered;
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::fixtures::{mcq, open_question};

    #[test]
    fn choice_must_name_an_offered_option() {
        let question = mcq("q1", 5.0, "a", &["a", "b"]);

        let ok = normalize(&question, AnswerPayload::Choice { option_id: Some(" b ".into()) })
            .expect("valid choice");
        assert_eq!(ok.selected_option_id.as_deref(), Some("b"));
        assert_eq!(ok.status, AnswerStatus::Answered);

        let err = normalize(&question, AnswerPayload::Choice { option_id: Some("z".into()) });
        assert!(matches!(err, Err(EngineError::InvalidAnswer(_))));
    }

    #[test]
    fn blank_payloads_are_not_answered() {
        let text = open_question("q3", QuestionType::Subjective, 10.0);
        let blank = normalize(&text, AnswerPayload::Text { text: Some("   ".into()) }).unwrap();
        assert_eq!(blank.free_text, None);
        assert_eq!(blank.status, AnswerStatus::NotAnswered);

        let choice = mcq("q1", 5.0, "a", &["a"]);
        let cleared = normalize(&choice, AnswerPayload::Choice { option_id: None }).unwrap();
        assert_eq!(cleared.status, AnswerStatus::NotAnswered);
    }

    #[test]
    fn text_is_stored_verbatim() {
        let text = open_question("q3", QuestionType::Subjective, 10.0);
        let saved =
            normalize(&text, AnswerPayload::Text { text: Some("  Entropy rises.\n".into()) })
                .unwrap();
        assert_eq!(saved.free_text.as_deref(), Some("  Entropy rises.\n"));
    }

    #[test]
    fn payload_kind_must_match_question_type() {
        let upload = open_question("q4", QuestionType::FileUpload, 4.0);
        let err = normalize(&upload, AnswerPayload::Text { text: Some("hi".into()) });
        assert!(matches!(
            err,
            Err(EngineError::InvalidAnswer(message)) if message.contains("file")
        ));

        let saved =
            normalize(&upload, AnswerPayload::File { reference: Some("uploads/x.png".into()) })
                .unwrap();
        assert_eq!(saved.file_reference.as_deref(), Some("uploads/x.png"));
    }

    #[test]
    fn payload_json_uses_kind_tag() {
        let payload: AnswerPayload =
            serde_json::from_value(serde_json::json!({"kind": "choice", "option_id": "a"}))
                .unwrap();
        assert_eq!(payload, AnswerPayload::Choice { option_id: Some("a".into()) });
    }
}
