//! Core data model types for examguard.
//!
//! An [`ExamDefinition`] is loaded once at the start of an attempt and never
//! mutated afterwards. Everything the session owns is derived from it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Instructions shown when the exam source does not provide any.
pub const DEFAULT_INSTRUCTIONS: &str =
    "Answer all questions. Each question carries equal marks. Use the flag feature to mark questions for review.";

/// An exam as fetched from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamDefinition {
    /// Backend identifier of the exam.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Identifier of the teacher who owns the exam.
    pub teacher_id: String,
    /// Total time allowed, in seconds.
    pub duration_secs: u64,
    /// Instructions displayed before the first question.
    #[serde(default = "default_instructions")]
    pub instructions: String,
    /// Ordered questions.
    #[serde(default)]
    pub questions: Vec<Question>,
}

fn default_instructions() -> String {
    DEFAULT_INSTRUCTIONS.to_string()
}

impl ExamDefinition {
    /// Number of questions in the exam.
    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    /// Look up a question by its 1-based identifier.
    pub fn question(&self, id: u32) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }
}

/// A single exam question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Stable 1-based identifier.
    pub id: u32,
    /// Multiple-choice or essay.
    pub kind: QuestionKind,
    /// Prompt text.
    pub text: String,
    /// Answer options, in display order. Empty for essays.
    #[serde(default)]
    pub options: Vec<String>,
    /// Index of the correct option. Known to the server, echoed back on submit.
    #[serde(default)]
    pub correct_answer: Option<usize>,
}

impl Question {
    /// Whether `value` is an acceptable answer for this question.
    pub fn accepts(&self, value: &AnswerValue) -> bool {
        match (self.kind, value) {
            (QuestionKind::MultipleChoice, AnswerValue::Choice(index)) => {
                *index < self.options.len()
            }
            (QuestionKind::Essay, AnswerValue::Text(_)) => true,
            _ => false,
        }
    }
}

/// The kind of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionKind {
    MultipleChoice,
    Essay,
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionKind::MultipleChoice => write!(f, "multiple-choice"),
            QuestionKind::Essay => write!(f, "essay"),
        }
    }
}

impl FromStr for QuestionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "multiple-choice" | "multiple_choice" | "mcq" => Ok(QuestionKind::MultipleChoice),
            "essay" => Ok(QuestionKind::Essay),
            other => Err(format!("unknown question kind: {other}")),
        }
    }
}

/// A value entered by the student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerValue {
    /// Index into the question's options.
    Choice(usize),
    /// Free text for essay questions.
    Text(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mcq(id: u32, options: &[&str]) -> Question {
        Question {
            id,
            kind: QuestionKind::MultipleChoice,
            text: format!("question {id}"),
            options: options.iter().map(|s| s.to_string()).collect(),
            correct_answer: Some(0),
        }
    }

    #[test]
    fn question_kind_display_and_parse() {
        assert_eq!(QuestionKind::MultipleChoice.to_string(), "multiple-choice");
        assert_eq!(QuestionKind::Essay.to_string(), "essay");
        assert_eq!(
            "MCQ".parse::<QuestionKind>().unwrap(),
            QuestionKind::MultipleChoice
        );
        assert_eq!("essay".parse::<QuestionKind>().unwrap(), QuestionKind::Essay);
        assert!("true-false".parse::<QuestionKind>().is_err());
    }

    #[test]
    fn accepts_checks_kind_and_range() {
        let q = mcq(1, &["a", "b"]);
        assert!(q.accepts(&AnswerValue::Choice(1)));
        assert!(!q.accepts(&AnswerValue::Choice(2)));
        assert!(!q.accepts(&AnswerValue::Text("a".into())));

        let essay = Question {
            id: 2,
            kind: QuestionKind::Essay,
            text: "explain".into(),
            options: vec![],
            correct_answer: None,
        };
        assert!(essay.accepts(&AnswerValue::Text(String::new())));
        assert!(!essay.accepts(&AnswerValue::Choice(0)));
    }

    #[test]
    fn question_lookup_by_id() {
        let exam = ExamDefinition {
            id: "101".into(),
            title: "Psychology".into(),
            teacher_id: "T001".into(),
            duration_secs: 60,
            instructions: DEFAULT_INSTRUCTIONS.into(),
            questions: vec![mcq(1, &["a", "b"]), mcq(2, &["c", "d"])],
        };
        assert_eq!(exam.question_count(), 2);
        assert_eq!(exam.question(2).unwrap().options[0], "c");
        assert!(exam.question(3).is_none());
    }

    #[test]
    fn instructions_default_when_missing() {
        let json = r#"{"id":"1","title":"t","teacher_id":"x","duration_secs":10}"#;
        let exam: ExamDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(exam.instructions, DEFAULT_INSTRUCTIONS);
        assert!(exam.questions.is_empty());
    }
}
