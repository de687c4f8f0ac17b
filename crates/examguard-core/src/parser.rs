//! TOML exam definition parser.
//!
//! Loads exam definitions from TOML files and directories, and validates them.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::model::{ExamDefinition, Question, QuestionKind, DEFAULT_INSTRUCTIONS};

/// Intermediate TOML structure for parsing exam files.
#[derive(Debug, Deserialize)]
struct TomlExamFile {
    exam: TomlExamHeader,
    #[serde(default)]
    questions: Vec<TomlQuestion>,
}

#[derive(Debug, Deserialize)]
struct TomlExamHeader {
    id: String,
    title: String,
    teacher_id: String,
    duration_secs: u64,
    #[serde(default)]
    instructions: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlQuestion {
    #[serde(default)]
    id: Option<u32>,
    #[serde(default = "default_kind")]
    kind: String,
    text: String,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    correct_answer: Option<usize>,
}

fn default_kind() -> String {
    "multiple-choice".to_string()
}

/// Parse a single TOML file into an `ExamDefinition`.
pub fn parse_exam(path: &Path) -> Result<ExamDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read exam file: {}", path.display()))?;

    parse_exam_str(&content, path)
}

/// Parse a TOML string into an `ExamDefinition`.
///
/// Questions without an explicit `id` are numbered from 1 in file order.
pub fn parse_exam_str(content: &str, source_path: &Path) -> Result<ExamDefinition> {
    let parsed: TomlExamFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let questions = parsed
        .questions
        .into_iter()
        .enumerate()
        .map(|(index, q)| {
            let kind: QuestionKind = q
                .kind
                .parse()
                .map_err(|e: String| anyhow::anyhow!("{}", e))?;
            Ok(Question {
                id: q.id.unwrap_or(index as u32 + 1),
                kind,
                text: q.text,
                options: q.options,
                correct_answer: q.correct_answer,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ExamDefinition {
        id: parsed.exam.id,
        title: parsed.exam.title,
        teacher_id: parsed.exam.teacher_id,
        duration_secs: parsed.exam.duration_secs,
        instructions: parsed
            .exam
            .instructions
            .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
        questions,
    })
}

/// Recursively load all `.toml` exam files from a directory.
pub fn load_exam_directory(dir: &Path) -> Result<Vec<ExamDefinition>> {
    let mut exams = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            exams.extend(load_exam_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_exam(&path) {
                Ok(exam) => exams.push(exam),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(exams)
}

/// A warning from exam validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The question ID (if applicable).
    pub question_id: Option<u32>,
    /// Warning message.
    pub message: String,
}

/// Validate an exam definition for common issues.
pub fn validate_exam(exam: &ExamDefinition) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    if exam.questions.is_empty() {
        warnings.push(ValidationWarning {
            question_id: None,
            message: "exam has no questions".into(),
        });
    }

    if exam.duration_secs == 0 {
        warnings.push(ValidationWarning {
            question_id: None,
            message: "duration is zero; the exam would submit immediately".into(),
        });
    }

    let mut seen_ids = HashSet::new();
    for question in &exam.questions {
        let id = Some(question.id);

        if !seen_ids.insert(question.id) {
            warnings.push(ValidationWarning {
                question_id: id,
                message: format!("duplicate question ID: {}", question.id),
            });
        }

        if question.text.trim().is_empty() {
            warnings.push(ValidationWarning {
                question_id: id,
                message: "prompt is empty".into(),
            });
        }

        match question.kind {
            QuestionKind::MultipleChoice => {
                if question.options.len() < 2 {
                    warnings.push(ValidationWarning {
                        question_id: id,
                        message: format!(
                            "multiple-choice question needs at least 2 options, has {}",
                            question.options.len()
                        ),
                    });
                }
                match question.correct_answer {
                    Some(index) if index >= question.options.len() => {
                        warnings.push(ValidationWarning {
                            question_id: id,
                            message: format!("correct_answer {index} is out of range"),
                        });
                    }
                    None => warnings.push(ValidationWarning {
                        question_id: id,
                        message: "no correct_answer given".into(),
                    }),
                    _ => {}
                }
            }
            QuestionKind::Essay => {
                if !question.options.is_empty() {
                    warnings.push(ValidationWarning {
                        question_id: id,
                        message: "essay question has options; they will be ignored".into(),
                    });
                }
            }
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const VALID_TOML: &str = r#"
[exam]
id = "psych-101"
title = "Introduction to Psychology"
teacher_id = "T001"
duration_secs = 7200

[[questions]]
kind = "multiple-choice"
text = "Which of the following is NOT a perspective in psychology?"
options = [
    "Behavioral perspective",
    "Cognitive perspective",
    "Mathematical perspective",
    "Psychodynamic perspective",
]
correct_answer = 2

[[questions]]
kind = "essay"
text = "Explain the difference between classical and operant conditioning."
"#;

    #[test]
    fn parse_valid_toml() {
        let exam = parse_exam_str(VALID_TOML, &PathBuf::from("test.toml")).unwrap();
        assert_eq!(exam.id, "psych-101");
        assert_eq!(exam.teacher_id, "T001");
        assert_eq!(exam.duration_secs, 7200);
        assert_eq!(exam.questions.len(), 2);
        assert_eq!(exam.questions[0].id, 1);
        assert_eq!(exam.questions[0].correct_answer, Some(2));
        assert_eq!(exam.questions[1].id, 2);
        assert_eq!(exam.questions[1].kind, QuestionKind::Essay);
        assert_eq!(exam.instructions, DEFAULT_INSTRUCTIONS);
        assert!(validate_exam(&exam).is_empty());
    }

    #[test]
    fn kind_defaults_to_multiple_choice() {
        let toml = r#"
[exam]
id = "x"
title = "X"
teacher_id = "T"
duration_secs = 60

[[questions]]
text = "Pick one"
options = ["a", "b"]
correct_answer = 0
"#;
        let exam = parse_exam_str(toml, &PathBuf::from("test.toml")).unwrap();
        assert_eq!(exam.questions[0].kind, QuestionKind::MultipleChoice);
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let toml = r#"
[exam]
id = "x"
title = "X"
teacher_id = "T"
duration_secs = 60

[[questions]]
kind = "matching"
text = "Match them"
"#;
        let err = parse_exam_str(toml, &PathBuf::from("test.toml")).unwrap_err();
        assert!(err.to_string().contains("unknown question kind"));
    }

    #[test]
    fn validate_reports_structural_problems() {
        let toml = r#"
[exam]
id = "bad"
title = "Bad"
teacher_id = "T"
duration_secs = 0

[[questions]]
id = 1
text = "Only one option"
options = ["lonely"]
correct_answer = 3

[[questions]]
id = 1
kind = "essay"
text = "  "
options = ["stray"]
"#;
        let exam = parse_exam_str(toml, &PathBuf::from("test.toml")).unwrap();
        let messages: Vec<String> = validate_exam(&exam)
            .into_iter()
            .map(|w| w.message)
            .collect();
        assert!(messages.iter().any(|m| m.contains("duration is zero")));
        assert!(messages.iter().any(|m| m.contains("at least 2 options")));
        assert!(messages.iter().any(|m| m.contains("out of range")));
        assert!(messages.iter().any(|m| m.contains("duplicate question ID")));
        assert!(messages.iter().any(|m| m.contains("prompt is empty")));
        assert!(messages.iter().any(|m| m.contains("essay question has options")));
    }

    #[test]
    fn parse_malformed_toml() {
        let bad = "this is not [valid toml }{";
        let result = parse_exam_str(bad, &PathBuf::from("bad.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn load_directory_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.toml"), VALID_TOML).unwrap();
        std::fs::write(dir.path().join("broken.toml"), "not toml [").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let exams = load_exam_directory(dir.path()).unwrap();
        assert_eq!(exams.len(), 1);
        assert_eq!(exams[0].id, "psych-101");
    }
}
