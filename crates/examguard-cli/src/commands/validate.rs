//! The `examguard validate` command.

use std::path::PathBuf;

use anyhow::Result;

use examguard_core::clock::format_remaining;
use examguard_core::parser;

pub fn execute(exam_path: PathBuf) -> Result<()> {
    let exams = if exam_path.is_dir() {
        parser::load_exam_directory(&exam_path)?
    } else {
        vec![parser::parse_exam(&exam_path)?]
    };

    let mut total_warnings = 0;

    for exam in &exams {
        println!(
            "Exam: {} [{}] ({} questions, {})",
            exam.title,
            exam.id,
            exam.question_count(),
            format_remaining(exam.duration_secs)
        );

        let warnings = parser::validate_exam(exam);
        for w in &warnings {
            let prefix = w
                .question_id
                .map(|id| format!("  [Q{id}]"))
                .unwrap_or_else(|| "  ".to_string());
            println!("{prefix} WARNING: {}", w.message);
        }
        total_warnings += warnings.len();
    }

    if total_warnings == 0 {
        println!("All exams valid.");
    } else {
        println!("\n{total_warnings} warning(s) found.");
    }

    Ok(())
}
