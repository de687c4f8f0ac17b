//! The `examguard init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("examguard.toml").exists() {
        println!("examguard.toml already exists, skipping.");
    } else {
        std::fs::write("examguard.toml", SAMPLE_CONFIG)?;
        println!("Created examguard.toml");
    }

    std::fs::create_dir_all("exams")?;
    let example_path = std::path::Path::new("exams/example.toml");
    if example_path.exists() {
        println!("exams/example.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, EXAMPLE_EXAM)?;
        println!("Created exams/example.toml");
    }

    println!("\nNext steps:");
    println!("  1. Run: examguard validate --exam-file exams/example.toml");
    println!("  2. Run: examguard take --exam example");
    println!("  3. To use an exam server, set [backend] type = \"http\" and EXAMGUARD_TOKEN");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# examguard configuration

[backend]
type = "file"
exams_dir = "./exams"
outbox_dir = "./examguard-outbox"

# [backend]
# type = "http"
# base_url = "https://exams.example.edu"
# token = "${EXAMGUARD_TOKEN}"
# timeout_secs = 30

[session]
submit_timeout_secs = 30

[monitoring]
status_interval_secs = 5
warning_interval_secs = 20
classify_timeout_ms = 2000
warning_display_secs = 5
ok_weight = 0.7
warning_weight = 0.2
warning_probability = 0.3

[verification]
enabled = true
countdown_secs = 3
max_attempts = 3
verify_timeout_secs = 10
match_probability = 0.95
verify_delay_ms = 2000
"#;

const EXAMPLE_EXAM: &str = r#"[exam]
id = "example"
title = "Example Exam"
teacher_id = "T000"
duration_secs = 600

[[questions]]
kind = "multiple-choice"
text = "Which of these is a prime number?"
options = ["4", "6", "7", "9"]
correct_answer = 2

[[questions]]
kind = "multiple-choice"
text = "What is the boiling point of water at sea level?"
options = ["90 °C", "100 °C", "110 °C"]
correct_answer = 1

[[questions]]
kind = "essay"
text = "Describe one thing you learned this week."
"#;
