//! The `examguard take` command.
//!
//! Runs one exam attempt in the terminal. Commands are read from stdin one
//! per line; the question view goes to stdout, proctoring notices to stderr.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};
use tokio::sync::mpsc;

use examguard_core::answers::QuestionStatus;
use examguard_core::clock::format_remaining;
use examguard_core::driver::{
    CompletionHandoff, SessionDriver, SessionObserver, SessionOutcome, SessionRequest,
};
use examguard_core::error::SessionError;
use examguard_core::model::{AnswerValue, ExamDefinition, QuestionKind};
use examguard_core::monitoring::{MonitorSnapshot, Severity, WarningNotice};
use examguard_core::session::{ExamSession, SessionState, UserCommand};
use examguard_core::traits::Credential;
use examguard_providers::config::{load_config_from, BackendConfig};
use examguard_providers::{create_backend, create_classifier, create_warning_source};

const HELP: &str = "\
Commands:
  n, next        next question
  p, prev        previous question
  g <n>          go to question n
  a <n>          select option n
  w <text>       write an essay answer
  f              flag / unflag the current question
  s              submit (asks for confirmation)
  y              confirm submission
  c              cancel submission
  q              quit without submitting
  ?              show this help";

/// What a line of input asks for.
#[derive(Debug, PartialEq)]
enum Input {
    Command(UserCommand),
    Help,
}

/// Parse one line of room input. Question and option numbers are 1-based.
fn parse_input(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let number = |what: &str| -> Result<usize, String> {
        match rest.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(n - 1),
            _ => Err(format!("expected a {what} number starting at 1, got '{rest}'")),
        }
    };

    let command = match word.to_lowercase().as_str() {
        "n" | "next" => UserCommand::Next,
        "p" | "prev" => UserCommand::Previous,
        "g" | "go" => UserCommand::GoTo(number("question")?),
        "a" | "answer" => UserCommand::SelectOption(number("option")?),
        "w" | "write" => UserCommand::WriteEssay(rest.to_string()),
        "f" | "flag" => UserCommand::ToggleFlag,
        "s" | "submit" => UserCommand::RequestSubmit,
        "y" | "yes" => UserCommand::ConfirmSubmit,
        "c" | "cancel" => UserCommand::CancelSubmit,
        "q" | "quit" => UserCommand::Quit,
        "?" | "h" | "help" => return Ok(Some(Input::Help)),
        other => return Err(format!("unknown command '{other}', type ? for help")),
    };
    Ok(Some(Input::Command(command)))
}

/// Forward stdin lines as commands until EOF.
///
/// Runs on a plain thread: a blocking stdin read cannot be cancelled, and the
/// process should be free to exit while one is pending.
fn spawn_input_reader(tx: mpsc::UnboundedSender<UserCommand>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match parse_input(&line) {
                Ok(Some(Input::Command(command))) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                Ok(Some(Input::Help)) => println!("{HELP}"),
                Ok(None) => {}
                Err(message) => eprintln!("  {message}"),
            }
        }
    });
}

/// Console session observer.
#[derive(Default)]
struct ConsoleObserver {
    remaining: AtomicU64,
}

impl ConsoleObserver {
    fn render_question(&self, session: &ExamSession) {
        let (Some(exam), Some(question)) = (session.exam(), session.current_question()) else {
            return;
        };
        let summary = session.summary();
        let remaining = format_remaining(self.remaining.load(Ordering::Relaxed));

        println!();
        println!(
            "Question {} of {}  [{remaining}]  answered {}/{}",
            session.current_index() + 1,
            exam.question_count(),
            summary.answered_count,
            summary.question_count
        );
        let grid: String = summary
            .statuses
            .iter()
            .enumerate()
            .map(|(i, status)| {
                let mark = match status {
                    QuestionStatus::Answered => '*',
                    QuestionStatus::Flagged => '!',
                    QuestionStatus::Unanswered => '.',
                };
                if i == session.current_index() {
                    format!("[{mark}]")
                } else {
                    format!(" {mark} ")
                }
            })
            .collect();
        println!("{grid}");
        let flag = if session.answers().is_flagged(question.id) {
            "  (flagged)"
        } else {
            ""
        };
        println!("{}{flag}", question.text);

        let current = session.answers().answer(question.id);
        match question.kind {
            QuestionKind::MultipleChoice => {
                for (i, option) in question.options.iter().enumerate() {
                    let selected = matches!(current, Some(AnswerValue::Choice(c)) if *c == i);
                    let marker = if selected { "(x)" } else { "( )" };
                    println!("  {marker} {}. {option}", i + 1);
                }
            }
            QuestionKind::Essay => match current {
                Some(AnswerValue::Text(text)) => println!("  Your answer: {text}"),
                _ => println!("  (type: w <your answer>)"),
            },
        }
    }

    fn render_confirmation(&self, session: &ExamSession) {
        let summary = session.summary();
        println!();
        println!("Submit exam?");
        println!(
            "  Answered {} of {} questions, {} flagged for review.",
            summary.answered_count, summary.question_count, summary.flagged_count
        );
        if summary.answered_count < summary.question_count {
            println!(
                "  {} question(s) are still unanswered.",
                summary.question_count - summary.answered_count
            );
        }
        println!("  y = submit, c = keep working");
    }
}

impl SessionObserver for ConsoleObserver {
    fn on_state_change(&self, from: SessionState, to: SessionState) {
        tracing::debug!(%from, %to, "session state changed");
        if to == SessionState::Submitting && from != SessionState::ConfirmingSubmit {
            println!("\nTime is up. Submitting your answers...");
        } else if to == SessionState::Submitting {
            println!("\nSubmitting your answers...");
        }
    }

    fn on_exam_loaded(&self, exam: &ExamDefinition) {
        self.remaining.store(exam.duration_secs, Ordering::Relaxed);
        println!("{}", exam.title);
        println!(
            "{} questions, {} allowed",
            exam.question_count(),
            format_remaining(exam.duration_secs)
        );
        println!("{}", exam.instructions);
        println!("Type ? for help.");
    }

    fn on_tick(&self, remaining_secs: u64) {
        self.remaining.store(remaining_secs, Ordering::Relaxed);
        if remaining_secs > 0 && (remaining_secs % 300 == 0 || remaining_secs <= 10) {
            eprintln!("  [{}] remaining", format_remaining(remaining_secs));
        }
    }

    fn on_status(&self, snapshot: &MonitorSnapshot) {
        if snapshot.overall > Severity::Ok {
            let message = snapshot.message.as_deref().unwrap_or_default();
            eprintln!("  [{}] {message}", snapshot.status_label());
        }
    }

    fn on_warning(&self, notice: &WarningNotice) {
        eprintln!("  WARNING #{}: {}", notice.sequence, notice.message);
    }

    fn on_command_rejected(&self, error: &SessionError) {
        eprintln!("  {error}");
    }

    fn on_view(&self, session: &ExamSession) {
        match session.state() {
            SessionState::InProgress => self.render_question(session),
            SessionState::ConfirmingSubmit => self.render_confirmation(session),
            _ => {}
        }
    }

    fn on_complete(&self, handoff: &CompletionHandoff) {
        if handoff.acknowledged {
            println!("Exam submitted.");
        } else {
            println!("Exam closed. The submission was not acknowledged by the server.");
        }
    }

    fn on_not_found(&self, exam_id: &str) {
        println!("Exam '{exam_id}' was not found.");
    }
}

pub async fn execute(
    exam_id: String,
    config_path: Option<PathBuf>,
    token: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;

    let token = token
        .or_else(|| config.token().map(str::to_string))
        .unwrap_or_default();
    if matches!(config.backend, BackendConfig::Http { .. }) && token.is_empty() {
        anyhow::bail!("the http backend needs a token: pass --token or set EXAMGUARD_TOKEN");
    }

    let backend = create_backend(&config.backend).context("failed to create backend")?;

    if config.verification.enabled {
        super::verify::check(&config.verification).await?;
    } else {
        tracing::debug!("identity check disabled");
    }

    let driver = SessionDriver::new(
        backend,
        create_classifier(&config.monitoring)?,
        create_warning_source(&config.monitoring)?,
        config.driver_config(),
    );

    let (tx, rx) = mpsc::unbounded_channel();
    spawn_input_reader(tx);

    let request = SessionRequest {
        exam_id: exam_id.clone(),
        credential: Credential::new(token),
    };
    let outcome = driver.run(request, rx, &ConsoleObserver::default()).await?;

    print_summary(&outcome);

    if let Some(path) = &output {
        outcome.save_json(path)?;
        eprintln!("Outcome saved to: {}", path.display());
    }

    if outcome.state == SessionState::NotFound {
        anyhow::bail!("exam '{exam_id}' not found");
    }

    Ok(())
}

fn print_summary(outcome: &SessionOutcome) {
    let mut table = Table::new();
    table.set_header(vec!["Exam", "State", "Trigger", "Answered", "Flagged", "Warnings", "Score"]);

    let (answered, flagged) = match &outcome.summary {
        Some(s) => (
            format!("{}/{}", s.answered_count, s.question_count),
            s.flagged_count.to_string(),
        ),
        None => ("-".to_string(), "-".to_string()),
    };
    table.add_row(vec![
        Cell::new(outcome.exam_title.as_deref().unwrap_or(&outcome.exam_id)),
        Cell::new(outcome.state),
        Cell::new(
            outcome
                .trigger
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
        Cell::new(answered),
        Cell::new(flagged),
        Cell::new(outcome.warning_count),
        Cell::new(
            outcome
                .score()
                .map(|s| format!("{s}"))
                .unwrap_or_else(|| "-".to_string()),
        ),
    ]);

    println!("\n{table}");
}
