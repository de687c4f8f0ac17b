//! The `examguard verify` command, and the identity check `take` runs first.

use std::path::PathBuf;

use anyhow::{Context, Result};

use examguard_core::verification::{
    run_verification, VerificationObserver, VerificationOutcome, VerificationState,
};
use examguard_providers::config::{load_config_from, VerificationSettings};
use examguard_providers::create_verifier;

/// Prints the check's progress to stdout.
struct ConsoleVerification;

impl VerificationObserver for ConsoleVerification {
    fn on_state_change(&self, from: VerificationState, to: VerificationState) {
        match to {
            VerificationState::Capturing => {
                println!("Stay still, capturing your image...");
            }
            VerificationState::Verifying => println!("Verifying your identity..."),
            VerificationState::Success => println!("Verification successful!"),
            VerificationState::Initial if from == VerificationState::Failed => {
                println!("Trying again.");
            }
            _ => {}
        }
    }

    fn on_countdown(&self, remaining: u32) {
        if remaining > 0 {
            println!("  {remaining}");
        }
    }

    fn on_attempt_failed(&self, attempt: u32, message: &str) {
        println!("Verification failed (attempt {attempt}): {message}");
    }
}

/// Run the identity check described by `settings`. Errors when it fails.
pub async fn check(settings: &VerificationSettings) -> Result<VerificationOutcome> {
    let verifier = create_verifier(settings)?;
    println!("Face verification");
    println!(
        "Position your face in the frame and ensure good lighting for accurate verification."
    );

    let outcome = run_verification(
        verifier.as_ref(),
        &settings.flow_config(),
        &ConsoleVerification,
    )
    .await
    .context("identity check did not complete")?;

    tracing::info!(
        state = %outcome.state,
        attempts = outcome.attempts,
        "identity check finished"
    );
    if !outcome.verified() {
        anyhow::bail!(
            "identity not verified after {} attempt(s): {}",
            outcome.attempts,
            outcome.message.as_deref().unwrap_or("no verdict")
        );
    }
    Ok(outcome)
}

pub async fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    check(&config.verification).await?;
    Ok(())
}
