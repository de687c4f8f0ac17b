//! The `examguard monitor` command.
//!
//! Runs the configured classifiers and warning source back to back, without
//! an exam, and prints what a session would have seen.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use examguard_core::monitoring::{classify_all, SignalKind};
use examguard_providers::config::load_config_from;
use examguard_providers::{create_classifier, create_warning_source};

pub async fn execute(polls: u32, seed: Option<u64>, config_path: Option<PathBuf>) -> Result<()> {
    anyhow::ensure!(polls >= 1, "polls must be at least 1");

    let mut config = load_config_from(config_path.as_deref())?;
    if seed.is_some() {
        config.monitoring.seed = seed;
    }

    let classifier = create_classifier(&config.monitoring)?;
    let warnings = create_warning_source(&config.monitoring)?;
    let timeout = config.monitoring.feed_config().classify_timeout;

    let mut table = Table::new();
    let mut header = vec!["Poll".to_string()];
    header.extend(SignalKind::ALL.iter().map(|k| k.label().to_string()));
    header.extend(["Status".to_string(), "Message".to_string(), "Warning".to_string()]);
    table.set_header(header);

    let mut raised = 0;
    for poll in 1..=polls {
        let snapshot = classify_all(classifier.as_ref(), timeout).await;
        let warning = warnings.poll();
        if warning.is_some() {
            raised += 1;
        }

        let mut row = vec![Cell::new(poll)];
        row.extend(
            SignalKind::ALL
                .iter()
                .map(|&kind| Cell::new(snapshot.severity(kind))),
        );
        row.push(Cell::new(snapshot.status_label()));
        row.push(Cell::new(snapshot.message.as_deref().unwrap_or("-")));
        row.push(Cell::new(warning.as_deref().unwrap_or("-")));
        table.add_row(row);
    }

    println!("{table}");
    println!("\n{polls} poll(s), {raised} warning(s) raised.");

    Ok(())
}
