//! examguard CLI, the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "examguard", version, about = "Timed, proctored exam sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take an exam in the terminal
    Take {
        /// Exam identifier
        #[arg(long)]
        exam: String,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,

        /// Access token (overrides config and EXAMGUARD_TOKEN)
        #[arg(long)]
        token: Option<String>,

        /// Write the session outcome as JSON to this path
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Validate exam TOML files
    Validate {
        /// Path to exam file or directory
        #[arg(long)]
        exam_file: PathBuf,
    },

    /// Create starter config and example exam
    Init,

    /// Run the face verification check on its own
    Verify {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run the proctoring classifiers without an exam
    Monitor {
        /// Number of status polls
        #[arg(long, default_value = "5")]
        polls: u32,

        /// Seed for the simulated detectors
        #[arg(long)]
        seed: Option<u64>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("examguard=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Take {
            exam,
            config,
            token,
            output,
        } => commands::take::execute(exam, config, token, output).await,
        Commands::Validate { exam_file } => commands::validate::execute(exam_file),
        Commands::Init => commands::init::execute(),
        Commands::Verify { config } => commands::verify::execute(config).await,
        Commands::Monitor {
            polls,
            seed,
            config,
        } => commands::monitor::execute(polls, seed, config).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
