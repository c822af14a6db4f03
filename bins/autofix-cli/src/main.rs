mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "autofix-cli")]
#[command(about = "Autofix CLI - Generate, run and repair code against a remote sandbox", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the generate/execute/repair loop for a task
    Run {
        /// Task description sent to the code generator
        #[arg(short, long)]
        prompt: String,

        /// Target language (e.g., python, javascript, go)
        #[arg(short, long, default_value = "python")]
        language: String,

        /// Maximum number of sandbox executions (defaults to AUTOFIX_MAX_RETRIES)
        #[arg(short, long)]
        max_retries: Option<u32>,

        /// File with extra context for the generator
        #[arg(long)]
        context_file: Option<PathBuf>,

        /// File with an architecture blueprint
        #[arg(long)]
        blueprint_file: Option<PathBuf>,

        /// Print the outcome as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Execute a single source file in the sandbox
    Exec {
        /// Source file to run
        #[arg(short, long)]
        file: PathBuf,

        /// Language (inferred from the file extension when omitted)
        #[arg(short, long)]
        language: Option<String>,

        /// File whose contents are passed as stdin
        #[arg(long)]
        stdin_file: Option<PathBuf>,
    },

    /// List configured sandbox runtimes
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let succeeded = match cli.command {
        Commands::Run {
            prompt,
            language,
            max_retries,
            context_file,
            blueprint_file,
            json,
        } => {
            commands::run_autofix(
                &prompt,
                &language,
                max_retries,
                context_file.as_deref(),
                blueprint_file.as_deref(),
                json,
            )
            .await?
        }
        Commands::Exec {
            file,
            language,
            stdin_file,
        } => commands::exec_file(&file, language.as_deref(), stdin_file.as_deref()).await?,
        Commands::Languages => {
            commands::list_languages()?;
            true
        }
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
