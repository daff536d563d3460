//! UiProof CLI - Main Entry Point
//!
//! Command-line interface for starting UI test runs, inspecting their
//! records and downloading the generated reports and recordings.

use clap::{Parser, Subcommand};
use colored::Colorize;

mod client;
mod commands;
mod output;

use commands::{artifact, run};

/// UiProof - UI regression test harness
#[derive(Parser)]
#[command(name = "uiproof")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Daemon API address
    #[arg(long, default_value = "http://127.0.0.1:6090", global = true, env = "UIPROOF_API")]
    api_addr: String,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage test runs
    #[command(subcommand)]
    Run(run::RunCommands),

    /// Inspect and download artifacts
    #[command(subcommand)]
    Artifact(artifact::ArtifactCommands),

    /// Remove orphaned and duplicate run records
    Sweep,

    /// Check daemon status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let client = client::ApiClient::new(&cli.api_addr);

    let result = match cli.command {
        Commands::Run(cmd) => run::execute(cmd, &client, cli.format).await,
        Commands::Artifact(cmd) => artifact::execute(cmd, &client, cli.format).await,
        Commands::Sweep => {
            let report = client.sweep().await?;
            output::print_success(&format!(
                "Sweep removed {} orphaned and {} duplicate record(s)",
                report.orphans_removed, report.duplicates_removed
            ));
            Ok(())
        }
        Commands::Status => {
            let health = client.health().await?;
            let busy = health["busy"].as_bool().unwrap_or(false);
            println!(
                "Daemon {} (version {}), {}",
                "ok".green(),
                health["version"].as_str().unwrap_or("?"),
                if busy {
                    "a run is in progress".cyan().to_string()
                } else {
                    "idle".to_string()
                }
            );
            Ok(())
        }
    };

    if let Err(e) = result {
        output::print_error(&e.to_string());
        std::process::exit(1);
    }
    Ok(())
}
