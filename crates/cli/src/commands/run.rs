//! Run lifecycle commands

use std::time::Duration;

use clap::{Args, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use uiproof_common::Run;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum RunCommands {
    /// Start a run
    Start(StartArgs),

    /// List all runs
    List,

    /// Show a full run record
    Show {
        /// Run id, e.g. CTC110M_demo_1714000000
        run_id: String,
    },

    /// Show the live status of a run
    Status {
        run_id: String,
    },
}

#[derive(Args)]
pub struct StartArgs {
    /// Module code, e.g. CTC110M
    pub module: Option<String>,

    /// Scenario name, e.g. demo
    pub scenario: Option<String>,

    /// Start under an explicit run id instead
    #[arg(long, conflicts_with_all = ["module", "scenario"])]
    pub run_id: Option<String>,

    /// Poll until the run reaches a terminal state
    #[arg(long)]
    pub wait: bool,
}

pub async fn execute(
    cmd: RunCommands,
    client: &ApiClient,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match cmd {
        RunCommands::Start(args) => start(args, client, format).await,
        RunCommands::List => {
            let runs = client.list_runs().await?;
            output::print_list(&runs, format);
            Ok(())
        }
        RunCommands::Show { run_id } => {
            let run = client.get_run(&run_id).await?;
            match format {
                OutputFormat::Table | OutputFormat::Plain => print_run_detail(&run),
                _ => output::print_item(&run, format),
            }
            Ok(())
        }
        RunCommands::Status { run_id } => {
            let snapshot = client.get_status(&run_id).await?;
            println!(
                "{}: {} ({}%)",
                snapshot.run_id,
                colorize_status(&snapshot.status),
                snapshot.progress
            );
            if let Some(error) = snapshot.error {
                output::print_error(&error);
            }
            Ok(())
        }
    }
}

async fn start(args: StartArgs, client: &ApiClient, format: OutputFormat) -> anyhow::Result<()> {
    let receipt = match (&args.run_id, &args.module, &args.scenario) {
        (Some(run_id), _, _) => client.start_run_with_id(run_id).await?,
        (None, Some(module), Some(scenario)) => client.start_run(module, scenario).await?,
        _ => anyhow::bail!("provide MODULE and SCENARIO, or --run-id"),
    };

    output::print_success(&format!("{} ({})", receipt.message, receipt.run_id));
    if !args.wait {
        return Ok(());
    }

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    loop {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let snapshot = client.get_status(&receipt.run_id).await?;
        bar.set_position(snapshot.progress as u64);
        bar.set_message(snapshot.status.clone());
        if snapshot.is_terminal() {
            bar.finish();
            break;
        }
    }

    let run = client.get_run(&receipt.run_id).await?;
    match format {
        OutputFormat::Table | OutputFormat::Plain => print_run_detail(&run),
        _ => output::print_item(&run, format),
    }
    Ok(())
}

fn colorize_status(status: &str) -> String {
    match status {
        "completed" => status.green().to_string(),
        "error" => status.red().to_string(),
        "running" => status.cyan().to_string(),
        _ => status.yellow().to_string(),
    }
}

fn print_run_detail(run: &Run) {
    println!();
    println!("{}", run.run_id.bold());
    println!(
        "  {} {}  {} {}",
        "Module:".dimmed(),
        run.module.as_deref().unwrap_or("-"),
        "Scenario:".dimmed(),
        run.scenario.as_deref().unwrap_or("-"),
    );
    println!(
        "  {} {}  {} {}%",
        "Status:".dimmed(),
        colorize_status(run.status.as_str()),
        "Progress:".dimmed(),
        run.progress
    );
    if let Some(duration) = run.execution_time_seconds {
        println!("  {} {:.1}s", "Duration:".dimmed(), duration);
    }
    if let Some(stats) = &run.stats {
        println!(
            "  {} {} total, {} success, {} error, {} warning ({:.1}%)",
            "Steps:".dimmed(),
            stats.total,
            stats.success,
            stats.error,
            stats.warning,
            stats.success_rate
        );
    }
    if let Some(filename) = &run.filename {
        println!("  {} {}", "Report:".dimmed(), filename);
    }
    if let Some(error) = &run.error {
        println!("  {} {}", "Error:".dimmed(), error.red());
    }
    println!();
    for (i, step) in run.steps.iter().enumerate() {
        println!(
            "  {}. [{}] {}: {}",
            i + 1,
            colorize_status(step.status.as_str()),
            step.description,
            step.result
        );
    }
}

impl TableDisplay for Run {
    fn headers() -> Vec<&'static str> {
        vec![
            "RUN ID", "MODULE", "SCENARIO", "STATUS", "PROGRESS", "SUCCESS", "DURATION", "CREATED",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.run_id.clone(),
            self.module.clone().unwrap_or_else(|| "-".into()),
            self.scenario.clone().unwrap_or_else(|| "-".into()),
            self.status.as_str().to_string(),
            format!("{}%", self.progress),
            match self.success {
                Some(true) => "yes".into(),
                Some(false) => "no".into(),
                None => "-".into(),
            },
            self.execution_time_seconds
                .map(|s| format!("{s:.1}s"))
                .unwrap_or_else(|| "-".into()),
            self.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]
    }
}
