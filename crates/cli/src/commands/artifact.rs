//! Artifact commands

use std::path::PathBuf;

use clap::{Args, Subcommand};
use uiproof_common::ArtifactMeta;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum ArtifactCommands {
    /// List stored artifacts
    List,

    /// Download an artifact by id
    Download(DownloadArgs),

    /// Download the latest artifact with a given filename
    Fetch(FetchArgs),
}

#[derive(Args)]
pub struct DownloadArgs {
    /// Artifact id
    pub id: String,

    /// Output path (defaults to the stored filename)
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct FetchArgs {
    /// Stored filename, e.g. report_20260830_101500.pdf
    pub filename: String,

    /// Output path (defaults to the filename)
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

pub async fn execute(
    cmd: ArtifactCommands,
    client: &ApiClient,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match cmd {
        ArtifactCommands::List => {
            let artifacts = client.list_artifacts().await?;
            output::print_list(&artifacts, format);
            Ok(())
        }
        ArtifactCommands::Download(args) => {
            let artifacts = client.list_artifacts().await?;
            let meta = artifacts.iter().find(|a| a.id == args.id);
            let payload = client.download(&args.id).await?;
            let path = args.output.unwrap_or_else(|| {
                meta.map(|m| PathBuf::from(&m.filename))
                    .unwrap_or_else(|| PathBuf::from(&args.id))
            });
            std::fs::write(&path, payload)?;
            output::print_success(&format!("Saved {}", path.display()));
            Ok(())
        }
        ArtifactCommands::Fetch(args) => {
            let payload = client.download_by_name(&args.filename).await?;
            let path = args
                .output
                .unwrap_or_else(|| PathBuf::from(&args.filename));
            std::fs::write(&path, payload)?;
            output::print_success(&format!("Saved {}", path.display()));
            Ok(())
        }
    }
}

impl TableDisplay for ArtifactMeta {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "FILENAME", "TYPE", "SIZE", "SHA256", "CREATED"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.filename.clone(),
            self.content_type.clone(),
            format!("{} B", self.size),
            self.sha256.chars().take(12).collect(),
            self.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]
    }
}
