use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Instrument};
use tracing_subscriber::EnvFilter;

use harvest_client::ResultsClient;
use harvest_common::{CandidateTable, Config};
use harvest_scout::{harvest, JsonSource};

#[derive(Parser)]
#[command(name = "harvest", about = "Collect polling clusters and merge their tallies")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Walk the hierarchy and write the clusters table.
    Collect,
    /// Read the clusters table, fetch tallies, write the results table.
    Merge,
    /// Collect, then merge.
    Run,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("harvest=info".parse()?))
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    config.log_summary();

    let run_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("harvest", %run_id);
    execute(cli.command, config).instrument(span).await
}

async fn execute(command: Command, config: Config) -> Result<()> {
    let client = ResultsClient::new(config.request_timeout).context("Failed to build HTTP client")?;
    let source: Arc<dyn JsonSource> = Arc::new(client);

    if matches!(command, Command::Collect | Command::Run) {
        let report = harvest::collect(&config, source.clone()).await?;
        info!(
            rows = report.table.rows,
            nodes = report.walk.nodes_expanded,
            abandoned = report.walk.nodes_abandoned,
            malformed = report.walk.clusters_malformed,
            "Clusters table written"
        );
    }

    if matches!(command, Command::Merge | Command::Run) {
        let candidates = CandidateTable::load(&config.candidates_path)
            .with_context(|| format!("Failed to load {}", config.candidates_path.display()))?;
        let report = harvest::merge(&config, source, Arc::new(candidates)).await?;
        info!(
            rows = report.table.rows,
            merged = report.merge.merged,
            failed = report.merge.failed,
            "Results table written"
        );
    }

    Ok(())
}
