//! Entry points for the two passes, wired from a [`Config`].

use std::sync::Arc;

use anyhow::{Context, Result};
use harvest_client::Endpoints;
use harvest_common::{CandidateTable, Config, LeafRecord, TallyRecord};
use tracing::info;

use crate::fetcher::{Fetcher, RetryPolicy};
use crate::merger::{MergeStats, Merger};
use crate::table::{read_records, TableWriter, WriteSummary};
use crate::traits::JsonSource;
use crate::walker::{WalkStats, Walker};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectReport {
    pub walk: WalkStats,
    pub table: WriteSummary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub merge: MergeStats,
    pub table: WriteSummary,
}

fn fetcher(config: &Config, source: Arc<dyn JsonSource>) -> Fetcher {
    Fetcher::new(source, RetryPolicy::from_config(config), config.max_in_flight)
}

fn endpoints(config: &Config) -> Endpoints {
    Endpoints::new(config.regions_url.as_str(), config.results_url.as_str())
}

/// Pass one: walk the hierarchy into the clusters table.
pub async fn collect(config: &Config, source: Arc<dyn JsonSource>) -> Result<CollectReport> {
    let (writer, task) = TableWriter::initialize(&config.clusters_path, &LeafRecord::columns())
        .await
        .with_context(|| format!("Failed to create {}", config.clusters_path.display()))?;

    let walker = Arc::new(Walker::new(
        fetcher(config, source),
        endpoints(config),
        writer,
        config.country.clone(),
    ));
    let walk = walker.run().await;

    let table = task.finish().await.context("Clusters table writer failed")?;
    info!(clusters = table.rows, abandoned = walk.nodes_abandoned, "Collect pass done");
    Ok(CollectReport { walk, table })
}

/// Pass two: read the clusters table back and write the results table.
pub async fn merge(
    config: &Config,
    source: Arc<dyn JsonSource>,
    candidates: Arc<CandidateTable>,
) -> Result<MergeReport> {
    let records: Vec<LeafRecord> = read_records(&config.clusters_path)
        .with_context(|| format!("Failed to read {}", config.clusters_path.display()))?;

    let (writer, task) =
        TableWriter::initialize(&config.results_path, &TallyRecord::columns(&candidates))
            .await
            .with_context(|| format!("Failed to create {}", config.results_path.display()))?;

    let merger = Arc::new(Merger::new(
        fetcher(config, source),
        endpoints(config),
        candidates,
        config.target_contests.iter().copied(),
        writer,
    ));
    let merge = merger.run(records).await;

    let table = task.finish().await.context("Results table writer failed")?;
    info!(rows = table.rows, failed = merge.failed, "Merge pass done");
    Ok(MergeReport { merge, table })
}
