use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use harvest_client::{Endpoints, HierarchyEntry, CLUSTER_KEY, HIERARCHY_KEY};
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::fetcher::Fetcher;
use crate::flatten::{flatten_cluster, Ancestry};
use crate::table::TableWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Synthetic root; its listing is `root.json`.
    Country,
    Region,
    Province,
    Town,
    Barangay,
    Cluster,
}

impl Level {
    pub fn child(self) -> Option<Level> {
        match self {
            Level::Country => Some(Level::Region),
            Level::Region => Some(Level::Province),
            Level::Province => Some(Level::Town),
            Level::Town => Some(Level::Barangay),
            Level::Barangay => Some(Level::Cluster),
            Level::Cluster => None,
        }
    }

    /// Payload key holding this level's children.
    pub fn listing_key(self) -> Option<&'static str> {
        match self {
            Level::Country | Level::Region | Level::Province | Level::Town => Some(HIERARCHY_KEY),
            Level::Barangay => Some(CLUSTER_KEY),
            Level::Cluster => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyNode {
    pub id: String,
    pub name: String,
    /// Path fragment of this node's own listing.
    pub url: String,
    pub level: Level,
}

impl HierarchyNode {
    pub fn root() -> Self {
        Self {
            id: "root".to_string(),
            name: String::new(),
            url: "root".to_string(),
            level: Level::Country,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkStats {
    /// Listings fetched and scheduled.
    pub nodes_expanded: usize,
    /// Listings given up on after retries, undecodable listing entries, or
    /// sub-walks that panicked.
    pub nodes_abandoned: usize,
    pub clusters_written: usize,
    pub clusters_malformed: usize,
    /// Well-formed clusters whose batch the table refused.
    pub clusters_unwritten: usize,
}

impl AddAssign for WalkStats {
    fn add_assign(&mut self, other: Self) {
        self.nodes_expanded += other.nodes_expanded;
        self.nodes_abandoned += other.nodes_abandoned;
        self.clusters_written += other.clusters_written;
        self.clusters_malformed += other.clusters_malformed;
        self.clusters_unwritten += other.clusters_unwritten;
    }
}

/// Recursive hierarchy walk. Every child listing is expanded in its own task;
/// a node completes when all of its children have.
pub struct Walker {
    fetcher: Fetcher,
    endpoints: Endpoints,
    writer: TableWriter,
    country: String,
}

impl Walker {
    pub fn new(fetcher: Fetcher, endpoints: Endpoints, writer: TableWriter, country: String) -> Self {
        Self {
            fetcher,
            endpoints,
            writer,
            country,
        }
    }

    /// Walk the whole tree from `root.json`. Consumes the walker so that its
    /// table handle is released when the walk ends.
    pub async fn run(self: Arc<Self>) -> WalkStats {
        info!(root = %self.endpoints.root(), "Starting hierarchy walk");
        let stats = self.walk(HierarchyNode::root(), Ancestry::default()).await;
        info!(
            nodes = stats.nodes_expanded,
            abandoned = stats.nodes_abandoned,
            clusters = stats.clusters_written,
            malformed = stats.clusters_malformed,
            unwritten = stats.clusters_unwritten,
            "Hierarchy walk complete"
        );
        stats
    }

    /// Boxed so the recursion through spawned sub-walks has a nameable type.
    pub fn walk(self: Arc<Self>, node: HierarchyNode, ancestry: Ancestry) -> BoxFuture<'static, WalkStats> {
        async move {
            match node.level {
                Level::Barangay => self.collect_clusters(node, ancestry).await,
                Level::Cluster => WalkStats::default(),
                _ => self.expand(node, ancestry).await,
            }
        }
        .boxed()
    }

    async fn expand(self: Arc<Self>, node: HierarchyNode, ancestry: Ancestry) -> WalkStats {
        let mut stats = WalkStats::default();
        let (Some(child_level), Some(key)) = (node.level.child(), node.level.listing_key()) else {
            return stats;
        };

        let url = self.endpoints.node(&node.url);
        let listing: BTreeMap<String, Value> = match self.fetcher.fetch(&url, key).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(url, level = ?node.level, node = node.id.as_str(), error = %e, "Abandoning subtree");
                stats.nodes_abandoned += 1;
                return stats;
            }
        };
        stats.nodes_expanded += 1;
        debug!(url, level = ?node.level, children = listing.len(), "Expanding node");

        let below = descend(&ancestry, &node);
        let mut subwalks = JoinSet::new();
        for (id, raw) in listing {
            let entry = match HierarchyEntry::deserialize(&raw) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(url, child = id.as_str(), error = %e, "Skipping undecodable listing entry");
                    stats.nodes_abandoned += 1;
                    continue;
                }
            };
            let child = HierarchyNode {
                id,
                name: entry.rn,
                url: entry.url,
                level: child_level,
            };
            subwalks.spawn(self.clone().walk(child, below.clone()));
        }

        while let Some(joined) = subwalks.join_next().await {
            match joined {
                Ok(child_stats) => stats += child_stats,
                Err(e) => {
                    warn!(parent = node.id.as_str(), error = %e, "Sub-walk panicked");
                    stats.nodes_abandoned += 1;
                }
            }
        }

        stats
    }

    /// Barangay level: fetch the clusters, flatten each, append them as one batch.
    async fn collect_clusters(self: Arc<Self>, node: HierarchyNode, ancestry: Ancestry) -> WalkStats {
        let mut stats = WalkStats::default();
        let url = self.endpoints.node(&node.url);

        let clusters: Vec<Value> = match self.fetcher.fetch(&url, CLUSTER_KEY).await {
            Ok(clusters) => clusters,
            Err(e) => {
                warn!(url, barangay = node.name.as_str(), error = %e, "Abandoning barangay");
                stats.nodes_abandoned += 1;
                return stats;
            }
        };
        stats.nodes_expanded += 1;

        let lineage = descend(&ancestry, &node);
        let mut rows = Vec::with_capacity(clusters.len());
        for raw in &clusters {
            let Some(cluster) = raw.as_object() else {
                warn!(barangay = node.name.as_str(), "Skipping cluster entry that is not an object");
                stats.clusters_malformed += 1;
                continue;
            };
            match flatten_cluster(cluster, &self.country, &lineage) {
                Ok(record) => rows.push(record.to_row()),
                Err(e) => {
                    warn!(barangay = node.name.as_str(), error = %e, "Skipping malformed cluster");
                    stats.clusters_malformed += 1;
                }
            }
        }

        if rows.is_empty() {
            return stats;
        }

        let count = rows.len();
        match self.writer.append(rows).await {
            Ok(_) => {
                stats.clusters_written += count;
                info!(
                    town = lineage.town.as_str(),
                    barangay = lineage.barangay.as_str(),
                    clusters = count,
                    "Clusters written"
                );
            }
            Err(e) => {
                warn!(barangay = node.name.as_str(), error = %e, "Failed to write clusters");
                stats.clusters_unwritten += count;
            }
        }

        stats
    }
}

/// Ancestry of `node`'s children.
fn descend(ancestry: &Ancestry, node: &HierarchyNode) -> Ancestry {
    let mut next = ancestry.clone();
    let name = node.name.clone();
    match node.level {
        Level::Region => next.region = name,
        Level::Province => next.province = name,
        Level::Town => next.town = name,
        Level::Barangay => next.barangay = name,
        Level::Country | Level::Cluster => {}
    }
    next
}
