use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::candidates::CandidateTable;

/// Column order of the clusters table.
pub const LEAF_COLUMNS: [&str; 14] = [
    "country", "region", "province", "town", "barangay", "ppc", "ppcc", "ppn", "vbc", "pre",
    "cpre", "url", "type", "cs",
];

/// Columns the results table adds between the leaf columns and the candidates.
pub const TALLY_COLUMNS: [&str; 2] = ["total", "serial"];

/// One polling cluster with its full ancestor path. A row of the clusters table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeafRecord {
    pub country: String,
    pub region: String,
    pub province: String,
    pub town: String,
    pub barangay: String,
    pub ppc: String,
    pub ppcc: String,
    pub ppn: String,
    pub vbc: String,
    pub pre: String,
    pub cpre: String,
    /// Path fragment of the cluster's tally payload.
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub cs: String,
}

impl LeafRecord {
    pub fn columns() -> Vec<String> {
        LEAF_COLUMNS.iter().map(|c| c.to_string()).collect()
    }

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.country.clone(),
            self.region.clone(),
            self.province.clone(),
            self.town.clone(),
            self.barangay.clone(),
            self.ppc.clone(),
            self.ppcc.clone(),
            self.ppn.clone(),
            self.vbc.clone(),
            self.pre.clone(),
            self.cpre.clone(),
            self.url.clone(),
            self.kind.clone(),
            self.cs.clone(),
        ]
    }
}

/// A leaf record enriched with its tally. A row of the results table.
///
/// `votes` is aligned with the candidate table the record was created from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyRecord {
    pub leaf: LeafRecord,
    pub total: i64,
    pub serial: String,
    pub votes: Vec<i64>,
}

impl TallyRecord {
    /// Zero votes for every candidate, zero total, empty serial.
    pub fn new(leaf: LeafRecord, candidates: &CandidateTable) -> Self {
        Self {
            leaf,
            total: 0,
            serial: String::new(),
            votes: vec![0; candidates.len()],
        }
    }

    pub fn columns(candidates: &CandidateTable) -> Vec<String> {
        LEAF_COLUMNS
            .iter()
            .chain(TALLY_COLUMNS.iter())
            .map(|c| c.to_string())
            .chain(candidates.codes().map(str::to_string))
            .collect()
    }

    /// Votes for a candidate code, if the code is a column of this record.
    pub fn votes_for(&self, candidates: &CandidateTable, code: &str) -> Option<i64> {
        candidates
            .codes()
            .position(|c| c == code)
            .and_then(|pos| self.votes.get(pos).copied())
    }

    pub fn to_row(&self) -> Vec<String> {
        let mut row = self.leaf.to_row();
        row.reserve(TALLY_COLUMNS.len() + self.votes.len());
        row.push(self.total.to_string());
        row.push(self.serial.clone());
        row.extend(self.votes.iter().map(|v| v.to_string()));
        row
    }
}

/// Render a JSON scalar as a table cell. Strings are copied verbatim, null is
/// empty, anything else is its JSON text.
pub fn value_to_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
