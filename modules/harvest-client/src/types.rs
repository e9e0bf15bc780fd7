use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Top-level key holding the child listing of a country/region/province/town node.
pub const HIERARCHY_KEY: &str = "srs";
/// Top-level key holding the polling clusters of a barangay.
pub const CLUSTER_KEY: &str = "pps";
/// Top-level key holding the tally rows of a cluster.
pub const TALLY_KEY: &str = "rs";

/// One child in a `srs` listing. The listing itself is an object keyed by the
/// child's code.
#[derive(Debug, Clone, Deserialize)]
pub struct HierarchyEntry {
    /// Path fragment of the child's own listing, relative to the regions base.
    pub url: String,
    /// Display name.
    pub rn: String,
}

/// Polling cluster entry from a `pps` listing. Kept loose: the cluster
/// metadata is copied through to the output verbatim and only the embedded
/// `vbs` list has structure we depend on.
pub type ClusterEntry = Map<String, Value>;

/// One row of a cluster's tally payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TallyRow {
    /// Contest code.
    #[serde(deserialize_with = "lenient_i64")]
    pub cc: i64,
    /// Candidate id.
    #[serde(deserialize_with = "lenient_i64")]
    pub bo: i64,
    /// Votes for the candidate.
    #[serde(deserialize_with = "lenient_i64")]
    pub v: i64,
    /// Total reported for the contest.
    #[serde(deserialize_with = "lenient_i64")]
    pub tot: i64,
    /// Election return serial.
    #[serde(default)]
    pub ser: Value,
}

impl TallyRow {
    /// Contest code of a raw `rs` row, read without decoding the rest of it.
    pub fn contest_of(row: &Value) -> Option<i64> {
        match row.get("cc")? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Accepts `12`, `"12"` and `null` (as 0). The API is not consistent about
/// quoting numbers.
fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom(format!("not an integer: {n}"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("not an integer: {s:?}"))),
        Value::Null => Ok(0),
        other => Err(serde::de::Error::custom(format!(
            "expected integer, got {other}"
        ))),
    }
}
