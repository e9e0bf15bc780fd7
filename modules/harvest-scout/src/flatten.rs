use harvest_client::ClusterEntry;
use harvest_common::{value_to_cell, LeafRecord};
use serde_json::{Map, Value};

use crate::error::MalformedRecordError;

/// Key of the voting-booth list embedded in each cluster entry.
const BOOTH_KEY: &str = "vbs";

/// Display names of the four ancestors above a polling cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ancestry {
    pub region: String,
    pub province: String,
    pub town: String,
    pub barangay: String,
}

/// Flatten one cluster into a leaf record.
///
/// Only the first voting booth is used. Its fields win over cluster fields of
/// the same name.
pub fn flatten_cluster(
    cluster: &ClusterEntry,
    country: &str,
    ancestry: &Ancestry,
) -> Result<LeafRecord, MalformedRecordError> {
    let booth = first_booth(cluster).ok_or_else(|| MalformedRecordError {
        cluster: cluster_label(cluster),
    })?;

    let field = |key: &str| {
        booth
            .get(key)
            .or_else(|| cluster.get(key))
            .map(value_to_cell)
            .unwrap_or_default()
    };

    Ok(LeafRecord {
        country: country.to_string(),
        region: ancestry.region.clone(),
        province: ancestry.province.clone(),
        town: ancestry.town.clone(),
        barangay: ancestry.barangay.clone(),
        ppc: field("ppc"),
        ppcc: field("ppcc"),
        ppn: field("ppn"),
        vbc: field("vbc"),
        pre: field("pre"),
        cpre: field("cpre"),
        url: field("url"),
        kind: field("type"),
        cs: field("cs"),
    })
}

fn first_booth(cluster: &ClusterEntry) -> Option<&Map<String, Value>> {
    cluster
        .get(BOOTH_KEY)?
        .as_array()?
        .first()?
        .as_object()
}

fn cluster_label(cluster: &ClusterEntry) -> String {
    ["ppc", "ppn"]
        .iter()
        .find_map(|key| cluster.get(*key).map(value_to_cell))
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| "<unlabelled>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ancestry() -> Ancestry {
        Ancestry {
            region: "REGION I".into(),
            province: "ILOCOS NORTE".into(),
            town: "BACARRA".into(),
            barangay: "BANI".into(),
        }
    }

    fn entry(value: Value) -> ClusterEntry {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn merges_first_booth_with_ancestors() {
        let cluster = entry(json!({
            "ppc": 1001, "ppcc": "01010001", "ppn": "BANI ES",
            "url": "cluster-level-url",
            "vbs": [
                { "vbc": "0101A", "pre": "0001A", "cpre": "0001A,0002A", "url": "R01/1001", "type": 1, "cs": "ok" },
                { "vbc": "0101B", "url": "ignored" }
            ]
        }));

        let record = flatten_cluster(&cluster, "PH", &ancestry()).unwrap();

        assert_eq!(record.country, "PH");
        assert_eq!(record.region, "REGION I");
        assert_eq!(record.barangay, "BANI");
        assert_eq!(record.ppc, "1001");
        assert_eq!(record.ppn, "BANI ES");
        assert_eq!(record.vbc, "0101A");
        assert_eq!(record.url, "R01/1001");
        assert_eq!(record.kind, "1");
        assert_eq!(record.cs, "ok");
    }

    #[test]
    fn empty_booth_list_is_malformed() {
        let cluster = entry(json!({ "ppc": 1002, "ppn": "EMPTY ES", "vbs": [] }));
        let err = flatten_cluster(&cluster, "PH", &ancestry()).unwrap_err();
        assert_eq!(err.cluster, "1002");
    }

    #[test]
    fn missing_booth_list_is_malformed() {
        let cluster = entry(json!({ "ppn": "NO VBS" }));
        let err = flatten_cluster(&cluster, "PH", &ancestry()).unwrap_err();
        assert_eq!(err.cluster, "NO VBS");
    }

    #[test]
    fn absent_fields_become_empty_cells() {
        let cluster = entry(json!({ "vbs": [{ "url": "X" }] }));
        let record = flatten_cluster(&cluster, "PH", &ancestry()).unwrap();
        assert_eq!(record.url, "X");
        assert_eq!(record.ppc, "");
        assert_eq!(record.cpre, "");
    }
}
