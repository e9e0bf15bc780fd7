use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;

use crate::error::HarvestError;

/// Candidate id as reported in tally rows, and the code used as its column name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Candidate {
    pub id: i64,
    pub code: String,
}

/// Immutable id → display-code table. Loaded once, shared by reference.
///
/// Order is significant: it is the order of the candidate columns in the
/// results table.
#[derive(Debug, Clone)]
pub struct CandidateTable {
    candidates: Vec<Candidate>,
    index: HashMap<i64, usize>,
}

impl CandidateTable {
    pub fn new(candidates: Vec<Candidate>) -> Result<Self, HarvestError> {
        let mut index = HashMap::with_capacity(candidates.len());
        let mut codes = HashSet::with_capacity(candidates.len());

        for (pos, c) in candidates.iter().enumerate() {
            if c.code.trim().is_empty() {
                return Err(HarvestError::Candidates(format!(
                    "candidate {} has an empty code",
                    c.id
                )));
            }
            if index.insert(c.id, pos).is_some() {
                return Err(HarvestError::Candidates(format!(
                    "duplicate candidate id {}",
                    c.id
                )));
            }
            if !codes.insert(c.code.as_str()) {
                return Err(HarvestError::Candidates(format!(
                    "duplicate candidate code {:?}",
                    c.code
                )));
            }
        }

        Ok(Self { candidates, index })
    }

    /// Parse a JSON array of `{"id": .., "code": ..}` objects.
    pub fn from_json(raw: &str) -> Result<Self, HarvestError> {
        let candidates: Vec<Candidate> = serde_json::from_str(raw)
            .map_err(|e| HarvestError::Candidates(format!("invalid candidate JSON: {e}")))?;
        Self::new(candidates)
    }

    pub fn load(path: &Path) -> Result<Self, HarvestError> {
        let raw = std::fs::read_to_string(path)?;
        let table = Self::from_json(&raw)?;
        tracing::info!(path = %path.display(), candidates = table.len(), "Loaded candidate table");
        Ok(table)
    }

    /// Column position of a candidate id.
    pub fn position(&self, id: i64) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn get(&self, id: i64) -> Option<&Candidate> {
        self.position(id).map(|pos| &self.candidates[pos])
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.candidates.iter().map(|c| c.code.as_str())
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_file_order() {
        let table = CandidateTable::from_json(
            r#"[{"id": 30, "code": "ZED"}, {"id": 10, "code": "ALPHA"}]"#,
        )
        .unwrap();
        assert_eq!(table.codes().collect::<Vec<_>>(), vec!["ZED", "ALPHA"]);
        assert_eq!(table.position(10), Some(1));
        assert_eq!(table.get(30).map(|c| c.code.as_str()), Some("ZED"));
        assert!(table.get(99).is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = CandidateTable::from_json(
            r#"[{"id": 1, "code": "A"}, {"id": 1, "code": "B"}]"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate candidate id"));
    }

    #[test]
    fn duplicate_codes_are_rejected() {
        let err = CandidateTable::from_json(
            r#"[{"id": 1, "code": "A"}, {"id": 2, "code": "A"}]"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate candidate code"));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("candidates.json");
        std::fs::write(&path, r#"[{"id": 7, "code": "SEVEN"}]"#).unwrap();
        let table = CandidateTable::load(&path).unwrap();
        assert_eq!(table.len(), 1);
    }
}
