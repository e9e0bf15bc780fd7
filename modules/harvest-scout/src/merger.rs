use std::collections::HashSet;
use std::sync::Arc;

use harvest_client::{Endpoints, TallyRow, TALLY_KEY};
use harvest_common::{value_to_cell, CandidateTable, LeafRecord, TallyRecord};
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::fetcher::Fetcher;
use crate::table::TableWriter;

/// Lifecycle of one record in the merge pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Pending,
    Fetching,
    /// Tally fetched and applied.
    Merged,
    /// Tally unavailable; the record goes out with zero defaults.
    Failed,
}

impl MergeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MergeState::Merged | MergeState::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub merged: usize,
    pub failed: usize,
    /// Target-contest rows naming a candidate missing from the table.
    pub unknown_candidates: usize,
    /// Target-contest rows that could not be decoded.
    pub malformed_rows: usize,
    pub rows_written: usize,
    pub rows_unwritten: usize,
}

/// What applying one tally payload did to a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TallyOutcome {
    pub matched: usize,
    pub unknown: usize,
    pub malformed: usize,
}

struct RecordReport {
    state: MergeState,
    outcome: TallyOutcome,
    written: bool,
}

/// Copy target-contest votes from `rows` into `record`.
///
/// Rows are filtered on their contest code before anything else is read, so
/// rows outside `contests` may have any shape. A target row that does not
/// decode, or that names an unknown candidate, is skipped without touching
/// total or serial.
pub fn apply_tally(
    record: &mut TallyRecord,
    rows: &[Value],
    contests: &HashSet<i64>,
    candidates: &CandidateTable,
) -> TallyOutcome {
    let mut outcome = TallyOutcome::default();

    let targeted = rows
        .iter()
        .filter(|raw| TallyRow::contest_of(raw).is_some_and(|cc| contests.contains(&cc)));
    for raw in targeted {
        let row = match TallyRow::deserialize(raw) {
            Ok(row) => row,
            Err(e) => {
                warn!(url = record.leaf.url.as_str(), error = %e, "Skipping undecodable tally row");
                outcome.malformed += 1;
                continue;
            }
        };
        let Some(pos) = candidates.position(row.bo) else {
            warn!(contest = row.cc, candidate = row.bo, url = record.leaf.url.as_str(), "Unknown candidate in tally");
            outcome.unknown += 1;
            continue;
        };
        record.votes[pos] = row.v;
        record.total = row.tot;
        record.serial = value_to_cell(&row.ser);
        outcome.matched += 1;
    }

    outcome
}

/// Second pass: one task per leaf record, each fetching its tally and
/// appending the enriched row.
pub struct Merger {
    fetcher: Fetcher,
    endpoints: Endpoints,
    candidates: Arc<CandidateTable>,
    contests: HashSet<i64>,
    writer: TableWriter,
}

impl Merger {
    pub fn new(
        fetcher: Fetcher,
        endpoints: Endpoints,
        candidates: Arc<CandidateTable>,
        contests: impl IntoIterator<Item = i64>,
        writer: TableWriter,
    ) -> Self {
        Self {
            fetcher,
            endpoints,
            candidates,
            contests: contests.into_iter().collect(),
            writer,
        }
    }

    /// Merge every record. Consumes the merger so that its table handle is
    /// released when the last task finishes.
    pub async fn run(self: Arc<Self>, records: Vec<LeafRecord>) -> MergeStats {
        let total = records.len();
        info!(records = total, contests = ?self.contests, "Starting tally merge");

        let mut tasks = JoinSet::new();
        for (idx, leaf) in records.into_iter().enumerate() {
            tasks.spawn(self.clone().merge_one(idx + 1, total, leaf));
        }

        let mut stats = MergeStats::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    match report.state {
                        MergeState::Merged => stats.merged += 1,
                        _ => stats.failed += 1,
                    }
                    stats.unknown_candidates += report.outcome.unknown;
                    stats.malformed_rows += report.outcome.malformed;
                    if report.written {
                        stats.rows_written += 1;
                    } else {
                        stats.rows_unwritten += 1;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Merge task panicked");
                    stats.failed += 1;
                    stats.rows_unwritten += 1;
                }
            }
        }

        info!(
            merged = stats.merged,
            failed = stats.failed,
            unknown_candidates = stats.unknown_candidates,
            malformed_rows = stats.malformed_rows,
            rows = stats.rows_written,
            "Tally merge complete"
        );
        stats
    }

    async fn merge_one(self: Arc<Self>, seq: usize, total: usize, leaf: LeafRecord) -> RecordReport {
        let mut state = MergeState::Pending;
        let url = self.endpoints.tally(&leaf.url);
        let mut record = TallyRecord::new(leaf, &self.candidates);
        let mut outcome = TallyOutcome::default();
        debug!(seq, url, ?state, "Record queued");

        state = MergeState::Fetching;
        debug!(seq, url, ?state, "Fetching tally");

        state = match self.fetcher.fetch::<Vec<Value>>(&url, TALLY_KEY).await {
            Ok(rows) => {
                outcome = apply_tally(&mut record, &rows, &self.contests, &self.candidates);
                MergeState::Merged
            }
            Err(e) => {
                warn!(seq, url, error = %e, "Tally unavailable, writing zero defaults");
                MergeState::Failed
            }
        };
        debug_assert!(state.is_terminal());

        let written = match self.writer.append(vec![record.to_row()]).await {
            Ok(_) => true,
            Err(e) => {
                warn!(seq, url, error = %e, "Failed to write merged record");
                false
            }
        };

        info!(seq, total, ?state, "Completed");
        RecordReport {
            state,
            outcome,
            written,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_common::Candidate;
    use serde_json::json;

    fn candidates() -> CandidateTable {
        CandidateTable::new(vec![
            Candidate { id: 1, code: "A".into() },
            Candidate { id: 2, code: "B".into() },
            Candidate { id: 3, code: "C".into() },
        ])
        .unwrap()
    }

    fn row(cc: i64, bo: i64, v: i64, tot: i64) -> Value {
        json!({ "cc": cc, "bo": bo, "v": v, "tot": tot, "ser": "ER-77" })
    }

    #[test]
    fn applies_only_target_contests() {
        let table = candidates();
        let mut record = TallyRecord::new(LeafRecord::default(), &table);
        let contests: HashSet<i64> = [5587].into_iter().collect();

        let outcome = apply_tally(
            &mut record,
            &[row(5587, 1, 10, 15), row(5587, 2, 5, 15), row(9999, 3, 40, 40)],
            &contests,
            &table,
        );

        assert_eq!(outcome, TallyOutcome { matched: 2, unknown: 0, malformed: 0 });
        assert_eq!(record.votes, vec![10, 5, 0]);
        assert_eq!(record.total, 15);
        assert_eq!(record.serial, "ER-77");
    }

    #[test]
    fn unknown_candidate_is_counted_and_skipped() {
        let table = candidates();
        let mut record = TallyRecord::new(LeafRecord::default(), &table);
        let contests: HashSet<i64> = [5587].into_iter().collect();

        let outcome = apply_tally(&mut record, &[row(5587, 42, 10, 99)], &contests, &table);

        assert_eq!(outcome, TallyOutcome { matched: 0, unknown: 1, malformed: 0 });
        assert_eq!(record.votes, vec![0, 0, 0]);
        assert_eq!(record.total, 0);
        assert_eq!(record.serial, "");
    }

    #[test]
    fn only_target_rows_are_decoded() {
        let table = candidates();
        let mut record = TallyRecord::new(LeafRecord::default(), &table);
        let contests: HashSet<i64> = [5587].into_iter().collect();

        let rows = [
            row(5587, 1, 10, 15),
            json!({ "cc": 9999, "v": 3 }),
            json!({ "cc": 5587, "bo": 2, "v": "lots", "tot": 15 }),
            json!("not a row"),
        ];
        let outcome = apply_tally(&mut record, &rows, &contests, &table);

        assert_eq!(outcome, TallyOutcome { matched: 1, unknown: 0, malformed: 1 });
        assert_eq!(record.votes, vec![10, 0, 0]);
        assert_eq!(record.total, 15);
    }

    #[test]
    fn terminal_states() {
        assert!(!MergeState::Pending.is_terminal());
        assert!(!MergeState::Fetching.is_terminal());
        assert!(MergeState::Merged.is_terminal());
        assert!(MergeState::Failed.is_terminal());
    }
}
