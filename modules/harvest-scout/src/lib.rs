//! Two-pass harvester for the election results site.
//!
//! Pass one walks the region → province → town → barangay hierarchy and
//! writes one row per polling cluster. Pass two reads those rows back, fetches
//! each cluster's tally and writes an enriched copy to a second table.

pub mod error;
pub mod fetcher;
pub mod flatten;
pub mod harvest;
pub mod merger;
pub mod table;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
pub mod walker;

pub use error::{FetchError, MalformedRecordError, TableError};
pub use fetcher::{Fetcher, RetryPolicy};
pub use merger::{MergeState, MergeStats, Merger};
pub use table::{read_records, TableWriter, WriteSummary, WriterTask};
pub use traits::JsonSource;
pub use walker::{HierarchyNode, Level, WalkStats, Walker};
