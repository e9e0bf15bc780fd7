//! Append-only CSV tables shared by many concurrent producers.
//!
//! One blocking task owns the file. Producers hold cloneable [`TableWriter`]
//! handles and send whole batches over a channel; a batch is written and
//! flushed before its producer is acknowledged, so rows from different
//! batches never interleave.
//!
//! Each batch is encoded in memory and handed to the file in a single write.
//! Nothing from a batch lingers in a buffer after its producer was told it
//! failed. An I/O error in the middle of that write can still leave a torn
//! tail on disk.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::TableError;

/// Batches waiting for the writer before producers start to wait.
const QUEUE_DEPTH: usize = 1024;

struct Batch {
    rows: Vec<Vec<String>>,
    done: oneshot::Sender<Result<usize, TableError>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub batches: usize,
    pub rows: usize,
}

/// Producer handle. Clone freely; the table closes when the last clone drops.
#[derive(Clone)]
pub struct TableWriter {
    tx: mpsc::Sender<Batch>,
    width: usize,
}

/// The writer task. Join it after every [`TableWriter`] clone is gone.
pub struct WriterTask {
    handle: JoinHandle<Result<WriteSummary, TableError>>,
    path: PathBuf,
}

impl TableWriter {
    /// Create or truncate `path`, write `headers`, and start the writer task.
    pub async fn initialize(
        path: &Path,
        headers: &[String],
    ) -> Result<(TableWriter, WriterTask), TableError> {
        let header = encode(&[headers.to_vec()])?;
        let target = path.to_path_buf();
        let out = tokio::task::spawn_blocking(move || create(&target, &header))
            .await
            .map_err(|e| TableError::Task(e.to_string()))??;

        let width = headers.len();
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let handle = tokio::task::spawn_blocking(move || drain(out, rx));

        info!(path = %path.display(), columns = width, "Table initialized");
        Ok((
            TableWriter { tx, width },
            WriterTask {
                handle,
                path: path.to_path_buf(),
            },
        ))
    }

    /// Number of columns every row must have.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Persist a batch. Resolves once the rows are flushed.
    ///
    /// A batch containing any row of the wrong width is rejected whole.
    pub async fn append(&self, rows: Vec<Vec<String>>) -> Result<usize, TableError> {
        if let Some(bad) = rows.iter().find(|row| row.len() != self.width) {
            return Err(TableError::Width {
                expected: self.width,
                found: bad.len(),
            });
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let (done, ack) = oneshot::channel();
        self.tx
            .send(Batch { rows, done })
            .await
            .map_err(|_| TableError::Closed)?;
        ack.await.map_err(|_| TableError::Closed)?
    }
}

impl WriterTask {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the writer to drain and close the file.
    pub async fn finish(self) -> Result<WriteSummary, TableError> {
        let summary = self
            .handle
            .await
            .map_err(|e| TableError::Task(e.to_string()))??;
        info!(
            path = %self.path.display(),
            batches = summary.batches,
            rows = summary.rows,
            "Table closed"
        );
        Ok(summary)
    }
}

fn create(path: &Path, header: &[u8]) -> Result<File, TableError> {
    let mut out = File::create(path)?;
    out.write_all(header)?;
    out.flush()?;
    Ok(out)
}

fn drain(
    mut out: File,
    mut rx: mpsc::Receiver<Batch>,
) -> Result<WriteSummary, TableError> {
    let mut summary = WriteSummary::default();

    while let Some(batch) = rx.blocking_recv() {
        let result = write_batch(&mut out, &batch.rows);
        if let Ok(n) = &result {
            summary.batches += 1;
            summary.rows += *n;
            debug!(rows = n, total = summary.rows, "Batch written");
        }
        // Producer may have stopped waiting; the rows are on disk either way.
        let _ = batch.done.send(result);
    }

    out.flush()?;
    Ok(summary)
}

fn write_batch<W: Write>(out: &mut W, rows: &[Vec<String>]) -> Result<usize, TableError> {
    let bytes = encode(rows)?;
    out.write_all(&bytes)?;
    out.flush()?;
    Ok(rows.len())
}

fn encode(rows: &[Vec<String>]) -> Result<Vec<u8>, TableError> {
    let mut enc = csv::Writer::from_writer(Vec::new());
    for row in rows {
        enc.write_record(row)?;
    }
    enc.into_inner().map_err(|e| TableError::Io(e.into_error()))
}

/// Read a whole table back, matching columns to fields by header name.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, TableError> {
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader
        .deserialize()
        .collect::<Result<Vec<T>, csv::Error>>()?;
    info!(path = %path.display(), rows = records.len(), "Table read");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts writes until told to fail the next one.
    #[derive(Default)]
    struct Flaky {
        written: Vec<u8>,
        fail_next: bool,
    }

    impl Write for Flaky {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if std::mem::take(&mut self.fail_next) {
                return Err(std::io::Error::other("disk full"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn rows(cells: &[&str]) -> Vec<Vec<String>> {
        cells.iter().map(|c| vec![c.to_string(), "x".to_string()]).collect()
    }

    #[test]
    fn failed_batch_leaves_nothing_for_the_next_one_to_flush() {
        let mut out = Flaky {
            fail_next: true,
            ..Default::default()
        };

        let err = write_batch(&mut out, &rows(&["lost-1", "lost-2"])).unwrap_err();
        assert!(matches!(err, TableError::Io(_)));

        assert_eq!(write_batch(&mut out, &rows(&["kept"])).unwrap(), 1);
        assert_eq!(String::from_utf8(out.written).unwrap(), "kept,x\n");
    }

    #[test]
    fn encoding_quotes_awkward_cells() {
        let bytes = encode(&[vec!["a,b".to_string(), "say \"hi\"".to_string()]]).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "\"a,b\",\"say \"\"hi\"\"\"\n");
    }
}
