use harvest_client::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    /// Not worth retrying; the request can never succeed as written.
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Gave up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: Box<FetchError>,
    },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transport(_) | FetchError::Decode(_))
    }
}

impl From<ClientError> for FetchError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Network(_) | ClientError::Api { .. } => {
                FetchError::Transport(err.to_string())
            }
            ClientError::Parse(msg) => FetchError::Decode(msg),
            ClientError::InvalidUrl(msg) => FetchError::Rejected(msg),
        }
    }
}

/// A cluster entry without the embedded voting-booth list it is flattened from.
#[derive(Debug, Error)]
#[error("Cluster {cluster} has no voting booth entries")]
pub struct MalformedRecordError {
    pub cluster: String,
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Row has {found} cells, table has {expected} columns")]
    Width { expected: usize, found: usize },

    #[error("Table writer is closed")]
    Closed,

    #[error("Table writer task failed: {0}")]
    Task(String),
}
