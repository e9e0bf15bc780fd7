use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Candidate table error: {0}")]
    Candidates(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
