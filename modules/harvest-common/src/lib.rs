pub mod candidates;
pub mod config;
pub mod error;
pub mod records;

pub use candidates::{Candidate, CandidateTable};
pub use config::Config;
pub use error::HarvestError;
pub use records::*;
