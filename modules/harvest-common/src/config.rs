use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use harvest_client::{DEFAULT_REGIONS_URL, DEFAULT_RESULTS_URL};
use tracing::info;

use crate::error::HarvestError;

/// Run configuration loaded from `HARVEST_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Endpoints
    pub regions_url: String,
    pub results_url: String,

    // Files
    pub clusters_path: PathBuf,
    pub results_path: PathBuf,
    pub candidates_path: PathBuf,

    // Merge
    pub target_contests: Vec<i64>,
    pub country: String,

    // Fetch policy, shared by both passes
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub retry_jitter: Duration,
    pub max_in_flight: usize,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            regions_url: DEFAULT_REGIONS_URL.to_string(),
            results_url: DEFAULT_RESULTS_URL.to_string(),
            clusters_path: PathBuf::from("clusters.csv"),
            results_path: PathBuf::from("results.csv"),
            candidates_path: PathBuf::from("candidates.json"),
            target_contests: vec![5587, 5588],
            country: "PH".to_string(),
            max_attempts: 3,
            retry_base: Duration::from_millis(2000),
            retry_jitter: Duration::ZERO,
            max_in_flight: 64,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, HarvestError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, HarvestError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            regions_url: var("HARVEST_REGIONS_URL").unwrap_or(defaults.regions_url),
            results_url: var("HARVEST_RESULTS_URL").unwrap_or(defaults.results_url),
            clusters_path: var("HARVEST_CLUSTERS_CSV")
                .map(PathBuf::from)
                .unwrap_or(defaults.clusters_path),
            results_path: var("HARVEST_RESULTS_CSV")
                .map(PathBuf::from)
                .unwrap_or(defaults.results_path),
            candidates_path: var("HARVEST_CANDIDATES")
                .map(PathBuf::from)
                .unwrap_or(defaults.candidates_path),
            target_contests: match var("HARVEST_CONTESTS") {
                Some(raw) => parse_list("HARVEST_CONTESTS", &raw)?,
                None => defaults.target_contests,
            },
            country: var("HARVEST_COUNTRY").unwrap_or(defaults.country),
            max_attempts: parse_or("HARVEST_MAX_ATTEMPTS", var("HARVEST_MAX_ATTEMPTS"), defaults.max_attempts)?,
            retry_base: Duration::from_millis(parse_or(
                "HARVEST_RETRY_BASE_MS",
                var("HARVEST_RETRY_BASE_MS"),
                defaults.retry_base.as_millis() as u64,
            )?),
            retry_jitter: Duration::from_millis(parse_or(
                "HARVEST_RETRY_JITTER_MS",
                var("HARVEST_RETRY_JITTER_MS"),
                0u64,
            )?),
            max_in_flight: parse_or("HARVEST_MAX_IN_FLIGHT", var("HARVEST_MAX_IN_FLIGHT"), defaults.max_in_flight)?,
            request_timeout: Duration::from_secs(parse_or(
                "HARVEST_REQUEST_TIMEOUT_SECS",
                var("HARVEST_REQUEST_TIMEOUT_SECS"),
                defaults.request_timeout.as_secs(),
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.max_attempts == 0 {
            return Err(HarvestError::Config(
                "HARVEST_MAX_ATTEMPTS must be at least 1".into(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(HarvestError::Config(
                "HARVEST_MAX_IN_FLIGHT must be at least 1".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(HarvestError::Config(
                "HARVEST_REQUEST_TIMEOUT_SECS must be at least 1".into(),
            ));
        }
        if self.target_contests.is_empty() {
            return Err(HarvestError::Config(
                "HARVEST_CONTESTS must name at least one contest code".into(),
            ));
        }
        if self.clusters_path == self.results_path {
            return Err(HarvestError::Config(format!(
                "clusters and results tables must differ, both are {}",
                self.clusters_path.display()
            )));
        }
        Ok(())
    }

    /// Log the effective configuration. Nothing here is secret.
    pub fn log_summary(&self) {
        info!(
            regions_url = self.regions_url.as_str(),
            results_url = self.results_url.as_str(),
            clusters = %self.clusters_path.display(),
            results = %self.results_path.display(),
            candidates = %self.candidates_path.display(),
            contests = ?self.target_contests,
            max_attempts = self.max_attempts,
            retry_base_ms = self.retry_base.as_millis() as u64,
            max_in_flight = self.max_in_flight,
            "Harvest configuration"
        );
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, HarvestError> {
    match raw {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| HarvestError::Config(format!("{key} must be a number, got {v:?}"))),
        None => Ok(default),
    }
}

fn parse_list(key: &str, raw: &str) -> Result<Vec<i64>, HarvestError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse()
                .map_err(|_| HarvestError::Config(format!("{key} has a non-numeric code: {part:?}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.target_contests, vec![5587, 5588]);
        assert_eq!(config.clusters_path, PathBuf::from("clusters.csv"));
        assert_eq!(config.retry_jitter, Duration::ZERO);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("HARVEST_MAX_ATTEMPTS", "5"),
            ("HARVEST_RETRY_BASE_MS", "250"),
            ("HARVEST_CONTESTS", "1, 2,3"),
            ("HARVEST_MAX_IN_FLIGHT", "8"),
        ]))
        .unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_base, Duration::from_millis(250));
        assert_eq!(config.target_contests, vec![1, 2, 3]);
        assert_eq!(config.max_in_flight, 8);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = Config::from_lookup(lookup(&[("HARVEST_MAX_ATTEMPTS", "0")])).unwrap_err();
        assert!(matches!(err, HarvestError::Config(_)));
    }

    #[test]
    fn zero_request_timeout_is_rejected() {
        let err = Config::from_lookup(lookup(&[("HARVEST_REQUEST_TIMEOUT_SECS", "0")])).unwrap_err();
        assert!(err.to_string().contains("HARVEST_REQUEST_TIMEOUT_SECS"));
    }

    #[test]
    fn same_input_and_output_table_is_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("HARVEST_CLUSTERS_CSV", "out.csv"),
            ("HARVEST_RESULTS_CSV", "out.csv"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn garbage_number_is_rejected() {
        let err = Config::from_lookup(lookup(&[("HARVEST_RETRY_BASE_MS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("HARVEST_RETRY_BASE_MS"));
    }
}
