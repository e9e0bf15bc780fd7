pub mod error;
pub mod types;

pub use error::{ClientError, Result};
pub use types::{ClusterEntry, HierarchyEntry, TallyRow, CLUSTER_KEY, HIERARCHY_KEY, TALLY_KEY};

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, REFERER, USER_AGENT};
use serde_json::Value;

/// Base of the hierarchy listings (`root.json` and every child listing).
pub const DEFAULT_REGIONS_URL: &str = "https://2022electionresults.comelec.gov.ph/data/regions";

/// Base of the per-cluster tally payloads.
pub const DEFAULT_RESULTS_URL: &str = "https://2022electionresults.comelec.gov.ph/data/results";

const BROWSER_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/99.0.4844.84 Safari/537.36";
const SITE_REFERER: &str = "https://2022electionresults.comelec.gov.ph/";
const SITE_AUTHORITY: &str = "2022electionresults.comelec.gov.ph";

/// Builds absolute URLs for hierarchy listings and tally payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    regions: String,
    results: String,
}

impl Endpoints {
    pub fn new(regions: impl Into<String>, results: impl Into<String>) -> Self {
        Self {
            regions: regions.into().trim_end_matches('/').to_string(),
            results: results.into().trim_end_matches('/').to_string(),
        }
    }

    /// Listing that seeds the walk.
    pub fn root(&self) -> String {
        self.node("root")
    }

    /// Listing for a hierarchy node, from the `url` fragment its parent reported.
    pub fn node(&self, path: &str) -> String {
        format!("{}/{}.json", self.regions, path.trim_start_matches('/'))
    }

    /// Tally payload for a cluster, from the `url` column of its leaf record.
    pub fn tally(&self, path: &str) -> String {
        format!("{}/{}.json", self.results, path.trim_start_matches('/'))
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new(DEFAULT_REGIONS_URL, DEFAULT_RESULTS_URL)
    }
}

pub struct ResultsClient {
    client: reqwest::Client,
}

impl ResultsClient {
    /// Client carrying the fixed browser-like headers the results site expects.
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
        headers.insert(REFERER, HeaderValue::from_static(SITE_REFERER));
        headers.insert(
            HeaderName::from_static("authority"),
            HeaderValue::from_static(SITE_AUTHORITY),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }

    /// GET a URL and decode the body as JSON. One attempt, no retry.
    pub async fn get_json(&self, url: &str) -> Result<Value> {
        let parsed = url::Url::parse(url)?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ClientError::InvalidUrl(format!(
                "only http/https URLs are allowed, got: {}",
                parsed.scheme()
            )));
        }

        let resp = self.client.get(parsed).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = resp.text().await?;
        let value: Value = serde_json::from_str(&body)?;
        tracing::debug!(url, bytes = body.len(), "Fetched JSON");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_join_fragments() {
        let ep = Endpoints::new("http://mock/regions/", "http://mock/results");
        assert_eq!(ep.root(), "http://mock/regions/root.json");
        assert_eq!(ep.node("R01/P01"), "http://mock/regions/R01/P01.json");
        assert_eq!(ep.tally("/C0001"), "http://mock/results/C0001.json");
    }

    #[tokio::test]
    async fn rejects_non_http_scheme() {
        let client = ResultsClient::new(Duration::from_secs(1)).unwrap();
        let err = client.get_json("file:///etc/passwd").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl(_)));
        assert!(!err.is_transport());
    }
}
