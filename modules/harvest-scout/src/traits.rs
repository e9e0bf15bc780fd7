use async_trait::async_trait;
use harvest_client::ResultsClient;
use serde_json::Value;

/// Single-attempt JSON GET. Retry lives above this seam, in [`crate::Fetcher`].
#[async_trait]
pub trait JsonSource: Send + Sync {
    async fn get_json(&self, url: &str) -> harvest_client::Result<Value>;
}

#[async_trait]
impl JsonSource for ResultsClient {
    async fn get_json(&self, url: &str) -> harvest_client::Result<Value> {
        ResultsClient::get_json(self, url).await
    }
}
