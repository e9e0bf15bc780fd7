use std::sync::Arc;
use std::time::Duration;

use harvest_common::Config;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::FetchError;
use crate::traits::JsonSource;

/// Bounded retry with linear backoff. Attempt `k` (1-based) waits
/// `(k - 1) * base` plus up to `jitter` before it is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_attempts, config.retry_base).with_jitter(config.retry_jitter)
    }

    /// Deterministic part of the wait before `attempt`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.base * attempt.saturating_sub(1)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..jitter_ms))
        };
        self.delay_before(attempt) + jitter
    }
}

/// JSON fetcher with retry and a shared in-flight cap.
///
/// Every attempt holds one permit of the gate. The permit is released before
/// the backoff sleep so a failing URL never starves its siblings.
#[derive(Clone)]
pub struct Fetcher {
    source: Arc<dyn JsonSource>,
    policy: RetryPolicy,
    gate: Arc<Semaphore>,
}

impl Fetcher {
    pub fn new(source: Arc<dyn JsonSource>, policy: RetryPolicy, max_in_flight: usize) -> Self {
        info!(
            max_attempts = policy.max_attempts,
            base_ms = policy.base.as_millis() as u64,
            max_in_flight,
            "Fetcher ready"
        );
        Self {
            source,
            policy,
            gate: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Fetch `url` and decode the value under top-level `key` as `T`.
    ///
    /// Transport failures, undecodable bodies and a missing `key` are retried.
    /// Returns `FetchError::Exhausted` once the policy's attempts are spent.
    pub async fn fetch<T: DeserializeOwned>(&self, url: &str, key: &str) -> Result<T, FetchError> {
        let max_attempts = self.policy.max_attempts;
        let mut last = FetchError::Transport("no attempt made".to_string());

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let backoff = self.policy.backoff(attempt);
                warn!(
                    url,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %last,
                    "Retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
            }

            match self.attempt(url, key).await {
                Ok(payload) => {
                    if attempt > 1 {
                        info!(url, attempt, "Fetch recovered");
                    }
                    return Ok(payload);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(url, error = %e, "Fetch rejected, not retrying");
                    return Err(e);
                }
                Err(e) => last = e,
            }
        }

        warn!(url, attempts = max_attempts, error = %last, "Fetch exhausted retries");
        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts: max_attempts,
            last: Box::new(last),
        })
    }

    async fn attempt<T: DeserializeOwned>(&self, url: &str, key: &str) -> Result<T, FetchError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| FetchError::Transport("fetch gate closed".to_string()))?;

        let mut body = self.source.get_json(url).await?;
        let payload = body
            .get_mut(key)
            .map(Value::take)
            .ok_or_else(|| FetchError::Decode(format!("missing top-level key `{key}`")))?;

        serde_json::from_value(payload).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use harvest_client::HierarchyEntry;
    use serde_json::json;

    use super::*;
    use crate::testing::MockSource;

    const URL: &str = "http://mock/regions/root.json";

    fn listing() -> serde_json::Value {
        json!({ "srs": { "R01": { "url": "R01", "rn": "REGION I" } } })
    }

    #[test]
    fn delay_grows_linearly() {
        let policy = RetryPolicy::new(4, Duration::from_millis(500));
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(500));
        assert_eq!(policy.delay_before(3), Duration::from_millis(1000));
    }

    #[test]
    fn zero_attempts_is_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_two_transport_failures_with_growing_backoff() {
        let base = Duration::from_millis(100);
        let source = Arc::new(MockSource::new().on(URL, listing()).failing(URL, 2));
        let fetcher = Fetcher::new(source.clone(), RetryPolicy::new(3, base), 4);

        let regions: BTreeMap<String, HierarchyEntry> = fetcher.fetch(URL, "srs").await.unwrap();
        assert_eq!(regions["R01"].rn, "REGION I");

        let calls = source.calls_to(URL);
        assert_eq!(calls.len(), 3);
        let first_gap = calls[1] - calls[0];
        let second_gap = calls[2] - calls[1];
        assert!(first_gap >= base, "first backoff {first_gap:?} shorter than base");
        assert!(
            second_gap > first_gap,
            "backoff did not grow: {first_gap:?} then {second_gap:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let source = Arc::new(MockSource::new().on(URL, listing()).failing(URL, 10));
        let fetcher = Fetcher::new(source.clone(), RetryPolicy::new(3, Duration::from_millis(10)), 4);

        let err = fetcher
            .fetch::<BTreeMap<String, HierarchyEntry>>(URL, "srs")
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Exhausted { attempts: 3, .. }));
        assert_eq!(source.calls_to(URL).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_key_is_retried_as_decode_failure() {
        let source = Arc::new(MockSource::new().on(URL, json!({ "unexpected": [] })));
        let fetcher = Fetcher::new(source.clone(), RetryPolicy::new(2, Duration::from_millis(10)), 4);

        let err = fetcher
            .fetch::<BTreeMap<String, HierarchyEntry>>(URL, "srs")
            .await
            .unwrap_err();

        match err {
            FetchError::Exhausted { last, .. } => {
                assert!(matches!(*last, FetchError::Decode(_)), "got {last}")
            }
            other => panic!("expected exhaustion, got {other}"),
        }
        assert_eq!(source.calls_to(URL).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_shape_is_a_decode_failure() {
        let source = Arc::new(MockSource::new().on(URL, json!({ "srs": "not a listing" })));
        let fetcher = Fetcher::new(source, RetryPolicy::new(1, Duration::ZERO), 4);

        let err = fetcher
            .fetch::<BTreeMap<String, HierarchyEntry>>(URL, "srs")
            .await
            .unwrap_err();

        match err {
            FetchError::Exhausted { last, attempts, .. } => {
                assert_eq!(attempts, 1);
                assert!(matches!(*last, FetchError::Decode(_)));
            }
            other => panic!("expected exhaustion, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_releases_the_gate_for_siblings() {
        let bad = "http://mock/regions/bad.json";
        let ok = "http://mock/regions/ok.json";
        let hour = Duration::from_secs(3600);
        let source = Arc::new(
            MockSource::new()
                .on(bad, listing())
                .failing(bad, 1)
                .on(ok, listing()),
        );
        let fetcher = Fetcher::new(source, RetryPolicy::new(2, hour), 1);
        let start = tokio::time::Instant::now();

        let failing = async {
            let res = fetcher.fetch::<BTreeMap<String, HierarchyEntry>>(bad, "srs").await;
            (res, start.elapsed())
        };
        let sibling = async {
            // Let the failing fetch take the only permit and start its backoff.
            tokio::task::yield_now().await;
            let res = fetcher.fetch::<BTreeMap<String, HierarchyEntry>>(ok, "srs").await;
            (res, start.elapsed())
        };
        let ((bad_res, bad_elapsed), (ok_res, ok_elapsed)) = tokio::join!(failing, sibling);

        assert!(ok_res.is_ok());
        assert_eq!(ok_elapsed, Duration::ZERO, "sibling waited behind a sleeping retry");
        assert!(bad_res.is_ok());
        assert!(bad_elapsed >= hour);
    }

    #[tokio::test]
    async fn invalid_url_is_not_retried() {
        let source = Arc::new(MockSource::new().rejecting("ftp://nowhere"));
        let fetcher = Fetcher::new(source.clone(), RetryPolicy::new(5, Duration::from_secs(60)), 4);

        let err = fetcher.fetch::<Vec<serde_json::Value>>("ftp://nowhere", "rs").await.unwrap_err();
        assert!(matches!(err, FetchError::Rejected(_)));
        assert_eq!(source.calls_to("ftp://nowhere").len(), 1);
    }
}
