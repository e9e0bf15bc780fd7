// Test doubles for the harvester.
//
// - MockSource (JsonSource): HashMap-based URL→JSON body, with scripted
//   transport failures and a timestamped call log
// - SyntheticTree: a regular hierarchy registered on a MockSource, plus the
//   leaf records a complete walk of it must produce

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use harvest_client::{ClientError, Endpoints};
use harvest_common::LeafRecord;
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use crate::traits::JsonSource;

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

/// Returns registered bodies; unregistered URLs answer 404.
/// Builder pattern: `.on()`, `.failing()`, `.rejecting()`.
pub struct MockSource {
    bodies: HashMap<String, Value>,
    failures: Mutex<HashMap<String, u32>>,
    rejected: Vec<String>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            bodies: HashMap::new(),
            failures: Mutex::new(HashMap::new()),
            rejected: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on(mut self, url: &str, body: Value) -> Self {
        self.bodies.insert(url.to_string(), body);
        self
    }

    /// The next `times` requests for `url` fail at the transport level.
    pub fn failing(self, url: &str, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), times);
        self
    }

    /// Requests for `url` fail as an invalid URL.
    pub fn rejecting(mut self, url: &str) -> Self {
        self.rejected.push(url.to_string());
        self
    }

    /// Times at which `url` was requested, in order.
    pub fn calls_to(&self, url: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl JsonSource for MockSource {
    async fn get_json(&self, url: &str) -> harvest_client::Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));

        if self.rejected.iter().any(|u| u == url) {
            return Err(ClientError::InvalidUrl(format!("MockSource: rejected {url}")));
        }

        if let Some(remaining) = self.failures.lock().unwrap().get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClientError::Network(format!(
                    "MockSource: simulated failure for {url}"
                )));
            }
        }

        self.bodies.get(url).cloned().ok_or_else(|| ClientError::Api {
            status: 404,
            message: format!("MockSource: nothing registered for {url}"),
        })
    }
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// A `srs` listing body from `(code, url, name)` triples.
pub fn listing(children: &[(&str, &str, &str)]) -> Value {
    let srs: Map<String, Value> = children
        .iter()
        .map(|(code, url, name)| (code.to_string(), json!({ "url": url, "rn": name })))
        .collect();
    json!({ "srs": srs })
}

/// A cluster entry with a single voting booth whose tally lives at `tally_url`.
pub fn cluster(ppc: &str, tally_url: &str) -> Value {
    json!({
        "ppc": ppc,
        "ppcc": format!("{ppc}-CC"),
        "ppn": format!("{ppc} SCHOOL"),
        "vbs": [{
            "vbc": format!("{ppc}-VB"),
            "pre": format!("{ppc}-P"),
            "cpre": format!("{ppc}-P"),
            "url": tally_url,
            "type": "clustered",
            "cs": "1"
        }]
    })
}

/// A `rs` tally body from `(contest, candidate, votes, total)` rows.
pub fn tally(serial: &str, rows: &[(i64, i64, i64, i64)]) -> Value {
    let rs: Vec<Value> = rows
        .iter()
        .map(|(cc, bo, v, tot)| json!({ "cc": cc, "bo": bo, "v": v, "tot": tot, "ser": serial }))
        .collect();
    json!({ "rs": rs })
}

// ---------------------------------------------------------------------------
// SyntheticTree
// ---------------------------------------------------------------------------

/// A hierarchy with `fanout` children at every level above the barangays and
/// `clusters` polling clusters under each barangay.
pub struct SyntheticTree {
    pub source: MockSource,
    pub expected: Vec<LeafRecord>,
    /// Listing URL of every barangay, in generation order.
    pub barangay_urls: Vec<String>,
}

impl SyntheticTree {
    pub fn build(endpoints: &Endpoints, country: &str, fanout: usize, clusters: usize) -> Self {
        let mut source = MockSource::new();
        let mut expected = Vec::new();
        let mut barangay_urls = Vec::new();

        let regions: Vec<(String, String, String)> = (0..fanout)
            .map(|r| (format!("R{r}"), format!("R{r}"), format!("REGION {r}")))
            .collect();
        source = source.on(&endpoints.root(), listing_of(&regions));

        for (_, r_url, r_name) in &regions {
            let provinces = children_of(r_url, "P", "PROVINCE", fanout);
            source = source.on(&endpoints.node(r_url), listing_of(&provinces));

            for (_, p_url, p_name) in &provinces {
                let towns = children_of(p_url, "T", "TOWN", fanout);
                source = source.on(&endpoints.node(p_url), listing_of(&towns));

                for (_, t_url, t_name) in &towns {
                    let barangays = children_of(t_url, "B", "BARANGAY", fanout);
                    source = source.on(&endpoints.node(t_url), listing_of(&barangays));

                    for (_, b_url, b_name) in &barangays {
                        let mut entries = Vec::with_capacity(clusters);
                        for c in 0..clusters {
                            let ppc = format!("{b_url}/C{c}").replace('/', "-");
                            let tally_url = format!("{b_url}/C{c}");
                            entries.push(cluster(&ppc, &tally_url));
                            expected.push(LeafRecord {
                                country: country.to_string(),
                                region: r_name.clone(),
                                province: p_name.clone(),
                                town: t_name.clone(),
                                barangay: b_name.clone(),
                                ppc: ppc.clone(),
                                ppcc: format!("{ppc}-CC"),
                                ppn: format!("{ppc} SCHOOL"),
                                vbc: format!("{ppc}-VB"),
                                pre: format!("{ppc}-P"),
                                cpre: format!("{ppc}-P"),
                                url: tally_url,
                                kind: "clustered".to_string(),
                                cs: "1".to_string(),
                            });
                        }
                        source = source.on(&endpoints.node(b_url), json!({ "pps": entries }));
                        barangay_urls.push(endpoints.node(b_url));
                    }
                }
            }
        }

        Self {
            source,
            expected,
            barangay_urls,
        }
    }
}

fn children_of(parent_url: &str, prefix: &str, label: &str, fanout: usize) -> Vec<(String, String, String)> {
    let parent_tag = parent_url.replace('/', "-");
    (0..fanout)
        .map(|i| {
            (
                format!("{prefix}{i}"),
                format!("{parent_url}/{prefix}{i}"),
                format!("{label} {parent_tag}-{i}"),
            )
        })
        .collect()
}

fn listing_of(children: &[(String, String, String)]) -> Value {
    let triples: Vec<(&str, &str, &str)> = children
        .iter()
        .map(|(code, url, name)| (code.as_str(), url.as_str(), name.as_str()))
        .collect();
    listing(&triples)
}
