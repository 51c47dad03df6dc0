//! Raw fetch layer: one parameterized GET per data kind, parsed as JSON.
//!
//! Fetching fans out over a small bounded pool; a failure in one kind is
//! caught and logged per-kind so the rest of the batch proceeds. Whether a
//! missing kind aborts the task is the caller's call.

use anyhow::{anyhow, Context, Result};
use futures::{stream, StreamExt};
use indexmap::IndexMap;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::config;

/// The data kinds the ticketing API serves for one performance, plus the
/// venue-wide events feed. Fixed enumeration; handlers are looked up by
/// variant, never by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Seats,
    Prices,
    ZoneIds,
    PriceTypes,
    Events,
}

impl DataKind {
    pub const ALL: [DataKind; 5] = [
        DataKind::Seats,
        DataKind::Prices,
        DataKind::ZoneIds,
        DataKind::PriceTypes,
        DataKind::Events,
    ];

    /// The four kinds needed to price one performance's seats.
    pub const SEATS_TASK: [DataKind; 4] = [
        DataKind::Seats,
        DataKind::Prices,
        DataKind::ZoneIds,
        DataKind::PriceTypes,
    ];
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataKind::Seats => "seats",
            DataKind::Prices => "prices",
            DataKind::ZoneIds => "zone_ids",
            DataKind::PriceTypes => "price_types",
            DataKind::Events => "events",
        };
        f.write_str(name)
    }
}

/// URL plus query parameters for one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub url: String,
    pub params: Vec<(&'static str, String)>,
}

/// Identifiers parameterizing the per-performance endpoints.
#[derive(Debug, Clone)]
pub struct QueryParams {
    pub performance_id: i64,
    pub mode_of_sale_id: i64,
    pub constituent_id: i64,
    pub source_id: i64,
}

/// Build the kind -> request map for one performance. Parameter names are the
/// upstream API's own.
pub fn query_plan(params: &QueryParams) -> IndexMap<DataKind, QuerySpec> {
    let pid = params.performance_id.to_string();
    let mosid = params.mode_of_sale_id.to_string();
    let cid = params.constituent_id.to_string();
    let sid = params.source_id.to_string();

    IndexMap::from([
        (
            DataKind::Seats,
            QuerySpec {
                url: config::seats_url(params.performance_id),
                params: vec![
                    ("constituentId", cid.clone()),
                    ("modeOfSaleId", mosid.clone()),
                    ("performanceId", pid.clone()),
                ],
            },
        ),
        (
            DataKind::Prices,
            QuerySpec {
                url: config::PRICE_BASE_URL.to_string(),
                params: vec![
                    ("expandPerformancePriceType", String::new()),
                    ("includeOnlyBasePrice", String::new()),
                    ("modeOfSaleId", mosid.clone()),
                    ("performanceIds", pid.clone()),
                    ("priceTypeId", String::new()),
                    ("sourceId", sid.clone()),
                ],
            },
        ),
        (
            DataKind::ZoneIds,
            QuerySpec {
                url: config::ZONE_ID_BASE_URL.to_string(),
                params: vec![
                    ("constituentId", cid),
                    ("modeOfSaleId", mosid.clone()),
                    ("performanceIds", pid.clone()),
                ],
            },
        ),
        (
            DataKind::PriceTypes,
            QuerySpec {
                url: config::PRICE_TYPES_BASE_URL.to_string(),
                params: vec![
                    ("modeOfSaleId", mosid),
                    ("performanceIds", pid),
                    ("sourceId", sid),
                ],
            },
        ),
        (
            DataKind::Events,
            QuerySpec {
                url: config::ALL_EVENTS_URL.to_string(),
                params: vec![],
            },
        ),
    ])
}

/// Concurrent GETs per batch; four kinds at most anyway.
const FETCH_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct Fetcher {
    http: Client,
}

impl Fetcher {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .user_agent("roh-pipeline/0.1")
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("building http client")?;
        Ok(Self { http })
    }

    /// Fetch and JSON-parse one kind from the plan.
    pub async fn fetch_one(
        &self,
        plan: &IndexMap<DataKind, QuerySpec>,
        kind: DataKind,
    ) -> Result<Value> {
        let spec = plan
            .get(&kind)
            .ok_or_else(|| anyhow!("no query spec for kind {kind}"))?;
        let response = self
            .http
            .get(&spec.url)
            .query(&spec.params)
            .send()
            .await
            .with_context(|| format!("requesting {kind}"))?
            .error_for_status()
            .with_context(|| format!("requesting {kind}"))?;
        response
            .json::<Value>()
            .await
            .with_context(|| format!("parsing {kind} response as JSON"))
    }

    /// Fetch the requested kinds with bounded concurrency. A failed kind maps
    /// to `None` after a warning; the rest of the batch is unaffected.
    pub async fn fetch_all(
        &self,
        plan: &IndexMap<DataKind, QuerySpec>,
        kinds: &[DataKind],
    ) -> HashMap<DataKind, Option<Value>> {
        let results: Vec<(DataKind, Option<Value>)> = stream::iter(kinds.iter().copied())
            .map(|kind| async move {
                match self.fetch_one(plan, kind).await {
                    Ok(value) => (kind, Some(value)),
                    Err(e) => {
                        tracing::warn!(kind = %kind, error = %e, "fetch failed; skipping kind");
                        (kind, None)
                    }
                }
            })
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect()
            .await;
        results.into_iter().collect()
    }

    /// GET an arbitrary JSON endpoint (cast lookups address the
    /// account-activities route directly by id).
    pub async fn fetch_json(&self, url: &str) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?
            .error_for_status()
            .with_context(|| format!("requesting {url}"))?;
        response
            .json::<Value>()
            .await
            .with_context(|| format!("parsing response from {url} as JSON"))
    }

    /// GET a page as text (production detail pages carry their schedule in an
    /// embedded script, not a JSON endpoint).
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?;
        let status = response.status();
        if status.is_server_error() {
            // Transient by definition; the caller's retry policy handles it.
            return Err(anyhow!("server error {status} from {url}"));
        }
        let response = response
            .error_for_status()
            .with_context(|| format!("requesting {url}"))?;
        response.text().await.context("reading response body")
    }
}
