//! Incremental production discovery.
//!
//! The events feed names productions; their full performance schedules only
//! exist inside the booking page's embedded `__INITIAL_STATE__` blob. Each
//! production is scraped once: membership in the registry is decided by
//! listing the dataset's partition directories, so re-runs never re-fetch a
//! page for a production already on disk.

use anyhow::{anyhow, Context, Result};
use arrow_array::{RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{PRODUCTIONS_PARQUET_LOCATION, PRODUCTIONS_PARTITION_COLS};
use crate::events::{london_local, UpcomingEvent};
use crate::normalize::coerce::{coerce_i64, coerce_timestamp};
use crate::retry::RetryPolicy;
use crate::storage::dataset::{columns, sanitize, Dataset, DatasetRecord, PartitionValues};
use crate::storage::Platform;

/// One scheduled performance of a production, as parsed from its detail page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Activity {
    pub performance_id: i64,
    pub timestamp: DateTime<Utc>,
}

/// Extract the percent-encoded `__INITIAL_STATE__` JSON blob from a booking
/// page.
pub fn initial_state(html: &str) -> Result<Value> {
    // The blob is percent-encoded, so it never contains a raw quote.
    let pattern = Regex::new(r#"__INITIAL_STATE__="([^"]*)""#).context("building state regex")?;
    let encoded = pattern
        .captures(html)
        .and_then(|c| c.get(1))
        .ok_or_else(|| anyhow!("page has no __INITIAL_STATE__ blob"))?
        .as_str();
    let decoded = urlencoding::decode(encoded).context("percent-decoding state blob")?;
    serde_json::from_str(&decoded).context("parsing state blob as JSON")
}

/// Scheduled performances from a parsed state blob, sorted by date.
pub fn parse_activities(state: &Value) -> Result<Vec<Activity>> {
    let entries = state
        .get("activities")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("state blob missing expected key activities"))?;
    let mut activities = entries
        .iter()
        .map(|entry| {
            Ok(Activity {
                performance_id: coerce_i64(
                    "id",
                    entry
                        .get("id")
                        .ok_or_else(|| anyhow!("activity missing expected key id"))?,
                )?,
                timestamp: coerce_timestamp(
                    "date",
                    entry
                        .get("date")
                        .ok_or_else(|| anyhow!("activity missing expected key date"))?,
                )?,
            })
        })
        .collect::<Result<Vec<_>>>()
        .context("parsing production activities")?;
    activities.sort_by_key(|a| a.timestamp);
    Ok(activities)
}

/// First activity at least an hour away.
pub fn soonest_activity(activities: &[Activity], now: DateTime<Utc>) -> Option<Activity> {
    let cutoff = now + Duration::hours(1);
    activities.iter().copied().find(|a| a.timestamp >= cutoff)
}

/// Row shape of the production schedule registry, partitioned by
/// `title/productionId/date/time/performanceId`. The whole row lives in the
/// partition path; the payload carries the production's slug and url.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductionActivity {
    pub title: String,
    pub production_id: String,
    pub date: String,
    pub time: String,
    pub performance_id: i64,
    pub slug: String,
    pub url: String,
}

impl DatasetRecord for ProductionActivity {
    fn partition_cols() -> &'static [&'static str] {
        PRODUCTIONS_PARTITION_COLS
    }

    fn partition_value(&self, col: &str) -> String {
        match col {
            "title" => self.title.clone(),
            "productionId" => self.production_id.clone(),
            "date" => self.date.clone(),
            "time" => self.time.clone(),
            "performanceId" => self.performance_id.to_string(),
            other => unreachable!("not a partition column: {other}"),
        }
    }

    fn payload_batch(rows: &[Self]) -> Result<RecordBatch> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("slug", DataType::Utf8, false),
            Field::new("url", DataType::Utf8, false),
        ]));
        let slugs =
            StringArray::from(rows.iter().map(|r| Some(r.slug.as_str())).collect::<Vec<_>>());
        let urls =
            StringArray::from(rows.iter().map(|r| Some(r.url.as_str())).collect::<Vec<_>>());
        RecordBatch::try_new(schema, vec![Arc::new(slugs), Arc::new(urls)])
            .context("building productions batch")
    }

    fn from_payload(batch: &RecordBatch, partition: &PartitionValues) -> Result<Vec<Self>> {
        let slugs = columns::string_col(batch, "slug")?;
        let urls = columns::string_col(batch, "url")?;
        let part = |col: &str| -> Result<String> {
            partition
                .get(col)
                .cloned()
                .ok_or_else(|| anyhow!("productions file missing partition value {col}"))
        };
        (0..batch.num_rows())
            .map(|i| {
                Ok(ProductionActivity {
                    title: part("title")?,
                    production_id: part("productionId")?,
                    date: part("date")?,
                    time: part("time")?,
                    performance_id: part("performanceId")?
                        .parse()
                        .context("parsing performanceId partition value")?,
                    slug: slugs.value(i).to_string(),
                    url: urls.value(i).to_string(),
                })
            })
            .collect()
    }

    fn column_value(&self, col: &str) -> Option<String> {
        match col {
            "title" => Some(self.title.clone()),
            "productionId" => Some(self.production_id.clone()),
            "date" => Some(self.date.clone()),
            "time" => Some(self.time.clone()),
            "performanceId" => Some(self.performance_id.to_string()),
            "slug" => Some(self.slug.clone()),
            "url" => Some(self.url.clone()),
            _ => None,
        }
    }
}

pub struct ProductionRegistry<'a> {
    dataset: Dataset<'a>,
}

impl<'a> ProductionRegistry<'a> {
    pub fn new(platform: &'a dyn Platform) -> Self {
        Self {
            dataset: Dataset::new(platform, PRODUCTIONS_PARQUET_LOCATION),
        }
    }

    /// Registered production ids, from directory names alone.
    pub fn known_production_ids(&self) -> Result<HashSet<String>> {
        if !self.dataset.exists() {
            return Ok(HashSet::new());
        }
        Ok(self
            .dataset
            .partition_values("productionId", PRODUCTIONS_PARTITION_COLS)?
            .into_iter()
            .collect())
    }

    pub fn register(&self, rows: &[ProductionActivity]) -> Result<()> {
        self.dataset.write(rows)
    }

    pub fn read_all(&self) -> Result<Vec<ProductionActivity>> {
        if !self.dataset.exists() {
            return Ok(Vec::new());
        }
        self.dataset.read(&[])
    }
}

/// Scrape and register the schedule of every production in the feed that the
/// registry does not know yet. `fetch_page` is the page GET; transient
/// failures go through the capped fixed-interval retry.
pub async fn discover_new_productions<F, Fut>(
    platform: &dyn Platform,
    events: &[UpcomingEvent],
    fetch_page: F,
) -> Result<Vec<ProductionActivity>>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let registry = ProductionRegistry::new(platform);
    let known = registry.known_production_ids()?;
    let retry = RetryPolicy::detail_fetch();

    let mut discovered = Vec::new();
    let mut handled = HashSet::new();
    for event in events {
        if !handled.insert(event.production_id.as_str()) {
            continue;
        }
        if known.contains(&sanitize(&event.production_id)) {
            continue;
        }
        let html = retry
            .run(&event.url, || fetch_page(event.url.clone()))
            .await
            .with_context(|| format!("fetching production page {}", event.url))?;
        let activities = parse_activities(&initial_state(&html)?)
            .with_context(|| format!("parsing schedule for production {}", event.production_id))?;
        if activities.is_empty() {
            warn!(production = %event.production_id, "production page lists no activities");
            continue;
        }
        for activity in &activities {
            let local = london_local(activity.timestamp);
            discovered.push(ProductionActivity {
                title: event.title.clone(),
                production_id: event.production_id.clone(),
                date: local.format("%Y-%m-%d").to_string(),
                time: local.format("%H:%M:%S").to_string(),
                performance_id: activity.performance_id,
                slug: event.slug.clone(),
                url: event.url.clone(),
            });
        }
        info!(
            production = %event.production_id,
            performances = activities.len(),
            "registered new production"
        );
    }

    if !discovered.is_empty() {
        registry.register(&discovered)?;
    }
    Ok(discovered)
}
