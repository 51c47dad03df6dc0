//! The two pipeline tasks and the shared invocation context.
//!
//! `seats` reconciles one performance's seat map; `events` refreshes the
//! events table, runs incremental discovery and cast bookkeeping. Both are
//! reachable from the CLI and the HTTP entry point.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::cache::RefCache;
use crate::casts::{handle_new_past_casts, handle_seen_performances};
use crate::config::{EVENTS_PARQUET_LOCATION, EVENTS_SUMMARY_DOC};
use crate::discovery::{
    discover_new_productions, initial_state, parse_activities, soonest_activity,
};
use crate::events::{
    self, enrich_events, next_weeks_events, soonest_production_url, upcoming_events, StoredEvent,
    UpcomingEvent,
};
use crate::fetch::{query_plan, DataKind, Fetcher, QueryParams};
use crate::normalize::{
    normalize_events, normalize_price_types, normalize_prices, normalize_seats, normalize_zones,
};
use crate::reconcile::{reconcile, ReconcileOptions, SeatPriceBundle};
use crate::storage::dataset::Dataset;
use crate::storage::docstore::DocStore;
use crate::storage::{platform_from_env, Platform};
use crate::util::env::{env_req, init_env, preflight_check, REQUIRED_TASK_ENV};

/// How a task names its performance: a concrete id, or the N-th soonest
/// upcoming Main Stage production (zero-based internally; `"soonest"` is
/// index 0 and `"soonest_2"` index 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceSelector {
    Id(i64),
    Soonest(usize),
}

impl FromStr for PerformanceSelector {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.starts_with('[') {
            bail!("list performance ids are not supported for the seats task");
        }
        if raw == "soonest" {
            return Ok(PerformanceSelector::Soonest(0));
        }
        if let Some(n) = raw.strip_prefix("soonest_") {
            let n: usize = n
                .parse()
                .with_context(|| format!("invalid soonest index in {raw:?}"))?;
            if n == 0 {
                bail!("soonest indices start at 1");
            }
            return Ok(PerformanceSelector::Soonest(n - 1));
        }
        let id: i64 = raw
            .parse()
            .with_context(|| format!("invalid performance id {raw:?}"))?;
        Ok(PerformanceSelector::Id(id))
    }
}

/// Everything the events task produced, for callers that render or inspect.
#[derive(Debug)]
pub struct EventsOutcome {
    pub events: Vec<UpcomingEvent>,
    pub today_tomorrow: Vec<UpcomingEvent>,
    pub next_week: Vec<UpcomingEvent>,
    pub saved_events: usize,
    pub discovered_performances: usize,
}

/// Shared invocation context: storage backend, document store and HTTP
/// client, plus the per-invocation reference cache.
pub struct Pipeline {
    platform: Arc<dyn Platform>,
    docs: DocStore,
    fetcher: Fetcher,
}

impl Pipeline {
    pub fn from_env() -> Result<Self> {
        init_env();
        let platform = platform_from_env()?;
        let docs = DocStore::new(platform.clone());
        let fetcher = Fetcher::new(30)?;
        Ok(Self {
            platform,
            docs,
            fetcher,
        })
    }

    pub fn new(platform: Arc<dyn Platform>, fetcher: Fetcher) -> Self {
        let docs = DocStore::new(platform.clone());
        Self {
            platform,
            docs,
            fetcher,
        }
    }

    pub fn docs(&self) -> &DocStore {
        &self.docs
    }

    /// Resolve a selector to a concrete performance id. Soonest lookups go
    /// through the cache document and fall back to scraping the production's
    /// detail page.
    pub async fn resolve_performance_id(&self, selector: PerformanceSelector) -> Result<i64> {
        let index = match selector {
            PerformanceSelector::Id(id) => return Ok(id),
            PerformanceSelector::Soonest(index) => index,
        };
        let now = Utc::now();
        if let Some(id) = events::cached_soonest(&self.docs, index, now) {
            info!(performance_id = id, index, "soonest performance from cache");
            return Ok(id);
        }

        let plan = query_plan(&QueryParams {
            performance_id: 0,
            mode_of_sale_id: 0,
            constituent_id: 0,
            source_id: 0,
        });
        let feed = self.fetcher.fetch_one(&plan, DataKind::Events).await?;
        let (rows, locations) = normalize_events(&feed)?;
        let upcoming = upcoming_events(rows, &locations, now);
        let url = soonest_production_url(&upcoming, now, index)?;

        let html = self.fetcher.fetch_text(&url).await?;
        let activities = parse_activities(&initial_state(&html)?)
            .with_context(|| format!("parsing schedule from {url}"))?;
        let soonest = soonest_activity(&activities, now)
            .with_context(|| format!("no bookable performance on {url}"))?;

        events::store_soonest(&self.docs, index, soonest.performance_id, soonest.timestamp)?;
        info!(performance_id = soonest.performance_id, index, "soonest performance resolved");
        Ok(soonest.performance_id)
    }

    /// The seats task: fetch the four per-performance kinds, normalize,
    /// reconcile against the reference tables.
    pub async fn seats_task(
        &self,
        params: &QueryParams,
        options: &ReconcileOptions,
    ) -> Result<SeatPriceBundle> {
        info!(performance_id = params.performance_id, "running seats task");
        let plan = query_plan(params);
        let mut fetched = self.fetcher.fetch_all(&plan, &DataKind::SEATS_TASK).await;
        let mut take = |kind: DataKind| -> Result<serde_json::Value> {
            fetched
                .remove(&kind)
                .flatten()
                .with_context(|| format!("no {kind} data for performance {}", params.performance_id))
        };

        let seats = normalize_seats(&take(DataKind::Seats)?)?;
        let prices = normalize_prices(&take(DataKind::Prices)?)?;
        let zones = normalize_zones(&take(DataKind::ZoneIds)?)?;
        let price_types = normalize_price_types(&take(DataKind::PriceTypes)?)?;

        let mut cache = RefCache::new(self.docs.clone());
        let bundle = {
            let positions = cache.seat_positions(&seats)?.to_vec();
            let statuses = cache.seat_statuses()?.to_vec();
            reconcile(
                seats,
                prices,
                zones,
                price_types,
                &positions,
                &statuses,
                options,
            )?
        };

        let available = bundle.seats.iter().filter(|s| s.seat_available).count();
        info!(available, total = bundle.seats.len(), "seats available");
        Ok(bundle)
    }

    /// The events task: refresh the events table; when `save` is set, persist
    /// new rows, run discovery and cast bookkeeping, and write the summary
    /// document.
    pub async fn events_task(&self, save: bool) -> Result<EventsOutcome> {
        info!(save, "running events task");
        let now = Utc::now();
        let plan = query_plan(&QueryParams {
            performance_id: 0,
            mode_of_sale_id: 0,
            constituent_id: 0,
            source_id: 0,
        });
        let feed = self.fetcher.fetch_one(&plan, DataKind::Events).await?;
        let (rows, locations) = normalize_events(&feed)?;

        // The enriched table lives in the invocation's cache; every later
        // step of this run reads it from there.
        let mut cache = RefCache::new(self.docs.clone());
        cache.set_events(enrich_events(rows, &locations));
        let all_events = cache.events().map(|e| e.to_vec()).unwrap_or_default();
        let cutoff = now - chrono::Duration::hours(1);
        let upcoming: Vec<UpcomingEvent> = all_events
            .iter()
            .filter(|e| e.timestamp > cutoff)
            .cloned()
            .collect();
        let (today_tomorrow, next_week) = next_weeks_events(&upcoming, now);
        info!(
            events = upcoming.len(),
            today_tomorrow = today_tomorrow.len(),
            next_week = next_week.len(),
            "events table refreshed"
        );

        if !save {
            return Ok(EventsOutcome {
                events: all_events,
                today_tomorrow,
                next_week,
                saved_events: 0,
                discovered_performances: 0,
            });
        }

        let discovered = {
            let fetcher = self.fetcher.clone();
            discover_new_productions(self.platform.as_ref(), &upcoming, move |url| {
                let fetcher = fetcher.clone();
                async move { fetcher.fetch_text(&url).await }
            })
            .await?
        };

        let saved_events = self.save_new_events(&upcoming)?;
        self.write_events_summary(&all_events)?;

        {
            let fetcher = self.fetcher.clone();
            handle_new_past_casts(
                self.platform.as_ref(),
                &self.docs,
                &all_events,
                now,
                move |url| {
                    let fetcher = fetcher.clone();
                    async move { fetcher.fetch_json(&url).await }
                },
            )
            .await?;
        }
        handle_seen_performances(self.platform.as_ref(), &self.docs)?;

        Ok(EventsOutcome {
            events: all_events,
            today_tomorrow,
            next_week,
            saved_events,
            discovered_performances: discovered.len(),
        })
    }

    /// Persist feed rows whose performance id is not in the events dataset
    /// yet. Rows without a performance id are listings not on sale and stay
    /// out of the dataset.
    fn save_new_events(&self, events: &[UpcomingEvent]) -> Result<usize> {
        let dataset = Dataset::new(self.platform.as_ref(), EVENTS_PARQUET_LOCATION);
        let existing_ids: std::collections::HashSet<i64> = if dataset.exists() {
            dataset
                .read::<StoredEvent>(&[])?
                .into_iter()
                .filter_map(|e| e.performance_id)
                .collect()
        } else {
            Default::default()
        };

        let new_rows: Vec<StoredEvent> = events
            .iter()
            .filter(|e| {
                e.performance_id
                    .map(|id| !existing_ids.contains(&id))
                    .unwrap_or(false)
            })
            .map(StoredEvent::from)
            .collect();
        if new_rows.is_empty() {
            info!("no new events to save");
            return Ok(0);
        }
        let titles: Vec<&str> = {
            use itertools::Itertools;
            new_rows.iter().map(|r| r.title.as_str()).unique().collect()
        };
        info!(rows = new_rows.len(), ?titles, "saving new events");
        dataset.write(&new_rows)?;
        Ok(new_rows.len())
    }

    fn write_events_summary(&self, events: &[UpcomingEvent]) -> Result<()> {
        let summary: Vec<StoredEvent> = events.iter().map(StoredEvent::from).collect();
        self.docs.write(EVENTS_SUMMARY_DOC, &summary)
    }
}

/// Read the per-performance identifiers from the environment, resolving the
/// performance selector first.
pub async fn params_from_env(pipeline: &Pipeline) -> Result<QueryParams> {
    preflight_check("task env", REQUIRED_TASK_ENV, REQUIRED_TASK_ENV)?;
    let selector: PerformanceSelector = env_req("PERFORMANCE_ID")?.parse()?;
    let performance_id = pipeline.resolve_performance_id(selector).await?;
    Ok(QueryParams {
        performance_id,
        mode_of_sale_id: env_req("MODE_OF_SALE_ID")?.parse().context("MODE_OF_SALE_ID")?,
        constituent_id: env_req("CONSTITUENT_ID")?.parse().context("CONSTITUENT_ID")?,
        source_id: env_req("SOURCE_ID")?.parse().context("SOURCE_ID")?,
    })
}
