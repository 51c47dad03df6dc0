//! Upcoming-events table built from the events feed: rows joined with their
//! venue, converted to London local time, enriched with date/time/day and the
//! production's booking URL.

use anyhow::{anyhow, Context, Result};
use arrow_array::{Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Offset, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::{production_url, EVENTS_PARTITION_COLS, MAIN_STAGE, SOONEST_PERFORMANCE_DOC};
use crate::normalize::{EventRow, LocationRecord};
use crate::storage::dataset::{columns, DatasetRecord, PartitionValues};
use crate::storage::docstore::DocStore;

/// One upcoming (production, performance, location) with derived local-time
/// fields. `date`, `time` and `day` are Europe/London wall-clock values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingEvent {
    pub production_id: String,
    pub event_type: String,
    pub title: String,
    pub slug: String,
    pub location: String,
    pub performance_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub date: String,
    pub time: String,
    pub day: String,
    pub url: String,
}

/// UK offset for an instant: BST between 01:00 UTC on the last Sunday of
/// March and 01:00 UTC on the last Sunday of October, GMT otherwise.
pub fn uk_offset(utc: DateTime<Utc>) -> FixedOffset {
    let year = utc.year();
    let bst = match (last_sunday_utc(year, 3), last_sunday_utc(year, 10)) {
        (Some(start), Some(end)) => utc >= start && utc < end,
        _ => false,
    };
    let seconds = if bst { 3600 } else { 0 };
    FixedOffset::east_opt(seconds).unwrap_or_else(|| Utc.fix())
}

pub fn london_local(utc: DateTime<Utc>) -> DateTime<FixedOffset> {
    utc.with_timezone(&uk_offset(utc))
}

fn last_sunday_utc(year: i32, month: u32) -> Option<DateTime<Utc>> {
    // Both transition months have 31 days.
    (1..=31u32)
        .rev()
        .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day))
        .find(|date| date.weekday() == Weekday::Sun)
        .and_then(|date| date.and_hms_opt(1, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Build the full events table from normalized feed rows: locations joined by
/// id (the raw id survives when the feed's `included` section omits a venue),
/// rows sorted by timestamp and deduplicated on
/// `(type, production, location, timestamp)`. Past rows are kept; cast
/// bookkeeping needs them.
pub fn enrich_events(rows: Vec<EventRow>, locations: &[LocationRecord]) -> Vec<UpcomingEvent> {
    let location_by_id: HashMap<&str, &str> = locations
        .iter()
        .map(|l| (l.location_id.as_str(), l.location.as_str()))
        .collect();

    let mut events: Vec<UpcomingEvent> = rows
        .into_iter()
        .map(|row| {
            let location = location_by_id
                .get(row.location_id.as_str())
                .map(|l| l.to_string())
                .unwrap_or_else(|| row.location_id.clone());
            let local = london_local(row.timestamp);
            UpcomingEvent {
                url: production_url(&row.slug),
                date: local.format("%Y-%m-%d").to_string(),
                time: local.format("%H:%M:%S").to_string(),
                day: local.format("%A").to_string(),
                production_id: row.production_id,
                event_type: row.event_type,
                title: row.title,
                slug: row.slug,
                location,
                performance_id: row.performance_id,
                timestamp: row.timestamp,
            }
        })
        .collect();

    events.sort_by_key(|e| e.timestamp);
    let mut seen = HashSet::new();
    events.retain(|e| {
        seen.insert((
            e.event_type.clone(),
            e.production_id.clone(),
            e.location.clone(),
            e.timestamp,
        ))
    });
    events
}

/// The enriched table restricted to rows after an hour ago.
pub fn upcoming_events(
    rows: Vec<EventRow>,
    locations: &[LocationRecord],
    now: DateTime<Utc>,
) -> Vec<UpcomingEvent> {
    let cutoff = now - Duration::hours(1);
    let mut events = enrich_events(rows, locations);
    events.retain(|e| e.timestamp > cutoff);
    events
}

/// Today/tomorrow and next-seven-days subsets, by London dates.
pub fn next_weeks_events(
    events: &[UpcomingEvent],
    now: DateTime<Utc>,
) -> (Vec<UpcomingEvent>, Vec<UpcomingEvent>) {
    let today = london_local(now - Duration::hours(1)).date_naive();
    let tomorrow = today + Duration::days(1);
    let next_week = today + Duration::days(7);

    let within = |events: &[UpcomingEvent], limit: NaiveDate| {
        events
            .iter()
            .filter(|e| london_local(e.timestamp).date_naive() <= limit)
            .cloned()
            .collect()
    };
    (within(events, tomorrow), within(events, next_week))
}

/// Booking URL of the `index`-th upcoming Main Stage production, counting
/// distinct productions in performance order.
pub fn soonest_production_url(
    events: &[UpcomingEvent],
    now: DateTime<Utc>,
    index: usize,
) -> Result<String> {
    let today = london_local(now - Duration::hours(1)).date_naive();
    let mut urls: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();
    for event in events {
        if event.location != MAIN_STAGE {
            continue;
        }
        if london_local(event.timestamp).date_naive() < today {
            continue;
        }
        if seen.insert(event.url.as_str()) {
            urls.push(event.url.as_str());
        }
    }
    urls.get(index)
        .map(|u| u.to_string())
        .ok_or_else(|| anyhow!("no upcoming Main Stage production at index {index}"))
}

/// Cached soonest-performance resolutions, keyed by production index. An
/// entry is live while its performance is still at least an hour away.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoonestEntry {
    pub performance_id: i64,
    pub timestamp: DateTime<Utc>,
}

pub fn cached_soonest(docs: &DocStore, index: usize, now: DateTime<Utc>) -> Option<i64> {
    let cache: HashMap<String, SoonestEntry> =
        docs.read_or_default(SOONEST_PERFORMANCE_DOC).ok()?;
    let entry = cache.get(&index.to_string())?;
    (entry.timestamp >= now + Duration::hours(1)).then_some(entry.performance_id)
}

pub fn store_soonest(
    docs: &DocStore,
    index: usize,
    performance_id: i64,
    timestamp: DateTime<Utc>,
) -> Result<()> {
    let mut cache: HashMap<String, SoonestEntry> =
        docs.read_or_default(SOONEST_PERFORMANCE_DOC)?;
    cache.insert(
        index.to_string(),
        SoonestEntry {
            performance_id,
            timestamp,
        },
    );
    docs.write(SOONEST_PERFORMANCE_DOC, &cache)
}

/// Row shape of the persisted events dataset, partitioned by
/// `location/date/time/title`. Also the row shape of the events summary
/// document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub location: String,
    pub date: String,
    pub time: String,
    pub title: String,
    pub performance_id: Option<i64>,
    pub production_id: String,
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub day: String,
    pub slug: String,
}

impl From<&UpcomingEvent> for StoredEvent {
    fn from(event: &UpcomingEvent) -> Self {
        Self {
            location: event.location.clone(),
            date: event.date.clone(),
            time: event.time.clone(),
            title: event.title.clone(),
            performance_id: event.performance_id,
            production_id: event.production_id.clone(),
            timestamp: event.timestamp,
            url: event.url.clone(),
            day: event.day.clone(),
            slug: event.slug.clone(),
        }
    }
}

impl DatasetRecord for StoredEvent {
    fn partition_cols() -> &'static [&'static str] {
        EVENTS_PARTITION_COLS
    }

    fn partition_value(&self, col: &str) -> String {
        match col {
            "location" => self.location.clone(),
            "date" => self.date.clone(),
            "time" => self.time.clone(),
            "title" => self.title.clone(),
            other => unreachable!("not a partition column: {other}"),
        }
    }

    fn payload_batch(rows: &[Self]) -> Result<RecordBatch> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("performanceId", DataType::Int64, true),
            Field::new("productionId", DataType::Utf8, false),
            Field::new("timestamp", DataType::Utf8, false),
            Field::new("url", DataType::Utf8, false),
            Field::new("day", DataType::Utf8, false),
            Field::new("slug", DataType::Utf8, false),
        ]));
        let performance_ids =
            Int64Array::from(rows.iter().map(|r| r.performance_id).collect::<Vec<_>>());
        let production_ids = StringArray::from(
            rows.iter()
                .map(|r| Some(r.production_id.as_str()))
                .collect::<Vec<_>>(),
        );
        let timestamps = StringArray::from(
            rows.iter()
                .map(|r| Some(r.timestamp.to_rfc3339()))
                .collect::<Vec<_>>(),
        );
        let urls =
            StringArray::from(rows.iter().map(|r| Some(r.url.as_str())).collect::<Vec<_>>());
        let days =
            StringArray::from(rows.iter().map(|r| Some(r.day.as_str())).collect::<Vec<_>>());
        let slugs =
            StringArray::from(rows.iter().map(|r| Some(r.slug.as_str())).collect::<Vec<_>>());
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(performance_ids),
                Arc::new(production_ids),
                Arc::new(timestamps),
                Arc::new(urls),
                Arc::new(days),
                Arc::new(slugs),
            ],
        )
        .context("building events batch")
    }

    fn from_payload(batch: &RecordBatch, partition: &PartitionValues) -> Result<Vec<Self>> {
        let performance_ids = columns::int_col(batch, "performanceId")?;
        let production_ids = columns::string_col(batch, "productionId")?;
        let timestamps = columns::string_col(batch, "timestamp")?;
        let urls = columns::string_col(batch, "url")?;
        let days = columns::string_col(batch, "day")?;
        let slugs = columns::string_col(batch, "slug")?;
        let part = |col: &str| -> Result<String> {
            partition
                .get(col)
                .cloned()
                .ok_or_else(|| anyhow!("events file missing partition value {col}"))
        };
        (0..batch.num_rows())
            .map(|i| {
                use arrow_array::Array;
                let timestamp = DateTime::parse_from_rfc3339(timestamps.value(i))
                    .context("parsing stored event timestamp")?
                    .with_timezone(&Utc);
                Ok(StoredEvent {
                    location: part("location")?,
                    date: part("date")?,
                    time: part("time")?,
                    title: part("title")?,
                    performance_id: (!performance_ids.is_null(i))
                        .then(|| performance_ids.value(i)),
                    production_id: production_ids.value(i).to_string(),
                    timestamp,
                    url: urls.value(i).to_string(),
                    day: days.value(i).to_string(),
                    slug: slugs.value(i).to_string(),
                })
            })
            .collect()
    }

    fn column_value(&self, col: &str) -> Option<String> {
        match col {
            "location" => Some(self.location.clone()),
            "date" => Some(self.date.clone()),
            "time" => Some(self.time.clone()),
            "title" => Some(self.title.clone()),
            "performanceId" => self.performance_id.map(|id| id.to_string()),
            "productionId" => Some(self.production_id.clone()),
            "timestamp" => Some(self.timestamp.to_rfc3339()),
            "url" => Some(self.url.clone()),
            "day" => Some(self.day.clone()),
            "slug" => Some(self.slug.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::dataset::{Dataset, Filter};
    use crate::storage::LocalPlatform;
    use chrono::TimeZone;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn row(production: &str, location: &str, performance: i64, when: &str) -> EventRow {
        EventRow {
            production_id: production.into(),
            event_type: "events".into(),
            title: format!("Title {production}"),
            slug: format!("{production}-slug"),
            location_id: location.into(),
            performance_id: Some(performance),
            timestamp: utc(when),
        }
    }

    fn locations() -> Vec<LocationRecord> {
        vec![
            LocationRecord {
                location_id: "loc-1".into(),
                location: "Main Stage".into(),
            },
            LocationRecord {
                location_id: "loc-2".into(),
                location: "Linbury Theatre".into(),
            },
        ]
    }

    #[test]
    fn summer_is_bst_and_winter_is_gmt() {
        assert_eq!(uk_offset(utc("2026-07-01T12:00:00Z")).local_minus_utc(), 3600);
        assert_eq!(uk_offset(utc("2026-01-15T12:00:00Z")).local_minus_utc(), 0);
    }

    #[test]
    fn transitions_happen_at_one_utc_on_the_last_sunday() {
        // 2026: clocks change on 29 March and 25 October.
        assert_eq!(uk_offset(utc("2026-03-29T00:59:00Z")).local_minus_utc(), 0);
        assert_eq!(uk_offset(utc("2026-03-29T01:00:00Z")).local_minus_utc(), 3600);
        assert_eq!(uk_offset(utc("2026-10-25T00:59:00Z")).local_minus_utc(), 3600);
        assert_eq!(uk_offset(utc("2026-10-25T01:00:00Z")).local_minus_utc(), 0);
    }

    #[test]
    fn joins_locations_and_derives_local_fields() {
        let now = utc("2026-09-01T12:00:00Z");
        let events = upcoming_events(
            vec![row("prod-1", "loc-1", 101, "2026-09-10T18:30:00Z")],
            &locations(),
            now,
        );
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.location, "Main Stage");
        // BST: 18:30 UTC is 19:30 local.
        assert_eq!(event.date, "2026-09-10");
        assert_eq!(event.time, "19:30:00");
        assert_eq!(event.day, "Thursday");
        assert_eq!(
            event.url,
            "https://www.rbo.org.uk/tickets-and-events/prod-1-slug-dates"
        );
    }

    #[test]
    fn past_rows_drop_and_duplicates_collapse() {
        let now = utc("2026-09-01T12:00:00Z");
        let events = upcoming_events(
            vec![
                row("prod-1", "loc-1", 101, "2026-09-10T18:30:00Z"),
                row("prod-1", "loc-1", 101, "2026-09-10T18:30:00Z"),
                row("prod-0", "loc-1", 90, "2026-08-01T18:30:00Z"),
            ],
            &locations(),
            now,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].production_id, "prod-1");
    }

    #[test]
    fn windows_split_on_london_dates() {
        let now = utc("2026-09-01T12:00:00Z");
        let events = upcoming_events(
            vec![
                row("prod-1", "loc-1", 101, "2026-09-01T18:30:00Z"),
                row("prod-2", "loc-1", 102, "2026-09-02T18:30:00Z"),
                row("prod-3", "loc-1", 103, "2026-09-05T18:30:00Z"),
                row("prod-4", "loc-1", 104, "2026-09-20T18:30:00Z"),
            ],
            &locations(),
            now,
        );
        let (today_tomorrow, next_week) = next_weeks_events(&events, now);
        assert_eq!(today_tomorrow.len(), 2);
        assert_eq!(next_week.len(), 3);
    }

    #[test]
    fn soonest_counts_distinct_main_stage_productions() {
        let now = utc("2026-09-01T12:00:00Z");
        let events = upcoming_events(
            vec![
                row("prod-1", "loc-1", 101, "2026-09-02T18:30:00Z"),
                row("prod-1", "loc-1", 102, "2026-09-04T18:30:00Z"),
                row("prod-2", "loc-2", 103, "2026-09-03T18:30:00Z"),
                row("prod-3", "loc-1", 104, "2026-09-05T18:30:00Z"),
            ],
            &locations(),
            now,
        );
        let first = soonest_production_url(&events, now, 0).unwrap();
        assert!(first.contains("prod-1"));
        // The Linbury production is skipped; index 1 is the next Main Stage one.
        let second = soonest_production_url(&events, now, 1).unwrap();
        assert!(second.contains("prod-3"));
        assert!(soonest_production_url(&events, now, 5).is_err());
    }

    #[test]
    fn soonest_cache_expires_with_the_performance() {
        let dir = tempfile::tempdir().unwrap();
        let docs = DocStore::new(Arc::new(LocalPlatform::new(dir.path())));
        let now = utc("2026-09-01T12:00:00Z");
        store_soonest(&docs, 0, 101, utc("2026-09-02T18:30:00Z")).unwrap();
        assert_eq!(cached_soonest(&docs, 0, now), Some(101));
        // Within the final hour the cache no longer answers.
        let late = utc("2026-09-02T18:00:00Z");
        assert_eq!(cached_soonest(&docs, 0, late), None);
        assert_eq!(cached_soonest(&docs, 1, now), None);
    }

    #[test]
    fn offset_helper_matches_timezone_conversion() {
        let instant = Utc.with_ymd_and_hms(2026, 6, 1, 18, 30, 0).unwrap();
        let local = london_local(instant);
        assert_eq!(local.format("%H:%M").to_string(), "19:30");
    }

    #[test]
    fn stored_events_roundtrip_through_the_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let platform = LocalPlatform::new(dir.path());
        let dataset = Dataset::new(&platform, "output/roh_events.parquet");

        let now = utc("2026-09-01T12:00:00Z");
        let events = upcoming_events(
            vec![
                row("prod-1", "loc-1", 101, "2026-09-10T18:30:00Z"),
                row("prod-2", "loc-2", 102, "2026-09-11T18:30:00Z"),
            ],
            &locations(),
            now,
        );
        let rows: Vec<StoredEvent> = events.iter().map(StoredEvent::from).collect();
        dataset.write(&rows).unwrap();

        let back: Vec<StoredEvent> = dataset
            .read(&[Filter::Eq("location", "Main Stage".into())])
            .unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].performance_id, Some(101));
        assert_eq!(back[0].location, "Main_Stage");
        assert_eq!(back[0].timestamp, utc("2026-09-10T18:30:00Z"));

        let ids: Vec<StoredEvent> = dataset
            .read(&[Filter::In("performanceId", vec!["102".into()])])
            .unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].production_id, "prod-2");
    }
}
