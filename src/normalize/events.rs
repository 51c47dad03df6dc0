use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::coerce::{coerce_opt_i64, coerce_string, coerce_timestamp};

/// One (production, performance, location) triple from the events feed.
/// `production_id` is stable across performances of the same run;
/// `performance_id` is unique per showing and occasionally absent for
/// listings not yet on sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub production_id: String,
    pub event_type: String,
    pub title: String,
    pub slug: String,
    pub location_id: String,
    pub performance_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

/// Companion record from the feed's `included` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub location_id: String,
    pub location: String,
}

/// Flatten the events feed: explode nested performances and locations so each
/// row is one (event, performance, location) triple. Cancelled events and
/// events with zero performances are dropped entirely.
pub fn normalize_events(payload: &Value) -> Result<(Vec<EventRow>, Vec<LocationRecord>)> {
    let data = payload
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("events payload missing expected key data"))?;

    let mut rows = Vec::new();
    for event in data {
        let attrs = event
            .get("attributes")
            .ok_or_else(|| anyhow!("event missing expected key attributes"))?;
        if attrs
            .get("isCancelled")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            continue;
        }
        let performances = attrs
            .get("performances")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        if performances.is_empty() {
            continue;
        }

        let production_id = coerce_string(
            "id",
            event
                .get("id")
                .ok_or_else(|| anyhow!("event missing expected key id"))?,
        )?;
        let event_type = event
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("events")
            .to_string();
        let title = coerce_string(
            "title",
            attrs
                .get("title")
                .ok_or_else(|| anyhow!("event missing expected key title"))?,
        )?;
        let slug = coerce_string(
            "slug",
            attrs
                .get("slug")
                .ok_or_else(|| anyhow!("event missing expected key slug"))?,
        )?;
        let location_ids = relationship_location_ids(event)?;

        for performance in performances {
            let timestamp = coerce_timestamp(
                "performances.date",
                performance
                    .get("date")
                    .ok_or_else(|| anyhow!("performance missing expected key date"))?,
            )?;
            let performance_id =
                coerce_opt_i64("performanceId", performance.get("performanceId"))?;
            for location_id in &location_ids {
                rows.push(EventRow {
                    production_id: production_id.clone(),
                    event_type: event_type.clone(),
                    title: title.clone(),
                    slug: slug.clone(),
                    location_id: location_id.clone(),
                    performance_id,
                    timestamp,
                });
            }
        }
    }

    let locations = included_locations(payload)?;
    Ok((rows, locations))
}

fn relationship_location_ids(event: &Value) -> Result<Vec<String>> {
    let data = event
        .get("relationships")
        .and_then(|r| r.get("locations"))
        .and_then(|l| l.get("data"))
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("event missing expected key relationships.locations.data"))?;
    data.iter()
        .map(|loc| {
            coerce_string(
                "locations.data.id",
                loc.get("id")
                    .ok_or_else(|| anyhow!("location reference missing expected key id"))?,
            )
        })
        .collect()
}

fn included_locations(payload: &Value) -> Result<Vec<LocationRecord>> {
    let included = payload
        .get("included")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    included
        .iter()
        .filter(|rec| rec.get("type").and_then(Value::as_str) == Some("locations"))
        .map(|rec| {
            let attrs = rec
                .get("attributes")
                .ok_or_else(|| anyhow!("included location missing expected key attributes"))?;
            Ok(LocationRecord {
                location_id: coerce_string(
                    "id",
                    rec.get("id")
                        .ok_or_else(|| anyhow!("included location missing expected key id"))?,
                )?,
                location: coerce_string(
                    "title",
                    attrs
                        .get("title")
                        .ok_or_else(|| anyhow!("included location missing expected key title"))?,
                )?,
            })
        })
        .collect::<Result<Vec<_>>>()
        .context("normalizing included locations")
}
