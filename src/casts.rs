//! Cast discovery for past Main Stage performances.
//!
//! The account-activities endpoint publishes casts only after a performance
//! has happened. Each run looks at feed rows at least two days old, skips the
//! ids already in the cast dataset or known to have no published cast, and
//! fetches the rest once. Seen-performance handling maps human-confirmed
//! timestamps back to performance ids and snapshots their casts.

use anyhow::{anyhow, Context, Result};
use arrow_array::{BooleanArray, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{
    ACCOUNT_ACTIVITIES_URL, CASTS_PARQUET_LOCATION, EVENTS_PARQUET_LOCATION, FRIENDS_REHEARSALS,
    MAIN_STAGE, MISSING_CASTS_DOC, SEEN_CASTS_DOC, SEEN_EVENTS_DOC, SEEN_PERFORMANCES_DOC,
};
use crate::events::{london_local, StoredEvent, UpcomingEvent};
use crate::normalize::coerce::coerce_string;
use crate::storage::dataset::{columns, Dataset, DatasetRecord, Filter, PartitionValues};
use crate::storage::docstore::DocStore;
use crate::storage::Platform;

/// One cast member of one performance. Unpartitioned dataset; the whole cast
/// table is small and always read in full.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastRow {
    pub performance_id: i64,
    pub role: String,
    pub name: String,
    pub is_replacing: bool,
    pub replaced_name: Option<String>,
    pub url: String,
    pub slug: Option<String>,
    pub season_id: Option<String>,
}

impl DatasetRecord for CastRow {
    fn partition_cols() -> &'static [&'static str] {
        &[]
    }

    fn partition_value(&self, col: &str) -> String {
        unreachable!("not a partition column: {col}")
    }

    fn payload_batch(rows: &[Self]) -> Result<RecordBatch> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("performance_id", DataType::Int64, false),
            Field::new("role", DataType::Utf8, false),
            Field::new("name", DataType::Utf8, false),
            Field::new("is_replacing", DataType::Boolean, false),
            Field::new("replaced_name", DataType::Utf8, true),
            Field::new("url", DataType::Utf8, false),
            Field::new("slug", DataType::Utf8, true),
            Field::new("season_id", DataType::Utf8, true),
        ]));
        let performance_ids =
            Int64Array::from(rows.iter().map(|r| r.performance_id).collect::<Vec<_>>());
        let roles =
            StringArray::from(rows.iter().map(|r| Some(r.role.as_str())).collect::<Vec<_>>());
        let names =
            StringArray::from(rows.iter().map(|r| Some(r.name.as_str())).collect::<Vec<_>>());
        let replacing =
            BooleanArray::from(rows.iter().map(|r| r.is_replacing).collect::<Vec<_>>());
        let replaced = StringArray::from(
            rows.iter()
                .map(|r| r.replaced_name.as_deref())
                .collect::<Vec<_>>(),
        );
        let urls =
            StringArray::from(rows.iter().map(|r| Some(r.url.as_str())).collect::<Vec<_>>());
        let slugs =
            StringArray::from(rows.iter().map(|r| r.slug.as_deref()).collect::<Vec<_>>());
        let seasons =
            StringArray::from(rows.iter().map(|r| r.season_id.as_deref()).collect::<Vec<_>>());
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(performance_ids),
                Arc::new(roles),
                Arc::new(names),
                Arc::new(replacing),
                Arc::new(replaced),
                Arc::new(urls),
                Arc::new(slugs),
                Arc::new(seasons),
            ],
        )
        .context("building casts batch")
    }

    fn from_payload(batch: &RecordBatch, _partition: &PartitionValues) -> Result<Vec<Self>> {
        let performance_ids = columns::int_col(batch, "performance_id")?;
        let roles = columns::string_col(batch, "role")?;
        let names = columns::string_col(batch, "name")?;
        let replacing = columns::bool_col(batch, "is_replacing")?;
        let replaced = columns::string_col(batch, "replaced_name")?;
        let urls = columns::string_col(batch, "url")?;
        let slugs = columns::string_col(batch, "slug")?;
        let seasons = columns::string_col(batch, "season_id")?;
        (0..batch.num_rows())
            .map(|i| {
                Ok(CastRow {
                    performance_id: performance_ids.value(i),
                    role: roles.value(i).to_string(),
                    name: names.value(i).to_string(),
                    is_replacing: replacing.value(i),
                    replaced_name: columns::opt_string(replaced, i),
                    url: urls.value(i).to_string(),
                    slug: columns::opt_string(slugs, i),
                    season_id: columns::opt_string(seasons, i),
                })
            })
            .collect()
    }

    fn column_value(&self, col: &str) -> Option<String> {
        match col {
            "performance_id" => Some(self.performance_id.to_string()),
            "role" => Some(self.role.clone()),
            "name" => Some(self.name.clone()),
            "is_replacing" => Some(self.is_replacing.to_string()),
            "replaced_name" => self.replaced_name.clone(),
            "url" => Some(self.url.clone()),
            "slug" => self.slug.clone(),
            "season_id" => self.season_id.clone(),
            _ => None,
        }
    }
}

pub fn cast_url(performance_id: i64) -> String {
    format!("{ACCOUNT_ACTIVITIES_URL}?ids={performance_id}")
}

/// Parse an account-activities payload into cast rows. `None` when the
/// performance has no published cast (empty `data`, or no `accountCast`
/// records).
///
/// Replacement records (`id` containing `-replacement`, role prefixed `"R "`)
/// fold into the row of the member they replace: the replacement's name takes
/// over and the original name moves to `replaced_name`.
pub fn parse_cast(payload: &Value, performance_id: i64) -> Result<Option<Vec<CastRow>>> {
    let data = payload.get("data").and_then(Value::as_array);
    if data.map(Vec::is_empty).unwrap_or(true) {
        return Ok(None);
    }
    let included = payload
        .get("included")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let slug = included
        .iter()
        .find(|rec| rec.get("type").and_then(Value::as_str) == Some("accountEvent"))
        .and_then(|rec| rec.get("attributes"))
        .and_then(|attrs| attrs.get("slug"))
        .and_then(Value::as_str)
        .map(|s| s.to_string());

    struct Member {
        id: String,
        role: String,
        name: String,
    }
    let mut members = Vec::new();
    for rec in included {
        if rec.get("type").and_then(Value::as_str) != Some("accountCast") {
            continue;
        }
        let attrs = rec
            .get("attributes")
            .ok_or_else(|| anyhow!("cast record missing expected key attributes"))?;
        members.push(Member {
            id: coerce_string(
                "id",
                rec.get("id")
                    .ok_or_else(|| anyhow!("cast record missing expected key id"))?,
            )?,
            role: coerce_string(
                "role",
                attrs
                    .get("role")
                    .ok_or_else(|| anyhow!("cast record missing expected key role"))?,
            )?,
            name: coerce_string(
                "name",
                attrs
                    .get("name")
                    .ok_or_else(|| anyhow!("cast record missing expected key name"))?,
            )?
            .trim()
            .to_string(),
        });
    }
    if members.is_empty() {
        return Ok(None);
    }

    let replacement_by_role: HashMap<String, String> = members
        .iter()
        .filter(|m| m.id.contains("-replacement"))
        .map(|m| {
            let role = m.role.strip_prefix("R ").unwrap_or(&m.role).to_string();
            (role, m.name.clone())
        })
        .collect();

    let url = cast_url(performance_id);
    let mut rows = Vec::new();
    for member in &members {
        if member.id.contains("-replacement") {
            continue;
        }
        let is_replacing = member.id.contains("replaced");
        let (name, replaced_name) = if is_replacing {
            match replacement_by_role.get(&member.role) {
                Some(replacement) => (replacement.clone(), Some(member.name.clone())),
                None => {
                    warn!(role = %member.role, "replaced role without a replacement record");
                    (member.name.clone(), None)
                }
            }
        } else {
            (member.name.clone(), None)
        };
        rows.push(CastRow {
            performance_id,
            role: member.role.clone(),
            name,
            is_replacing,
            replaced_name,
            url: url.clone(),
            slug: slug.clone(),
            season_id: None,
        });
    }
    Ok(Some(rows))
}

/// Fetch and parse one performance's cast. A fetch failure or an unparseable
/// body means "no cast published", never a task failure.
pub async fn fetch_cast<F, Fut>(fetch_json: F, performance_id: i64) -> Option<Vec<CastRow>>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let payload = match fetch_json(cast_url(performance_id)).await {
        Ok(payload) => payload,
        Err(e) => {
            warn!(performance_id, error = %e, "cast fetch failed");
            return None;
        }
    };
    match parse_cast(&payload, performance_id) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(performance_id, error = %e, "cast payload unparseable");
            None
        }
    }
}

fn casts_dataset(platform: &dyn Platform) -> Dataset<'_> {
    Dataset::new(platform, CASTS_PARQUET_LOCATION)
}

pub fn load_casts(platform: &dyn Platform) -> Result<Vec<CastRow>> {
    let dataset = casts_dataset(platform);
    if !dataset.exists() {
        return Ok(Vec::new());
    }
    dataset.read(&[])
}

/// Look up casts for past Main Stage performances the cast table does not
/// cover yet. Ids with no published cast go into the missing set so they are
/// not re-fetched every run.
pub async fn handle_new_past_casts<F, Fut>(
    platform: &dyn Platform,
    docs: &DocStore,
    events: &[UpcomingEvent],
    now: DateTime<Utc>,
    fetch_json: F,
) -> Result<Vec<CastRow>>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    info!("processing new past casts");
    let existing = load_casts(platform)?;
    let cast_ids: HashSet<i64> = existing.iter().map(|c| c.performance_id).collect();
    let mut missing: HashSet<i64> = docs
        .read_or_default::<Vec<i64>>(MISSING_CASTS_DOC)?
        .into_iter()
        .collect();

    let threshold = now - Duration::days(2);
    let new_past_ids: Vec<i64> = events
        .iter()
        .filter(|e| {
            e.timestamp < threshold && e.location == MAIN_STAGE && e.title != FRIENDS_REHEARSALS
        })
        .filter_map(|e| e.performance_id)
        .filter(|id| !cast_ids.contains(id) && !missing.contains(id))
        .unique()
        .collect();
    if new_past_ids.is_empty() {
        info!("no new past events to process");
        return Ok(Vec::new());
    }
    info!(count = new_past_ids.len(), "looking up casts for new past events");

    let mut fetched = Vec::new();
    for performance_id in &new_past_ids {
        match fetch_cast(&fetch_json, *performance_id).await {
            Some(rows) => fetched.extend(rows),
            None => {
                missing.insert(*performance_id);
            }
        }
    }

    if !fetched.is_empty() {
        let mut all = existing;
        all.extend(fetched.clone());
        casts_dataset(platform).write(&all)?;
        let slugs: Vec<&str> = fetched.iter().filter_map(|c| c.slug.as_deref()).unique().collect();
        info!(rows = fetched.len(), ?slugs, "saved new cast entries");
    } else {
        info!("no new cast data to process");
    }

    let mut missing_out: Vec<i64> = missing.into_iter().collect();
    missing_out.sort_unstable();
    docs.write(MISSING_CASTS_DOC, &missing_out)?;
    Ok(fetched)
}

/// A human-confirmed seen performance with its cast snapshot fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeenEvent {
    pub title: String,
    pub timestamp: DateTime<Utc>,
    pub performance_id: i64,
    pub date: String,
    pub time: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeenCast {
    pub performance_id: i64,
    pub role: String,
    pub name: String,
    pub is_replacing: bool,
    pub replaced_name: Option<String>,
    pub title: String,
    pub timestamp: DateTime<Utc>,
}

/// Map the seen-performances document (London `YYYY-MM-DD HH:MM` strings) to
/// performance ids, snapshot those events and their casts into the seen
/// documents.
pub fn handle_seen_performances(platform: &dyn Platform, docs: &DocStore) -> Result<()> {
    let seen_stamps: HashSet<String> = docs
        .read_or_default::<Vec<String>>(SEEN_PERFORMANCES_DOC)?
        .into_iter()
        .collect();
    if seen_stamps.is_empty() {
        info!("no seen performances recorded");
        return Ok(());
    }

    let events_dataset = Dataset::new(platform, EVENTS_PARQUET_LOCATION);
    if !events_dataset.exists() {
        info!("events dataset absent, nothing to match seen performances against");
        return Ok(());
    }
    let main_stage: Vec<StoredEvent> = events_dataset.read(&[
        Filter::Eq("location", MAIN_STAGE.into()),
        Filter::Ne("title", FRIENDS_REHEARSALS.into()),
    ])?;

    let seen_events: Vec<SeenEvent> = main_stage
        .iter()
        .filter(|e| {
            let stamp = london_local(e.timestamp).format("%Y-%m-%d %H:%M").to_string();
            seen_stamps.contains(&stamp)
        })
        .filter_map(|e| {
            e.performance_id.map(|performance_id| SeenEvent {
                title: e.title.clone(),
                timestamp: e.timestamp,
                performance_id,
                date: e.date.clone(),
                time: e.time.clone(),
                url: e.url.clone(),
            })
        })
        .collect();

    let seen_ids: HashSet<i64> = seen_events.iter().map(|e| e.performance_id).collect();
    let event_by_id: HashMap<i64, &SeenEvent> =
        seen_events.iter().map(|e| (e.performance_id, e)).collect();

    let seen_casts: Vec<SeenCast> = load_casts(platform)?
        .into_iter()
        .filter(|c| seen_ids.contains(&c.performance_id))
        .filter_map(|c| {
            event_by_id.get(&c.performance_id).map(|e| SeenCast {
                performance_id: c.performance_id,
                role: c.role.clone(),
                name: c.name.clone(),
                is_replacing: c.is_replacing,
                replaced_name: c.replaced_name.clone(),
                title: e.title.clone(),
                timestamp: e.timestamp,
            })
        })
        .collect();

    info!(
        events = seen_events.len(),
        casts = seen_casts.len(),
        "writing seen snapshots"
    );
    docs.write(SEEN_EVENTS_DOC, &seen_events)?;
    docs.write(SEEN_CASTS_DOC, &seen_casts)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalPlatform;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "data": [{"id": "45251", "type": "accountActivity"}],
            "included": [
                {
                    "id": "45251-cast-1",
                    "type": "accountCast",
                    "attributes": {"role": "Tosca", "name": "  Anna Netrebko "}
                },
                {
                    "id": "45251-cast-2-replaced",
                    "type": "accountCast",
                    "attributes": {"role": "Cavaradossi", "name": "Jonas Kaufmann"}
                },
                {
                    "id": "45251-cast-3-replacement",
                    "type": "accountCast",
                    "attributes": {"role": "R Cavaradossi", "name": "Freddie De Tommaso"}
                },
                {
                    "id": "ev-1",
                    "type": "accountEvent",
                    "attributes": {"slug": "tosca", "title": "Tosca"}
                }
            ]
        })
    }

    #[test]
    fn parses_and_merges_replacements() {
        let rows = parse_cast(&payload(), 45251).unwrap().unwrap();
        assert_eq!(rows.len(), 2);

        let tosca = rows.iter().find(|r| r.role == "Tosca").unwrap();
        assert_eq!(tosca.name, "Anna Netrebko");
        assert!(!tosca.is_replacing);
        assert_eq!(tosca.slug.as_deref(), Some("tosca"));

        let cavaradossi = rows.iter().find(|r| r.role == "Cavaradossi").unwrap();
        assert!(cavaradossi.is_replacing);
        assert_eq!(cavaradossi.name, "Freddie De Tommaso");
        assert_eq!(cavaradossi.replaced_name.as_deref(), Some("Jonas Kaufmann"));
    }

    #[test]
    fn empty_data_or_no_cast_records_is_none() {
        assert!(parse_cast(&json!({"data": []}), 1).unwrap().is_none());
        assert!(parse_cast(&json!({"data": null}), 1).unwrap().is_none());
        let no_cast = json!({
            "data": [{"id": "1"}],
            "included": [{"id": "x", "type": "accountEvent", "attributes": {"slug": "s"}}]
        });
        assert!(parse_cast(&no_cast, 1).unwrap().is_none());
    }

    fn past_event(performance_id: i64, title: &str, location: &str) -> UpcomingEvent {
        UpcomingEvent {
            production_id: "prod-1".into(),
            event_type: "events".into(),
            title: title.into(),
            slug: "tosca".into(),
            location: location.into(),
            performance_id: Some(performance_id),
            timestamp: DateTime::parse_from_rfc3339("2026-08-20T18:30:00Z")
                .unwrap()
                .with_timezone(&Utc),
            date: "2026-08-20".into(),
            time: "19:30:00".into(),
            day: "Thursday".into(),
            url: "https://example.test/tosca-dates".into(),
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-09-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn uncast_ids_enter_the_missing_set_and_are_not_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let platform = LocalPlatform::new(dir.path());
        let docs = DocStore::new(Arc::new(LocalPlatform::new(dir.path())));
        let events = vec![
            past_event(101, "Tosca", MAIN_STAGE),
            past_event(102, FRIENDS_REHEARSALS, MAIN_STAGE),
            past_event(103, "Aida", "Linbury Theatre"),
        ];

        let fetch = |_url: String| async move { Ok(json!({"data": []})) };
        let rows = handle_new_past_casts(&platform, &docs, &events, now(), fetch)
            .await
            .unwrap();
        assert!(rows.is_empty());
        // Only the Main Stage non-rehearsal id was attempted and recorded.
        let missing: Vec<i64> = docs.read(MISSING_CASTS_DOC).unwrap();
        assert_eq!(missing, vec![101]);

        // Next run skips it entirely.
        let calls = std::sync::atomic::AtomicU32::new(0);
        let fetch_counts = |_url: String| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { Ok(json!({"data": []})) }
        };
        let rows = handle_new_past_casts(&platform, &docs, &events, now(), fetch_counts)
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fetched_casts_append_to_the_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let platform = LocalPlatform::new(dir.path());
        let docs = DocStore::new(Arc::new(LocalPlatform::new(dir.path())));
        let events = vec![past_event(45251, "Tosca", MAIN_STAGE)];

        let fetch = |_url: String| async move { Ok(payload()) };
        let rows = handle_new_past_casts(&platform, &docs, &events, now(), fetch)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        let stored = load_casts(&platform).unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|c| c.performance_id == 45251));

        // The id now has casts; a second run does not touch the fetcher.
        let calls = std::sync::atomic::AtomicU32::new(0);
        let fetch_counts = |_url: String| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { Ok(payload()) }
        };
        let rows = handle_new_past_casts(&platform, &docs, &events, now(), fetch_counts)
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn seen_performances_snapshot_events_and_casts() {
        let dir = tempfile::tempdir().unwrap();
        let platform = LocalPlatform::new(dir.path());
        let docs = DocStore::new(Arc::new(LocalPlatform::new(dir.path())));

        let event = past_event(45251, "Tosca", MAIN_STAGE);
        Dataset::new(&platform, EVENTS_PARQUET_LOCATION)
            .write(&[StoredEvent::from(&event)])
            .unwrap();
        casts_dataset(&platform)
            .write(&parse_cast(&payload(), 45251).unwrap().unwrap())
            .unwrap();

        // 18:30 UTC in August is 19:30 London.
        docs.write(SEEN_PERFORMANCES_DOC, &vec!["2026-08-20 19:30"]).unwrap();
        handle_seen_performances(&platform, &docs).unwrap();

        let seen_events: Vec<SeenEvent> = docs.read(SEEN_EVENTS_DOC).unwrap();
        assert_eq!(seen_events.len(), 1);
        assert_eq!(seen_events[0].performance_id, 45251);

        let seen_casts: Vec<SeenCast> = docs.read(SEEN_CASTS_DOC).unwrap();
        assert_eq!(seen_casts.len(), 2);
        assert!(seen_casts.iter().all(|c| c.title == "Tosca"));
    }
}
