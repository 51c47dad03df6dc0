use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::coerce::{coerce_i64, coerce_opt_i64, coerce_string};
use crate::config::VIEW_FROM_SEAT_URL;

/// One seat of the hall for one performance. `seat_name` is the row/number
/// concatenation the seat-position table is keyed by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatRecord {
    pub seat_id: i64,
    pub section_id: i64,
    pub zone_id: i64,
    pub seat_status_id: i64,
    pub seat_row: String,
    pub seat_number: String,
    pub seat_name: String,
    pub screen_id: Option<i64>,
    pub view_url: String,
}

pub fn normalize_seats(payload: &Value) -> Result<Vec<SeatRecord>> {
    let rows = payload
        .as_array()
        .ok_or_else(|| anyhow!("seats payload is not an array"))?;

    rows.iter()
        .map(|row| {
            let seat_row = coerce_string("SeatRow", field(row, "SeatRow")?)?;
            let seat_number = coerce_string("SeatNumber", field(row, "SeatNumber")?)?;
            let screen_id = coerce_opt_i64("ScreenId", row.get("ScreenId"))?;
            Ok(SeatRecord {
                seat_id: coerce_i64("Id", field(row, "Id")?)?,
                section_id: coerce_i64("SectionId", field(row, "SectionId")?)?,
                zone_id: coerce_i64("ZoneId", field(row, "ZoneId")?)?,
                seat_status_id: coerce_i64("SeatStatusId", field(row, "SeatStatusId")?)?,
                seat_name: format!("{seat_row}{seat_number}"),
                view_url: view_url(&seat_row, &seat_number, screen_id),
                seat_row,
                seat_number,
                screen_id,
            })
        })
        .collect::<Result<Vec<_>>>()
        .context("normalizing seats")
}

/// Deterministic "view from this seat" image URL; screen 0 is used for seats
/// the API serves without a screen assignment.
fn view_url(row: &str, number: &str, screen_id: Option<i64>) -> String {
    format!(
        "{VIEW_FROM_SEAT_URL}/{}/{row}-{number}.jpg",
        screen_id.unwrap_or(0)
    )
}

fn field<'a>(row: &'a Value, name: &str) -> Result<&'a Value> {
    row.get(name)
        .ok_or_else(|| anyhow!("seat row missing expected key {name}"))
}
