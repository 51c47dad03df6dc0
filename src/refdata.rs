//! Persisted reference tables: seat map positions and seat status labels.
//!
//! Positions originate from a one-off extraction of the booking page's SVG
//! layout, stored raw as `metadata/seat_map_raw.json`. The processed table is
//! rebuilt from that raw layout on demand when the processed document is
//! missing.

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::config::{
    self, SEAT_POSITIONS_CSV, SEAT_POSITIONS_DOC, SEAT_POSITIONS_RAW_DOC, SEAT_STATUSES_DOC,
};
use crate::normalize::coerce::{coerce_f64, coerce_i64, coerce_string};
use crate::normalize::SeatRecord;
use crate::reconcile::{SeatPosition, SeatStatus};
use crate::storage::docstore::DocStore;
use crate::storage::Platform;

// Offsets aligning the custom-icon layer with the plain seat layer of the
// extracted SVG.
const SYOS_X_OFFSET: f64 = 4.9;
const SYOS_Y_OFFSET: f64 = 5.35;
const SYOS_ICON_PREFIX: &str = "syos-custom-icon-";

/// Load the processed seat-position table, rebuilding it once from the raw
/// layout when the processed document is absent. `seats` supplies the id to
/// name mapping the custom-icon layer needs.
pub fn seat_positions(docs: &DocStore, seats: &[SeatRecord]) -> Result<Vec<SeatPosition>> {
    if docs.exists(SEAT_POSITIONS_DOC) {
        return docs.read(SEAT_POSITIONS_DOC);
    }
    warn!("seat positions missing, rebuilding from the raw layout");
    let rebuilt = rebuild_seat_positions(docs, seats)?;
    docs.write(SEAT_POSITIONS_DOC, &rebuilt)?;
    write_positions_csv(docs.platform().as_ref(), &rebuilt)?;
    info!(rows = rebuilt.len(), "rebuilt seat positions");
    Ok(rebuilt)
}

/// Rebuild the position table from the raw SVG layout document.
///
/// The layout has three kinds of entries: `Text` rows (zone captions, not
/// seats), `syos-custom-icon-{SeatId}` rows resolved through the live seat
/// list, and `seat-{number}-{row}-{n}` rows whose name is derivable from the
/// id alone. Entries whose zone falls outside the alias table are stray
/// layers and get skipped.
pub fn rebuild_seat_positions(docs: &DocStore, seats: &[SeatRecord]) -> Result<Vec<SeatPosition>> {
    let raw: Value = docs
        .read(SEAT_POSITIONS_RAW_DOC)
        .context("raw seat layout missing; run the layout extraction first")?;
    let entries = raw
        .as_array()
        .ok_or_else(|| anyhow!("raw seat layout is not an array"))?;

    let mapping = config::zone_mapping();
    let names_by_id: HashMap<i64, &str> = seats
        .iter()
        .map(|s| (s.seat_id, s.seat_name.as_str()))
        .collect();

    let mut out = Vec::new();
    for entry in entries {
        let id = coerce_string(
            "id",
            entry
                .get("id")
                .ok_or_else(|| anyhow!("layout entry missing expected key id"))?,
        )?;
        if id == "Text" {
            continue;
        }
        let x = coerce_f64(
            "cx",
            entry
                .get("cx")
                .ok_or_else(|| anyhow!("layout entry missing expected key cx"))?,
        )?;
        let y = coerce_f64(
            "cy",
            entry
                .get("cy")
                .ok_or_else(|| anyhow!("layout entry missing expected key cy"))?,
        )?;
        let zone = coerce_string(
            "ZoneName",
            entry
                .get("ZoneName")
                .ok_or_else(|| anyhow!("layout entry missing expected key ZoneName"))?,
        )?;
        let Some(general) = mapping.get(zone.as_str()) else {
            continue;
        };

        let (seat_name, x, y) = if let Some(rest) = id.strip_prefix(SYOS_ICON_PREFIX) {
            let Ok(seat_id) = rest.parse::<i64>() else {
                warn!(id, "unparseable custom-icon id in raw layout");
                continue;
            };
            let Some(name) = names_by_id.get(&seat_id) else {
                continue;
            };
            (name.to_string(), x + SYOS_X_OFFSET, y + SYOS_Y_OFFSET)
        } else {
            // "seat-13-A-1" carries number then row.
            let parts: Vec<&str> = id.split('-').collect();
            if parts.len() < 3 {
                warn!(id, "unrecognized layout entry id");
                continue;
            }
            (format!("{}{}", parts[2], parts[1]), x, y)
        };

        out.push(SeatPosition {
            seat_name,
            zone_name_general: general.to_string(),
            x,
            y,
        });
    }

    if out.is_empty() {
        bail!("raw seat layout produced no positions");
    }
    Ok(out)
}

/// Status id to label table. An absent document degrades to numeric labels
/// downstream rather than failing the whole run.
pub fn seat_statuses(docs: &DocStore) -> Result<Vec<SeatStatus>> {
    if !docs.exists(SEAT_STATUSES_DOC) {
        warn!("seat statuses document missing, labels fall back to numeric");
        return Ok(Vec::new());
    }
    let raw: Value = docs.read(SEAT_STATUSES_DOC)?;
    let rows = raw
        .as_array()
        .ok_or_else(|| anyhow!("seat statuses document is not an array"))?;
    rows.iter()
        .map(|row| {
            Ok(SeatStatus {
                seat_status_id: coerce_i64(
                    "Id",
                    row.get("Id")
                        .ok_or_else(|| anyhow!("status row missing expected key Id"))?,
                )?,
                status_code: coerce_string(
                    "Description",
                    row.get("Description")
                        .ok_or_else(|| anyhow!("status row missing expected key Description"))?,
                )?,
            })
        })
        .collect::<Result<Vec<_>>>()
        .context("parsing seat statuses")
}

/// Export the position table as CSV next to the JSON document.
pub fn write_positions_csv(platform: &dyn Platform, positions: &[SeatPosition]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for position in positions {
        writer
            .serialize(position)
            .context("serializing seat position row")?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow!("flushing seat position csv: {e}"))?;
    platform.write(SEAT_POSITIONS_CSV, &bytes)
}
