//! Seat/price/zone reconciliation: merge the four per-performance tables into
//! one seat-level table, enriched with persisted map coordinates and status
//! labels.
//!
//! Join order and the lowest-price dedup policy are fixed; see
//! [`reconcile`].

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::config::{self, AVAILABLE_SEAT_STATUS_IDS};
use crate::normalize::{PriceRecord, PriceTypeRecord, SeatRecord, ZoneRecord};

/// Pixel coordinates for one seat on the hall map, keyed by
/// `(seat_name, zone_name_general)`. Sourced once from the extracted web
/// layout and reused across performances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatPosition {
    pub seat_name: String,
    pub zone_name_general: String,
    pub x: f64,
    pub y: f64,
}

/// Reference row mapping a numeric seat status to its label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatStatus {
    pub seat_status_id: i64,
    pub status_code: String,
}

/// One seat of one performance with its resolved price, zone, position and
/// availability. At most one row exists per
/// `(seat_id, section_id, performance_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatPriceRow {
    pub seat_id: i64,
    pub section_id: i64,
    pub performance_id: i64,
    pub zone_id: i64,
    pub seat_row: String,
    pub seat_number: String,
    pub seat_name: String,
    pub view_url: String,
    pub seat_status_id: i64,
    pub price: Option<f64>,
    pub zone_name: String,
    pub x: f64,
    pub y: f64,
    pub seat_status_str: String,
    pub seat_available: bool,
}

/// The reconciled seat table plus the untouched input tables, returned
/// together so the presentation layer gets everything in one pass.
#[derive(Debug, Clone)]
pub struct SeatPriceBundle {
    pub seats: Vec<SeatPriceRow>,
    pub prices: Vec<PriceRecord>,
    pub zones: Vec<ZoneRecord>,
    pub price_types: Vec<PriceTypeRecord>,
}

/// Per-call knobs; `available_status_ids` defaults to the configured
/// allow-set and may be overridden for what-if filtering.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub available_status_ids: HashSet<i64>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            available_status_ids: AVAILABLE_SEAT_STATUS_IDS.iter().copied().collect(),
        }
    }
}

/// Merge seats, prices and zones for one performance.
///
/// 1. seats ⋈ prices ⋈ zones on `ZoneId` (inner).
/// 2. Zone name through the alias table; rows outside the hierarchy dropped.
/// 3. Positions joined on `(SeatName, ZoneNameGeneral)`; positionless rows
///    (aisles, house seats) dropped.
/// 4. Status label joined on `SeatStatusId`; status 0 with no price is
///    "Not enabled".
/// 5. Stable sort by `(SeatId, SectionId, PerformanceId, Price)` ascending,
///    keep the first of each key triple, so the lowest-priced band wins when
///    a seat sits in several at once.
pub fn reconcile(
    seats: Vec<SeatRecord>,
    prices: Vec<PriceRecord>,
    zones: Vec<ZoneRecord>,
    price_types: Vec<PriceTypeRecord>,
    positions: &[SeatPosition],
    statuses: &[SeatStatus],
    options: &ReconcileOptions,
) -> Result<SeatPriceBundle> {
    if prices.is_empty() {
        bail!("no prices available for this performance");
    }

    let zone_mapping = config::zone_mapping();
    let hierarchy = config::zone_hierarchy();

    let mut prices_by_zone: HashMap<i64, Vec<&PriceRecord>> = HashMap::new();
    for price in &prices {
        prices_by_zone.entry(price.zone_id).or_default().push(price);
    }
    let zones_by_id: HashMap<i64, &ZoneRecord> =
        zones.iter().map(|z| (z.zone_id, z)).collect();
    let position_by_key: HashMap<(&str, &str), (f64, f64)> = positions
        .iter()
        .map(|p| {
            (
                (p.seat_name.as_str(), p.zone_name_general.as_str()),
                (p.x, p.y),
            )
        })
        .collect();
    let status_by_id: HashMap<i64, &str> = statuses
        .iter()
        .map(|s| (s.seat_status_id, s.status_code.as_str()))
        .collect();

    let mut rows: Vec<SeatPriceRow> = Vec::new();
    for seat in &seats {
        let Some(zone) = zones_by_id.get(&seat.zone_id) else {
            continue;
        };
        let Some(general) = zone_mapping.get(zone.zone_name.as_str()) else {
            continue;
        };
        if !hierarchy.contains_key(general) {
            continue;
        }
        let Some(&(x, y)) = position_by_key.get(&(seat.seat_name.as_str(), *general)) else {
            continue;
        };
        let Some(zone_prices) = prices_by_zone.get(&seat.zone_id) else {
            continue;
        };

        for price in zone_prices {
            let seat_status_str = status_label(seat, price.price, &status_by_id);
            rows.push(SeatPriceRow {
                seat_id: seat.seat_id,
                section_id: seat.section_id,
                performance_id: price.performance_id,
                zone_id: seat.zone_id,
                seat_row: seat.seat_row.clone(),
                seat_number: seat.seat_number.clone(),
                seat_name: seat.seat_name.clone(),
                view_url: seat.view_url.clone(),
                seat_status_id: seat.seat_status_id,
                price: price.price,
                zone_name: general.to_string(),
                x,
                y,
                seat_status_str,
                seat_available: options.available_status_ids.contains(&seat.seat_status_id),
            });
        }
    }

    // Unpriced bands sort last, so a seat only stays unpriced when it has no
    // priced band at all.
    rows.sort_by(|a, b| {
        (a.seat_id, a.section_id, a.performance_id)
            .cmp(&(b.seat_id, b.section_id, b.performance_id))
            .then_with(|| {
                a.price
                    .unwrap_or(f64::INFINITY)
                    .total_cmp(&b.price.unwrap_or(f64::INFINITY))
            })
    });
    rows.dedup_by_key(|r| (r.seat_id, r.section_id, r.performance_id));

    Ok(SeatPriceBundle {
        seats: rows,
        prices,
        zones,
        price_types,
    })
}

fn status_label(
    seat: &SeatRecord,
    price: Option<f64>,
    status_by_id: &HashMap<i64, &str>,
) -> String {
    // Status 0 with no price is a seat the house never put on sale, which is
    // not the same thing as a priced seat nobody can buy.
    if seat.seat_status_id == 0 && price.is_none() {
        return "Not enabled".to_string();
    }
    status_by_id
        .get(&seat.seat_status_id)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("Status {}", seat.seat_status_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seat(seat_id: i64, zone_id: i64, status: i64) -> SeatRecord {
        SeatRecord {
            seat_id,
            section_id: 1,
            zone_id,
            seat_status_id: status,
            seat_row: "A".into(),
            seat_number: seat_id.to_string(),
            seat_name: format!("A{seat_id}"),
            screen_id: None,
            view_url: String::new(),
        }
    }

    fn price(zone_id: i64, value: Option<f64>) -> PriceRecord {
        PriceRecord {
            zone_id,
            performance_id: 99,
            price: value,
            enabled: value.is_some(),
        }
    }

    fn zone(zone_id: i64, name: &str) -> ZoneRecord {
        ZoneRecord {
            zone_id,
            zone_group_id: 1,
            zone_name: name.into(),
        }
    }

    fn position(seat_name: &str, general: &str) -> SeatPosition {
        SeatPosition {
            seat_name: seat_name.into(),
            zone_name_general: general.into(),
            x: 10.0,
            y: 20.0,
        }
    }

    fn statuses() -> Vec<SeatStatus> {
        vec![
            SeatStatus {
                seat_status_id: 0,
                status_code: "Available".into(),
            },
            SeatStatus {
                seat_status_id: 3,
                status_code: "Sold".into(),
            },
        ]
    }

    #[test]
    fn duplicate_price_bands_resolve_to_the_lowest() {
        let bundle = reconcile(
            vec![seat(1, 10, 0)],
            vec![price(10, Some(50.0)), price(10, Some(40.0))],
            vec![zone(10, "Balcony")],
            vec![],
            &[position("A1", "Balcony")],
            &statuses(),
            &ReconcileOptions::default(),
        )
        .unwrap();
        assert_eq!(bundle.seats.len(), 1);
        assert_eq!(bundle.seats[0].price, Some(40.0));
    }

    #[test]
    fn at_most_one_row_per_seat_section_performance() {
        let bundle = reconcile(
            vec![seat(1, 10, 0), seat(2, 10, 3)],
            vec![
                price(10, Some(50.0)),
                price(10, Some(40.0)),
                price(10, Some(45.0)),
            ],
            vec![zone(10, "Balcony")],
            vec![],
            &[position("A1", "Balcony"), position("A2", "Balcony")],
            &statuses(),
            &ReconcileOptions::default(),
        )
        .unwrap();
        let mut keys: Vec<_> = bundle
            .seats
            .iter()
            .map(|r| (r.seat_id, r.section_id, r.performance_id))
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), bundle.seats.len());
    }

    #[test]
    fn alias_zones_resolve_and_stray_zones_drop() {
        let bundle = reconcile(
            vec![seat(1, 10, 0), seat(2, 11, 0)],
            vec![price(10, Some(10.0)), price(11, Some(10.0))],
            vec![zone(10, "Slips"), zone(11, "Rehearsal Room")],
            vec![],
            &[position("A1", "Amphitheatre"), position("A2", "Amphitheatre")],
            &statuses(),
            &ReconcileOptions::default(),
        )
        .unwrap();
        assert_eq!(bundle.seats.len(), 1);
        assert_eq!(bundle.seats[0].zone_name, "Amphitheatre");
    }

    #[test]
    fn positionless_seats_are_dropped() {
        let bundle = reconcile(
            vec![seat(1, 10, 0)],
            vec![price(10, Some(10.0))],
            vec![zone(10, "Balcony")],
            vec![],
            &[],
            &statuses(),
            &ReconcileOptions::default(),
        )
        .unwrap();
        assert!(bundle.seats.is_empty());
    }

    #[test]
    fn status_zero_with_null_price_is_not_enabled() {
        let bundle = reconcile(
            vec![seat(1, 10, 0)],
            vec![price(10, None)],
            vec![zone(10, "Balcony")],
            vec![],
            &[position("A1", "Balcony")],
            &statuses(),
            &ReconcileOptions::default(),
        )
        .unwrap();
        assert_eq!(bundle.seats[0].seat_status_str, "Not enabled");
        // Distinct from the plain status-0 label.
        let priced = reconcile(
            vec![seat(1, 10, 0)],
            vec![price(10, Some(10.0))],
            vec![zone(10, "Balcony")],
            vec![],
            &[position("A1", "Balcony")],
            &statuses(),
            &ReconcileOptions::default(),
        )
        .unwrap();
        assert_eq!(priced.seats[0].seat_status_str, "Available");
    }

    #[test]
    fn availability_follows_the_overridable_status_set() {
        let mut options = ReconcileOptions::default();
        let inputs = || {
            (
                vec![seat(1, 10, 3)],
                vec![price(10, Some(10.0))],
                vec![zone(10, "Balcony")],
            )
        };
        let (s, p, z) = inputs();
        let default_run = reconcile(
            s,
            p,
            z,
            vec![],
            &[position("A1", "Balcony")],
            &statuses(),
            &options,
        )
        .unwrap();
        assert!(!default_run.seats[0].seat_available);

        options.available_status_ids = [3].into_iter().collect();
        let (s, p, z) = inputs();
        let overridden = reconcile(
            s,
            p,
            z,
            vec![],
            &[position("A1", "Balcony")],
            &statuses(),
            &options,
        )
        .unwrap();
        assert!(overridden.seats[0].seat_available);
    }

    #[test]
    fn empty_prices_is_a_hard_error() {
        let err = reconcile(
            vec![seat(1, 10, 0)],
            vec![],
            vec![zone(10, "Balcony")],
            vec![],
            &[],
            &statuses(),
            &ReconcileOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no prices available"));
    }
}
