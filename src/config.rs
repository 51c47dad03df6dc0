//! Fixed reference data for the Royal Opera House venue and upstream API.
//!
//! Everything here is static: the zone hierarchy and alias table change only
//! when the house is physically reconfigured, and the endpoint URLs are the
//! public ticketing proxy routes.

use std::collections::HashMap;

/// General zones of the auditorium, ordered from stage outwards. Rows whose
/// zone does not resolve into this table are stray/test zones and get dropped.
pub const ZONE_HIERARCHY: &[(&str, u8)] = &[
    ("Orchestra Stalls", 0),
    ("Stalls Circle", 1),
    ("Donald Gordon Grand Tier", 2),
    ("Balcony", 3),
    ("Amphitheatre", 4),
];

/// Alias table from the zone names the API reports to the general zone used
/// for hierarchy ordering and seat-position lookup.
pub const ZONE_MAPPING: &[(&str, &str)] = &[
    ("Orchestra Stalls", "Orchestra Stalls"),
    ("Stalls Circle", "Stalls Circle"),
    ("Donald Gordon Grand Tier", "Donald Gordon Grand Tier"),
    ("Balcony", "Balcony"),
    ("Amphitheatre", "Amphitheatre"),
    ("Slips", "Amphitheatre"),
    ("Lower Slips", "Amphitheatre"),
    ("Upper Slips", "Amphitheatre"),
    ("Balcony Boxes", "Balcony"),
    ("Grand Tier Boxes", "Donald Gordon Grand Tier"),
    ("Stalls Circle Standing", "Stalls Circle"),
];

/// Seat status ids that count as bookable. The upstream "taken" set is
/// {3, 4, 6, 7, 8, 13}; these are the ids observed on seats you can actually
/// select. Callers may override the set per invocation for what-if filtering.
pub const AVAILABLE_SEAT_STATUS_IDS: &[i64] = &[0, 5, 12];

pub fn zone_hierarchy() -> HashMap<&'static str, u8> {
    ZONE_HIERARCHY.iter().copied().collect()
}

pub fn zone_mapping() -> HashMap<&'static str, &'static str> {
    ZONE_MAPPING.iter().copied().collect()
}

// Upstream endpoints. The seats route interpolates the performance id.
pub const API_BASE_URL: &str = "https://www.roh.org.uk/api/proxy/TXN";
pub const PRICE_BASE_URL: &str = "https://www.roh.org.uk/api/proxy/TXN/Performances/Prices";
pub const PRICE_TYPES_BASE_URL: &str = "https://www.roh.org.uk/api/proxy/TXN/PriceTypes/Details";
pub const ZONE_ID_BASE_URL: &str =
    "https://www.roh.org.uk/api/proxy/TXN/Performances/ZoneAvailabilities";
pub const ALL_EVENTS_URL: &str = "https://www.rbo.org.uk/api/events";
pub const ACCOUNT_ACTIVITIES_URL: &str = "https://www.rbo.org.uk/api/account-activities";
pub const TICKETS_AND_EVENTS_URL: &str = "https://www.rbo.org.uk/tickets-and-events";
pub const VIEW_FROM_SEAT_URL: &str = "https://static.roh.org.uk/view-from-seat";

pub fn seats_url(performance_id: i64) -> String {
    format!("{API_BASE_URL}/Performances/{performance_id}/Seats")
}

pub fn production_url(slug: &str) -> String {
    format!("{TICKETS_AND_EVENTS_URL}/{slug}-dates")
}

// Persisted layout, relative to the platform root (DATA_DIR).
pub const EVENTS_PARQUET_LOCATION: &str = "output/roh_events.parquet";
pub const PRODUCTIONS_PARQUET_LOCATION: &str = "output/roh_productions.parquet";
pub const CASTS_PARQUET_LOCATION: &str = "output/cast_performances.parquet";

pub const SEAT_POSITIONS_DOC: &str = "metadata/seat_positions.json";
pub const SEAT_POSITIONS_RAW_DOC: &str = "metadata/seat_map_raw.json";
pub const SEAT_STATUSES_DOC: &str = "metadata/seat_statuses.json";
pub const SEAT_POSITIONS_CSV: &str = "metadata/seat_positions.csv";
pub const SOONEST_PERFORMANCE_DOC: &str = "metadata/soonest_performance.json";
pub const SEEN_PERFORMANCES_DOC: &str = "metadata/seen_performances.json";
pub const MISSING_CASTS_DOC: &str = "metadata/missing_casts.json";
pub const SEEN_EVENTS_DOC: &str = "metadata/seen_events.json";
pub const SEEN_CASTS_DOC: &str = "metadata/seen_casts.json";
pub const EVENTS_SUMMARY_DOC: &str = "metadata/events_summary.json";

/// Partition scheme for the events and productions datasets.
pub const EVENTS_PARTITION_COLS: &[&str] = &["location", "date", "time", "title"];
pub const PRODUCTIONS_PARTITION_COLS: &[&str] =
    &["title", "productionId", "date", "time", "performanceId"];

/// The house location whose performances drive cast and seen bookkeeping.
pub const MAIN_STAGE: &str = "Main Stage";

/// Events with this title are members-only rehearsals with no published cast.
pub const FRIENDS_REHEARSALS: &str = "Friends Rehearsals";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_alias_resolves_into_the_hierarchy() {
        let hierarchy = zone_hierarchy();
        for (alias, general) in ZONE_MAPPING {
            assert!(
                hierarchy.contains_key(general),
                "alias {alias} maps to unknown general zone {general}"
            );
        }
    }

    #[test]
    fn seats_url_interpolates_performance() {
        assert_eq!(
            seats_url(1234),
            "https://www.roh.org.uk/api/proxy/TXN/Performances/1234/Seats"
        );
    }
}
