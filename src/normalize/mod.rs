//! Per-kind flatteners turning raw ticketing-API JSON into uniform row sets.
//!
//! Each normalizer is a pure function over the parsed response body; nothing
//! here performs I/O. Joining and enrichment happen in [`crate::reconcile`]
//! and [`crate::events`].

pub mod coerce;
pub mod events;
pub mod price_types;
pub mod prices;
pub mod seats;
pub mod zones;

pub use events::{normalize_events, EventRow, LocationRecord};
pub use price_types::{normalize_price_types, PriceTypeRecord};
pub use prices::{normalize_prices, PriceRecord};
pub use seats::{normalize_seats, SeatRecord};
pub use zones::{normalize_zones, ZoneRecord};
