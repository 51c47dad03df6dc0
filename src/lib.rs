//! Royal Opera House ticketing pipeline.
//!
//! Scrapes the ticketing API and the public site, normalizes the feeds into
//! typed rows, reconciles per-performance seat, price and zone data against
//! cached reference tables, and persists events, productions and casts as
//! hive-partitioned parquet datasets plus JSON documents.

pub mod api;
pub mod cache;
pub mod casts;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod events;
pub mod fetch;
pub mod normalize;
pub mod reconcile;
pub mod refdata;
pub mod retry;
pub mod storage;
pub mod tasks;
pub mod tracing;

pub mod util {
    pub mod env;
}
