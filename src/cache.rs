//! Per-invocation cache of reference tables.
//!
//! One `RefCache` is owned by the running task and dropped with it; nothing
//! here is process-global. Tables load lazily on first use and can be
//! invalidated individually when a task knows it just rewrote the backing
//! document.

use anyhow::Result;

use crate::events::UpcomingEvent;
use crate::normalize::SeatRecord;
use crate::reconcile::{SeatPosition, SeatStatus};
use crate::refdata;
use crate::storage::docstore::DocStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKey {
    SeatPositions,
    SeatStatuses,
    Events,
}

pub struct RefCache {
    docs: DocStore,
    positions: Option<Vec<SeatPosition>>,
    statuses: Option<Vec<SeatStatus>>,
    events: Option<Vec<UpcomingEvent>>,
}

impl RefCache {
    pub fn new(docs: DocStore) -> Self {
        Self {
            docs,
            positions: None,
            statuses: None,
            events: None,
        }
    }

    pub fn docs(&self) -> &DocStore {
        &self.docs
    }

    /// Seat positions, loaded (or rebuilt) on first access. `seats` feeds the
    /// rebuild path's id-to-name mapping.
    pub fn seat_positions(&mut self, seats: &[SeatRecord]) -> Result<&[SeatPosition]> {
        if self.positions.is_none() {
            self.positions = Some(refdata::seat_positions(&self.docs, seats)?);
        }
        Ok(self.positions.as_deref().unwrap_or(&[]))
    }

    pub fn seat_statuses(&mut self) -> Result<&[SeatStatus]> {
        if self.statuses.is_none() {
            self.statuses = Some(refdata::seat_statuses(&self.docs)?);
        }
        Ok(self.statuses.as_deref().unwrap_or(&[]))
    }

    /// Events table for this invocation, set once by the task that fetched
    /// the feed.
    pub fn set_events(&mut self, events: Vec<UpcomingEvent>) {
        self.events = Some(events);
    }

    pub fn events(&self) -> Option<&[UpcomingEvent]> {
        self.events.as_deref()
    }

    pub fn invalidate(&mut self, key: RefKey) {
        match key {
            RefKey::SeatPositions => self.positions = None,
            RefKey::SeatStatuses => self.statuses = None,
            RefKey::Events => self.events = None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SEAT_POSITIONS_DOC, SEAT_STATUSES_DOC};
    use crate::storage::LocalPlatform;
    use serde_json::json;
    use std::sync::Arc;

    fn cache() -> (tempfile::TempDir, RefCache) {
        let dir = tempfile::tempdir().unwrap();
        let docs = DocStore::new(Arc::new(LocalPlatform::new(dir.path())));
        (dir, RefCache::new(docs))
    }

    #[test]
    fn loads_once_and_reloads_after_invalidate() {
        let (_dir, mut cache) = cache();
        cache
            .docs()
            .write(SEAT_STATUSES_DOC, &json!([{"Id": 0, "Description": "Available"}]))
            .unwrap();
        assert_eq!(cache.seat_statuses().unwrap().len(), 1);

        // A rewrite is invisible until the key is invalidated.
        cache
            .docs()
            .write(
                SEAT_STATUSES_DOC,
                &json!([
                    {"Id": 0, "Description": "Available"},
                    {"Id": 3, "Description": "Sold"}
                ]),
            )
            .unwrap();
        assert_eq!(cache.seat_statuses().unwrap().len(), 1);
        cache.invalidate(RefKey::SeatStatuses);
        assert_eq!(cache.seat_statuses().unwrap().len(), 2);
    }

    #[test]
    fn positions_read_the_persisted_document() {
        let (_dir, mut cache) = cache();
        cache
            .docs()
            .write(
                SEAT_POSITIONS_DOC,
                &json!([{
                    "seat_name": "A13",
                    "zone_name_general": "Balcony",
                    "x": 1.0,
                    "y": 2.0
                }]),
            )
            .unwrap();
        let positions = cache.seat_positions(&[]).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].seat_name, "A13");
    }

    #[test]
    fn events_are_set_by_the_owning_task() {
        let (_dir, mut cache) = cache();
        assert!(cache.events().is_none());
        cache.set_events(Vec::new());
        assert!(cache.events().is_some());
        cache.invalidate(RefKey::Events);
        assert!(cache.events().is_none());
    }
}
