//! Snapshot diffing behind the device-presence stream.
//!
//! `host:track-devices` does not send deltas.  Every payload is the *complete*
//! device table at that instant, so the tracker keeps the previous snapshot
//! and turns each new one into presence events by set difference:
//!
//! ```text
//! previous = {a, b}        current = {b, c}
//! removals  = previous − current = {a}   → Absent(a)
//! additions = current − previous = {c}   → Present(c)
//! ```
//!
//! Only rows whose status is `device` take part; an `offline` or
//! `unauthorized` device is treated as not present at all.  Removals are
//! always emitted before additions so a consumer never sees two live entries
//! for one serial.

use std::collections::BTreeSet;

use tracing::trace;

use crate::domain::device::{DeviceEvent, DeviceRecord, DeviceStatus};
use crate::protocol::parse::parse_device_table;

/// The filtered device table from one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceTable {
    records: BTreeSet<DeviceRecord>,
}

impl DeviceTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a raw snapshot payload, keeping only `device` rows.
    pub fn from_snapshot(payload: &str) -> Self {
        Self::from_records(parse_device_table(payload))
    }

    /// Builds a table from already-parsed rows, keeping only `device` rows.
    pub fn from_records(records: impl IntoIterator<Item = DeviceRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .filter(|r| r.status == DeviceStatus::Device)
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns the events that turn `self` into `next`: removals first, then
    /// additions.
    pub fn diff(&self, next: &DeviceTable) -> Vec<DeviceEvent> {
        let removals = self
            .records
            .difference(&next.records)
            .map(DeviceEvent::absent);
        let additions = next
            .records
            .difference(&self.records)
            .map(DeviceEvent::present);
        removals.chain(additions).collect()
    }

    /// Replaces `self` with `next` and returns the transition events.
    pub fn advance(&mut self, next: DeviceTable) -> Vec<DeviceEvent> {
        let events = self.diff(&next);
        trace!(
            "device table advanced: {} -> {} entries, {} events",
            self.records.len(),
            next.records.len(),
            events.len()
        );
        *self = next;
        events
    }

    /// Empties the table, returning a removal event for every entry.
    ///
    /// Used when the tracking connection drops and the device set can no
    /// longer be trusted.
    pub fn clear(&mut self) -> Vec<DeviceEvent> {
        self.advance(DeviceTable::new())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
